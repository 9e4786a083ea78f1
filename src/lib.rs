//! PostgreSQL bloat estimation and online index rebuilds.
//!
//! Bloat is estimated from planner statistics without scanning data. A
//! bloated index is rebuilt with `CREATE INDEX CONCURRENTLY` under a temporary
//! name and swapped in by short transactions, recreating the primary key or
//! unique constraint it backs and the foreign keys that reference it.

pub mod db;
pub mod error;
pub mod health;
pub mod models;
pub mod session;

pub use error::{MaintError, Result};
pub use health::{
    BloatEstimator, DdlExecutor, IndexCatalog, OnlineReindexCoordinator, ReindexOutcome,
    ReindexReport, ReindexStatus, ReindexStep, ReindexSummary,
};
pub use models::{
    BloatThresholds, ConnectionConfig, IndexBloatRecord, MaintenanceSettings, TableBloatRecord,
};
pub use session::MaintenanceSession;

/// Install `env_logger` at `level`; `RUST_LOG`, when set, overrides it.
/// Returns false if a logger was already installed.
pub fn init_logging(level: log::LevelFilter) -> bool {
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .parse_default_env()
        .try_init()
        .is_ok()
}
