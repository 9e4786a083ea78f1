//! Bloat detection and online index rebuilds.

pub mod bloat;
pub mod coordinator;
pub mod executor;
pub mod plan;
pub mod resolver;

pub use bloat::{select_reindex_candidates, BloatEstimator};
pub use coordinator::{
    OnlineReindexCoordinator, ReindexOutcome, ReindexReport, ReindexStatus, ReindexSummary,
};
pub use executor::{DdlExecutor, PgDdlExecutor};
pub use plan::{DdlStatement, ReindexPlan, ReindexStep, ReindexTarget, StatementGroup, TxScope};
pub use resolver::{IndexCatalog, PgIndexResolver};
