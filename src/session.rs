use sqlx::PgPool;

use crate::db::postgres;
use crate::error::Result;
use crate::health::{
    select_reindex_candidates, BloatEstimator, OnlineReindexCoordinator, PgDdlExecutor,
    PgIndexResolver, ReindexOutcome, ReindexReport,
};
use crate::models::{
    rank_index_bloat, rank_table_bloat, ConnectionConfig, IndexBloatRecord, MaintenanceSettings,
    TableBloatRecord,
};

/// Handle to one database for the maintenance job. Owned by the caller and
/// passed explicitly; estimation and catalog lookups share its pool, each
/// reindex run takes a dedicated connection from it.
pub struct MaintenanceSession {
    pool: PgPool,
    database: String,
    settings: MaintenanceSettings,
}

impl MaintenanceSession {
    pub async fn connect(config: &ConnectionConfig, settings: MaintenanceSettings) -> Result<Self> {
        settings.validate()?;
        let pool = postgres::create_pool(config, &settings.pool).await?;
        log::info!(
            "Connected to {}@{}:{}/{}",
            config.username,
            config.host,
            config.port,
            config.database
        );

        Ok(Self::from_pool(pool, config.database.clone(), settings))
    }

    pub fn from_pool(pool: PgPool, database: String, settings: MaintenanceSettings) -> Self {
        Self {
            pool,
            database,
            settings,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn settings(&self) -> &MaintenanceSettings {
        &self.settings
    }

    /// Connection latency in milliseconds
    pub async fn ping(&self) -> Result<u64> {
        Ok(postgres::ping(&self.pool).await?)
    }

    pub fn estimator(&self) -> BloatEstimator {
        BloatEstimator::new(self.pool.clone())
    }

    /// Table bloat estimates, largest waste first
    pub async fn list_table_bloat(&self) -> Result<Vec<TableBloatRecord>> {
        let mut records = self.estimator().estimate_table_bloat().await?;
        rank_table_bloat(&mut records);
        Ok(records)
    }

    /// Btree index bloat estimates, largest waste first
    pub async fn list_index_bloat(&self) -> Result<Vec<IndexBloatRecord>> {
        let mut records = self.estimator().estimate_index_bloat().await?;
        rank_index_bloat(&mut records);
        Ok(records)
    }

    async fn coordinator(
        &self,
    ) -> Result<OnlineReindexCoordinator<PgIndexResolver, PgDdlExecutor>> {
        let executor = PgDdlExecutor::acquire(&self.pool, &self.settings.reindex).await?;
        Ok(OnlineReindexCoordinator::new(
            PgIndexResolver::new(self.pool.clone()),
            executor,
            self.settings.reindex.clone(),
        ))
    }

    /// Rebuild one index online. Returns the rows affected by the final
    /// statement, or 0 when the run was aborted before changing anything.
    pub async fn reindex(&self, target: &IndexBloatRecord) -> Result<u64> {
        Ok(self.reindex_detailed(target).await?.rows_affected())
    }

    pub async fn reindex_detailed(&self, target: &IndexBloatRecord) -> Result<ReindexOutcome> {
        let mut coordinator = self.coordinator().await?;
        coordinator.reindex(target).await
    }

    /// Estimate index bloat and rebuild every index over the configured
    /// thresholds, one after another.
    pub async fn reindex_bloated(&self) -> Result<Vec<ReindexReport>> {
        let records = self.estimator().estimate_index_bloat().await?;
        let candidates = select_reindex_candidates(records, &self.settings.bloat);
        log::info!(
            "{} of the estimated indexes in {} exceed bloat thresholds",
            candidates.len(),
            self.database
        );
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut coordinator = self.coordinator().await?;
        Ok(coordinator.reindex_all(&candidates).await)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
