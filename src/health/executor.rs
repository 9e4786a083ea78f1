use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Executor, PgPool, Postgres};

use super::plan::{DdlStatement, StatementGroup, TxScope};
use crate::error::{MaintError, Result};
use crate::models::ReindexSettings;

/// Runs generated DDL. Implementations only have to know how to run one
/// statement on its own and a batch inside a transaction; grouping and
/// logging are shared.
#[async_trait]
pub trait DdlExecutor: Send {
    /// Run outside any open transaction. Returns rows affected.
    async fn execute_standalone(&mut self, statement: &DdlStatement) -> Result<u64>;

    /// Run all statements in one transaction, rolling back on the first
    /// fault. Returns rows affected by the last statement.
    async fn execute_transaction(&mut self, statements: &[DdlStatement]) -> Result<u64>;

    async fn execute_group(&mut self, group: &StatementGroup) -> Result<u64> {
        if group.is_empty() {
            return Ok(0);
        }

        match group.scope {
            TxScope::Standalone => {
                let mut rows = 0;
                for statement in &group.statements {
                    log::info!("[{}] Running cmd: {}", statement.step, statement.sql);
                    rows = self.execute_standalone(statement).await?;
                }
                Ok(rows)
            }
            TxScope::Transaction => {
                log::info!("[{}] BEGIN ({} statements)", group.step, group.statements.len());
                for statement in &group.statements {
                    log::info!("[{}] Running cmd: {}", statement.step, statement.sql);
                }
                let rows = self.execute_transaction(&group.statements).await?;
                log::info!("[{}] COMMIT", group.step);
                Ok(rows)
            }
        }
    }
}

/// Executes on one dedicated connection taken from the pool for the length
/// of a reindex run.
pub struct PgDdlExecutor {
    conn: PoolConnection<Postgres>,
    lock_timeout_ms: Option<u64>,
}

impl PgDdlExecutor {
    pub async fn acquire(pool: &PgPool, settings: &ReindexSettings) -> Result<Self> {
        let conn = pool.acquire().await?;

        Ok(PgDdlExecutor {
            conn,
            lock_timeout_ms: settings.lock_timeout_ms,
        })
    }
}

/// Scoped to the enclosing transaction, so concurrent builds still wait for
/// older transactions as long as they need to.
fn lock_timeout_statement(timeout_ms: u64) -> String {
    format!("SET LOCAL lock_timeout = {}", timeout_ms)
}

#[async_trait]
impl DdlExecutor for PgDdlExecutor {
    async fn execute_standalone(&mut self, statement: &DdlStatement) -> Result<u64> {
        let result = (&mut *self.conn)
            .execute(sqlx::raw_sql(&statement.sql))
            .await
            .map_err(|e| MaintError::execution(statement.sql.clone(), e))?;

        Ok(result.rows_affected())
    }

    async fn execute_transaction(&mut self, statements: &[DdlStatement]) -> Result<u64> {
        let mut tx = self.conn.begin().await?;

        if let Some(timeout_ms) = self.lock_timeout_ms {
            let sql = lock_timeout_statement(timeout_ms);
            log::debug!("Running cmd: {}", sql);
            (&mut *tx)
                .execute(sqlx::raw_sql(&sql))
                .await
                .map_err(|e| MaintError::execution(sql.clone(), e))?;
        }

        let mut rows = 0;
        for statement in statements {
            let result = (&mut *tx)
                .execute(sqlx::raw_sql(&statement.sql))
                .await
                .map_err(|e| MaintError::execution(statement.sql.clone(), e))?;
            rows = result.rows_affected();
        }

        tx.commit().await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::plan::ReindexStep;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(TxScope, Vec<String>)>,
    }

    #[async_trait]
    impl DdlExecutor for Recorder {
        async fn execute_standalone(&mut self, statement: &DdlStatement) -> Result<u64> {
            self.calls
                .push((TxScope::Standalone, vec![statement.sql.clone()]));
            Ok(1)
        }

        async fn execute_transaction(&mut self, statements: &[DdlStatement]) -> Result<u64> {
            self.calls.push((
                TxScope::Transaction,
                statements.iter().map(|s| s.sql.clone()).collect(),
            ));
            Ok(7)
        }
    }

    #[tokio::test]
    async fn test_standalone_group_runs_each_statement() {
        let mut recorder = Recorder::default();
        let group = StatementGroup {
            step: ReindexStep::ClearStaleTemp,
            scope: TxScope::Standalone,
            statements: vec![
                DdlStatement::new(ReindexStep::ClearStaleTemp, "DROP INDEX IF EXISTS a"),
                DdlStatement::new(ReindexStep::ClearStaleTemp, "DROP INDEX IF EXISTS b"),
            ],
        };

        let rows = recorder.execute_group(&group).await.unwrap();
        assert_eq!(rows, 1);
        assert_eq!(recorder.calls.len(), 2);
        assert!(recorder
            .calls
            .iter()
            .all(|(scope, _)| *scope == TxScope::Standalone));
    }

    #[tokio::test]
    async fn test_transaction_group_is_one_call() {
        let mut recorder = Recorder::default();
        let group = StatementGroup::transaction(ReindexStep::ValidateForeignKeys, vec![
            DdlStatement::new(ReindexStep::ValidateForeignKeys, "ALTER TABLE a VALIDATE CONSTRAINT x"),
            DdlStatement::new(ReindexStep::ValidateForeignKeys, "ALTER TABLE b VALIDATE CONSTRAINT y"),
        ]);

        let rows = recorder.execute_group(&group).await.unwrap();
        assert_eq!(rows, 7);
        assert_eq!(recorder.calls.len(), 1);
        assert_eq!(recorder.calls[0].1.len(), 2);
    }

    #[test]
    fn test_lock_timeout_is_transaction_scoped() {
        assert_eq!(lock_timeout_statement(5000), "SET LOCAL lock_timeout = 5000");
    }

    #[tokio::test]
    async fn test_empty_group_is_skipped() {
        let mut recorder = Recorder::default();
        let rows = recorder
            .execute_group(&StatementGroup::transaction(
                ReindexStep::ValidateForeignKeys,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert!(recorder.calls.is_empty());
    }
}
