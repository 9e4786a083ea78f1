use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

use super::executor::DdlExecutor;
use super::plan::{self, ParsedDefinition, ReindexStep, ReindexTarget, StatementGroup};
use super::resolver::IndexCatalog;
use crate::error::{MaintError, Result};
use crate::models::{ConstraintInfo, IndexBloatRecord, IndexDefinition, ReindexSettings};

#[derive(Debug)]
pub enum ReindexStatus {
    Completed { rows_affected: u64 },
    /// Stopped before touching the original index.
    Aborted { step: ReindexStep, reason: MaintError },
}

#[derive(Debug)]
pub struct ReindexOutcome {
    pub run_id: Uuid,
    pub index: String,
    pub status: ReindexStatus,
}

impl ReindexOutcome {
    /// Rows affected by the last statement of a completed run, 0 otherwise.
    pub fn rows_affected(&self) -> u64 {
        match self.status {
            ReindexStatus::Completed { rows_affected } => rows_affected,
            ReindexStatus::Aborted { .. } => 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, ReindexStatus::Completed { .. })
    }
}

/// One entry of a batch rebuild.
#[derive(Debug)]
pub struct ReindexReport {
    pub index: String,
    pub bloat_size_bytes: i64,
    pub result: Result<ReindexOutcome>,
}

/// Serializable summary of a report, for job logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexSummary {
    pub index: String,
    pub bloat_size_bytes: i64,
    pub completed: bool,
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ReindexReport> for ReindexSummary {
    fn from(report: &ReindexReport) -> Self {
        let (completed, rows_affected, message) = match &report.result {
            Ok(outcome) => match &outcome.status {
                ReindexStatus::Completed { rows_affected } => (true, *rows_affected, None),
                ReindexStatus::Aborted { step, reason } => {
                    (false, 0, Some(format!("aborted at {}: {}", step, reason)))
                }
            },
            Err(e) => (false, 0, Some(e.to_string())),
        };

        ReindexSummary {
            index: report.index.clone(),
            bloat_size_bytes: report.bloat_size_bytes,
            completed,
            rows_affected,
            message,
        }
    }
}

/// Where a run currently is, with whatever earlier steps produced.
enum RunState {
    Resolve,
    ParseDefinition {
        definition: IndexDefinition,
    },
    ClearStaleTemp {
        definition: IndexDefinition,
        parsed: ParsedDefinition,
    },
    ClassifyConstraint {
        definition: IndexDefinition,
        parsed: ParsedDefinition,
    },
    DiscoverDependents {
        definition: IndexDefinition,
        parsed: ParsedDefinition,
        constraint: Option<ConstraintInfo>,
    },
    Apply {
        pending: VecDeque<StatementGroup>,
        rows_affected: u64,
    },
    Done {
        rows_affected: u64,
    },
}

impl RunState {
    fn step(&self) -> ReindexStep {
        match self {
            RunState::Resolve => ReindexStep::Resolve,
            RunState::ParseDefinition { .. } => ReindexStep::ParseDefinition,
            RunState::ClearStaleTemp { .. } => ReindexStep::ClearStaleTemp,
            RunState::ClassifyConstraint { .. } => ReindexStep::ClassifyConstraint,
            RunState::DiscoverDependents { .. } => ReindexStep::DiscoverDependents,
            RunState::Apply { pending, .. } => pending
                .front()
                .map(|group| group.step)
                .unwrap_or(ReindexStep::Done),
            RunState::Done { .. } => ReindexStep::Done,
        }
    }
}

/// Rebuilds one index at a time without blocking writers: the replacement is
/// built concurrently under a temporary name, then swapped in by short
/// transactions. Runs never overlap on the same executor; each awaits every
/// statement before issuing the next.
pub struct OnlineReindexCoordinator<C, E> {
    catalog: C,
    executor: E,
    settings: ReindexSettings,
}

impl<C: IndexCatalog, E: DdlExecutor> OnlineReindexCoordinator<C, E> {
    pub fn new(catalog: C, executor: E, settings: ReindexSettings) -> Self {
        OnlineReindexCoordinator {
            catalog,
            executor,
            settings,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_parts(self) -> (C, E) {
        (self.catalog, self.executor)
    }

    /// Rebuild the index named by `record`. Lookup and classification
    /// problems end the run as `Aborted` with nothing destructive issued;
    /// statement failures are returned as `Execution` errors, with everything
    /// committed before the failing group left in place.
    pub async fn reindex(&mut self, record: &IndexBloatRecord) -> Result<ReindexOutcome> {
        let target = ReindexTarget::from(record);
        self.reindex_target(&target).await
    }

    pub async fn reindex_target(&mut self, target: &ReindexTarget) -> Result<ReindexOutcome> {
        let run_id = Uuid::new_v4();
        let temp_name = plan::temp_index_name(&target.index_name, &self.settings);
        log::info!("[reindex {}] Rebuilding index {}", run_id, target);

        let mut state = RunState::Resolve;
        loop {
            let step = state.step();
            state = match self.advance(state, target, &temp_name).await {
                Ok(RunState::Done { rows_affected }) => {
                    log::info!(
                        "[reindex {}] Finished {} ({} rows affected)",
                        run_id,
                        target,
                        rows_affected
                    );
                    return Ok(ReindexOutcome {
                        run_id,
                        index: target.qualified_index(),
                        status: ReindexStatus::Completed { rows_affected },
                    });
                }
                Ok(next) => next,
                Err(reason) if reason.is_abort() => {
                    log::warn!("[reindex {}] Aborted at {}: {}", run_id, step, reason);
                    return Ok(ReindexOutcome {
                        run_id,
                        index: target.qualified_index(),
                        status: ReindexStatus::Aborted { step, reason },
                    });
                }
                Err(e) => {
                    log::error!("[reindex {}] Failed at {}: {}", run_id, step, e);
                    return Err(e);
                }
            };
        }
    }

    async fn advance(
        &mut self,
        state: RunState,
        target: &ReindexTarget,
        temp_name: &str,
    ) -> Result<RunState> {
        match state {
            RunState::Resolve => {
                let definition = self
                    .catalog
                    .resolve(&target.schema, &target.index_name)
                    .await?;
                log::info!("Index definition: {}", definition.definition);
                Ok(RunState::ParseDefinition { definition })
            }
            RunState::ParseDefinition { definition } => {
                let parsed = plan::parse_definition(&definition.definition)?;
                Ok(RunState::ClearStaleTemp { definition, parsed })
            }
            RunState::ClearStaleTemp { definition, parsed } => {
                let group = plan::clear_stale_temp(target, temp_name)?;
                self.executor.execute_group(&group).await?;
                Ok(RunState::ClassifyConstraint { definition, parsed })
            }
            RunState::ClassifyConstraint { definition, parsed } => {
                let constraint = self
                    .catalog
                    .find_backing_constraint(&target.schema, &target.index_name)
                    .await?;
                if let Some(constraint) = &constraint {
                    plan::constraint_keyword(target, constraint)?;
                }
                Ok(RunState::DiscoverDependents {
                    definition,
                    parsed,
                    constraint,
                })
            }
            RunState::DiscoverDependents {
                definition,
                parsed,
                constraint,
            } => {
                let dependents = self
                    .catalog
                    .find_foreign_dependents(
                        &target.index_name,
                        definition.oid,
                        constraint.map(|c| c.oid),
                    )
                    .await?;
                let plan = plan::plan_rebuild(
                    target,
                    &parsed,
                    temp_name,
                    constraint.as_ref(),
                    &dependents,
                )?;
                Ok(RunState::Apply {
                    pending: plan.into_groups().into(),
                    rows_affected: 0,
                })
            }
            RunState::Apply {
                mut pending,
                rows_affected,
            } => match pending.pop_front() {
                Some(group) => {
                    let rows_affected = self.executor.execute_group(&group).await?;
                    Ok(RunState::Apply {
                        pending,
                        rows_affected,
                    })
                }
                None => Ok(RunState::Done { rows_affected }),
            },
            done @ RunState::Done { .. } => Ok(done),
        }
    }

    /// Rebuild each candidate in order. A failure on one index is recorded
    /// in its report and the batch moves on.
    pub async fn reindex_all(&mut self, candidates: &[IndexBloatRecord]) -> Vec<ReindexReport> {
        let mut reports = Vec::with_capacity(candidates.len());
        for record in candidates {
            let result = self.reindex(record).await;
            reports.push(ReindexReport {
                index: record.qualified_name(),
                bloat_size_bytes: record.bloat_size_bytes(),
                result,
            });
        }
        reports
    }
}
