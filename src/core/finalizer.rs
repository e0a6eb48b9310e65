//! The FINALIZING → FINALIZED transition.
//!
//! Finalization is two-phase. `try_finalize_invocation` first runs the
//! readiness scan over ordinary reads; if that says the invocation may be
//! ready, `finalize_invocation` opens one immediate transaction, re-checks
//! state and readiness inside it and, only if both still hold, commits:
//!
//! 1. `state = FINALIZED` and `finalize_time = now`;
//! 2. one `TryFinalizeInvocation` per direct parent that is `FINALIZING`;
//! 3. one `ExportInvocationToBq` per configured export target.
//!
//! All three land in the same commit or none do. Every precondition miss is
//! a no-op outcome rather than an error, so redelivered triggers are safe.

use crate::core::error::FinalizerError;
use crate::core::graph::{GraphRead, SqlGraph};
use crate::core::invocation::{Invocation, InvocationState};
use crate::core::readiness;
use crate::core::store::Store;
use crate::core::tasks::{Task, TaskQueue};
use crate::core::time;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// This call committed the transition.
    Finalized {
        finalize_time: DateTime<Utc>,
        /// Parents a `TryFinalizeInvocation` was enqueued for.
        retriggered: Vec<String>,
        exports_enqueued: usize,
    },
    /// An earlier call committed it; nothing was done.
    AlreadyFinalized { finalize_time: Option<DateTime<Utc>> },
    /// Still `ACTIVE`; finalization has not been requested.
    NotFinalizing,
    /// Some reachable invocation is still `ACTIVE`.
    NotReady { blocking: Option<String> },
}

impl FinalizeOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(
            self,
            FinalizeOutcome::Finalized { .. } | FinalizeOutcome::AlreadyFinalized { .. }
        )
    }
}

/// Handler for `TryFinalizeInvocation`: cheap scan, then the authoritative
/// transition if the scan says it is worth attempting.
pub fn try_finalize_invocation(store: &Store, id: &str) -> Result<FinalizeOutcome, FinalizerError> {
    let pre = store.pool().with_read("finalizer.precheck", |conn| {
        let graph = SqlGraph::new(conn);
        let invocation = graph
            .get_invocation(id)?
            .ok_or_else(|| FinalizerError::NotFound(format!("invocation {id}")))?;
        if let Some(outcome) = precondition_outcome(&invocation) {
            return Ok(Err(outcome));
        }
        Ok(Ok(readiness::scan(&graph, id)?))
    })?;

    match pre {
        Err(outcome) => {
            tracing::debug!(invocation_id = id, ?outcome, "finalization skipped");
            Ok(outcome)
        }
        Ok(report) if !report.ready => {
            tracing::debug!(
                invocation_id = id,
                blocking = report.blocking.as_deref().unwrap_or_default(),
                "invocation not ready to finalize"
            );
            Ok(FinalizeOutcome::NotReady {
                blocking: report.blocking,
            })
        }
        Ok(_) => finalize_invocation(store, id),
    }
}

/// Commit the transition for `id` if it is `FINALIZING` and ready, with the
/// readiness check repeated inside the committing transaction.
pub fn finalize_invocation(store: &Store, id: &str) -> Result<FinalizeOutcome, FinalizerError> {
    let outcome = store.pool().with_transaction("finalizer.finalize", |tx| {
        let graph = SqlGraph::new(tx);
        let invocation = graph
            .get_invocation(id)?
            .ok_or_else(|| FinalizerError::NotFound(format!("invocation {id}")))?;
        if let Some(outcome) = precondition_outcome(&invocation) {
            return Ok(outcome);
        }

        let report = readiness::scan(&graph, id)?;
        if !report.ready {
            return Ok(FinalizeOutcome::NotReady {
                blocking: report.blocking,
            });
        }

        let commit = graph.commit_finalization(id, time::now())?;
        let Some(finalize_time) = commit.finalize_time.filter(|_| commit.committed) else {
            return Ok(FinalizeOutcome::AlreadyFinalized {
                finalize_time: commit.finalize_time,
            });
        };

        let queue = TaskQueue::new(tx, &store.config.queue);
        let mut retriggered = Vec::new();
        for parent in graph.get_parents(id)? {
            // ACTIVE parents get retriggered by their own finalization request.
            if parent.state != InvocationState::Finalizing {
                continue;
            }
            queue.enqueue(&Task::TryFinalizeInvocation {
                invocation_id: parent.id.clone(),
            })?;
            retriggered.push(parent.id);
        }

        for target in &invocation.export_targets {
            queue.enqueue(&Task::ExportInvocationToBq {
                invocation_id: id.to_string(),
                bq_export: target.clone(),
            })?;
        }

        Ok(FinalizeOutcome::Finalized {
            finalize_time,
            retriggered,
            exports_enqueued: invocation.export_targets.len(),
        })
    })?;

    match &outcome {
        FinalizeOutcome::Finalized {
            retriggered,
            exports_enqueued,
            ..
        } => tracing::info!(
            invocation_id = id,
            parents_retriggered = retriggered.len(),
            exports_enqueued,
            "invocation finalized"
        ),
        other => tracing::debug!(invocation_id = id, outcome = ?other, "finalization not committed"),
    }
    Ok(outcome)
}

/// The no-op outcome for an invocation that is not `FINALIZING`, if any.
fn precondition_outcome(invocation: &Invocation) -> Option<FinalizeOutcome> {
    match invocation.state {
        InvocationState::Finalizing => None,
        InvocationState::Active => Some(FinalizeOutcome::NotFinalizing),
        InvocationState::Finalized => Some(FinalizeOutcome::AlreadyFinalized {
            finalize_time: invocation.finalize_time,
        }),
    }
}
