//! Task dispatch: lease, handle, settle.
//!
//! This is the message-handling layer around the core. Each handled task is
//! settled by outcome:
//! - success (including every no-op finalization outcome) → ack;
//! - transient error → retry after backoff, until `max_attempts`;
//! - permanent error, or transient past `max_attempts` → dead-letter.
//!
//! Workers share nothing but the `Store` handle and the sink. Two workers may
//! handle triggers for the same invocation at once; the transition's own
//! transaction decides which one commits.

use crate::core::config::WorkerConfig;
use crate::core::error::{ErrorClass, FinalizerError};
use crate::core::finalizer;
use crate::core::store::Store;
use crate::core::tasks::{self, LeasedTask, Task};
use crate::plugins::export::ExportSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Retried { error: String },
    DeadLettered { error: String },
    /// The lease expired before settling; another delivery owns the task now.
    LeaseLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTask {
    pub task_id: String,
    pub task: Task,
    pub attempts: u32,
    pub settlement: Settlement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub acked: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub lease_lost: u64,
    pub store_errors: u64,
}

impl WorkerStats {
    fn record(&mut self, settlement: &Settlement) {
        self.processed += 1;
        match settlement {
            Settlement::Acked => self.acked += 1,
            Settlement::Retried { .. } => self.retried += 1,
            Settlement::DeadLettered { .. } => self.dead_lettered += 1,
            Settlement::LeaseLost => self.lease_lost += 1,
        }
    }

    fn merge(&mut self, other: WorkerStats) {
        self.processed += other.processed;
        self.acked += other.acked;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.lease_lost += other.lease_lost;
        self.store_errors += other.store_errors;
    }
}

/// Run the handler for one task. No settlement happens here.
pub fn handle_task(store: &Store, sink: &dyn ExportSink, task: &Task) -> Result<(), FinalizerError> {
    match task {
        Task::TryFinalizeInvocation { invocation_id } => {
            finalizer::try_finalize_invocation(store, invocation_id)?;
            Ok(())
        }
        Task::ExportInvocationToBq {
            invocation_id,
            bq_export,
        } => sink.export(invocation_id, bq_export),
    }
}

/// Lease one due task, handle it and settle it.
///
/// Returns `Ok(None)` when nothing is due. Errors are store failures while
/// leasing or settling; handler failures are reflected in the settlement.
pub fn process_next(
    store: &Store,
    sink: &dyn ExportSink,
    worker_id: &str,
) -> Result<Option<ProcessedTask>, FinalizerError> {
    let Some(leased) = tasks::lease_task(store, worker_id)? else {
        return Ok(None);
    };
    let _span = tracing::debug_span!(
        "task",
        task_id = %leased.task_id,
        kind = leased.task.kind(),
        invocation_id = leased.task.invocation_id(),
        attempt = leased.attempts
    )
    .entered();

    let settlement = match handle_task(store, sink, &leased.task) {
        Ok(()) => settle_ack(store, &leased)?,
        Err(err) => settle_failure(store, &leased, &err)?,
    };

    Ok(Some(ProcessedTask {
        task_id: leased.task_id,
        task: leased.task,
        attempts: leased.attempts,
        settlement,
    }))
}

fn settle_ack(store: &Store, leased: &LeasedTask) -> Result<Settlement, FinalizerError> {
    if tasks::ack_task(store, leased)? {
        Ok(Settlement::Acked)
    } else {
        tracing::warn!("lease lost before ack; task will be redelivered");
        Ok(Settlement::LeaseLost)
    }
}

fn settle_failure(
    store: &Store,
    leased: &LeasedTask,
    err: &FinalizerError,
) -> Result<Settlement, FinalizerError> {
    let error = err.to_string();
    let exhausted = leased.attempts >= store.config.queue.max_attempts;

    if err.class() == ErrorClass::Transient && !exhausted {
        tracing::warn!(%error, "task failed transiently; retrying");
        return Ok(if tasks::retry_task(store, leased, &error)? {
            Settlement::Retried { error }
        } else {
            Settlement::LeaseLost
        });
    }

    tracing::error!(%error, exhausted, "task failed permanently; dead-lettering");
    Ok(if tasks::dead_letter_task(store, leased, &error)? {
        Settlement::DeadLettered { error }
    } else {
        Settlement::LeaseLost
    })
}

/// A fixed set of worker threads pulling from the store's queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    threads: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(threads: usize, poll_interval: Duration) -> Self {
        Self {
            threads: threads.max(1),
            poll_interval,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.threads, Duration::from_millis(config.poll_interval_ms))
    }

    /// Process tasks until the queue is empty, including tasks enqueued while
    /// draining and tasks waiting out a retry backoff.
    pub fn drain(&self, store: &Store, sink: &dyn ExportSink) -> WorkerStats {
        self.spawn(store, sink, || false, true)
    }

    /// Process tasks until `stop` is raised.
    pub fn run(&self, store: &Store, sink: &dyn ExportSink, stop: &AtomicBool) -> WorkerStats {
        self.spawn(store, sink, || stop.load(Ordering::Relaxed), false)
    }

    fn spawn<S>(&self, store: &Store, sink: &dyn ExportSink, should_stop: S, exit_when_empty: bool) -> WorkerStats
    where
        S: Fn() -> bool + Sync,
    {
        let run_id = Ulid::new().to_string();
        let should_stop = &should_stop;
        let mut total = WorkerStats::default();

        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.threads)
                .map(|i| {
                    let worker_id = format!("{run_id}-{i}");
                    scope.spawn(move || {
                        self.worker_loop(store, sink, &worker_id, should_stop, exit_when_empty)
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(stats) => total.merge(stats),
                    Err(_) => tracing::error!("worker thread panicked"),
                }
            }
        });

        tracing::info!(
            processed = total.processed,
            acked = total.acked,
            retried = total.retried,
            dead_lettered = total.dead_lettered,
            "workers stopped"
        );
        total
    }

    fn worker_loop<S>(
        &self,
        store: &Store,
        sink: &dyn ExportSink,
        worker_id: &str,
        should_stop: &S,
        exit_when_empty: bool,
    ) -> WorkerStats
    where
        S: Fn() -> bool,
    {
        let mut stats = WorkerStats::default();
        while !should_stop() {
            match process_next(store, sink, worker_id) {
                Ok(Some(processed)) => stats.record(&processed.settlement),
                Ok(None) => {
                    if exit_when_empty {
                        match tasks::pending_count(store) {
                            Ok(0) => break,
                            Ok(_) => {}
                            Err(err) => {
                                stats.store_errors += 1;
                                tracing::warn!(worker_id, error = %err, "queue count failed");
                            }
                        }
                    }
                    thread::sleep(self.poll_interval);
                }
                Err(err) => {
                    stats.store_errors += 1;
                    tracing::warn!(worker_id, error = %err, "queue access failed");
                    thread::sleep(self.poll_interval);
                }
            }
        }
        stats
    }
}
