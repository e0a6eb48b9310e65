//! Transactional work queue.
//!
//! Tasks live in the store database, so `enqueue` joins whatever transaction
//! the caller has open: a task becomes visible exactly when the state change
//! that produced it commits, and never otherwise.
//!
//! Delivery is at-least-once. `lease` hides a task for `lease_ms`; a worker
//! that dies without settling it simply lets the lease lapse and the task is
//! delivered again. Settling (`ack`, `retry`, `dead_letter`) only succeeds
//! for the current lease owner.

use crate::core::config::QueueConfig;
use crate::core::error::FinalizerError;
use crate::core::invocation::ExportTarget;
use crate::core::store::Store;
use crate::core::time;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    /// Re-check readiness of one invocation and finalize it if possible.
    TryFinalizeInvocation { invocation_id: String },
    /// Export one finalized invocation to one BigQuery table.
    #[serde(rename = "export_invocation_to_bq")]
    ExportInvocationToBq {
        invocation_id: String,
        bq_export: ExportTarget,
    },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::TryFinalizeInvocation { .. } => "try_finalize_invocation",
            Task::ExportInvocationToBq { .. } => "export_invocation_to_bq",
        }
    }

    pub fn invocation_id(&self) -> &str {
        match self {
            Task::TryFinalizeInvocation { invocation_id }
            | Task::ExportInvocationToBq { invocation_id, .. } => invocation_id,
        }
    }
}

/// A task claimed by one worker until `lease_expires_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedTask {
    pub task_id: String,
    pub task: Task,
    /// Deliveries so far, including this one.
    pub attempts: u32,
    pub lease_owner: String,
    pub lease_expires_ms: i64,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub task_id: String,
    pub kind: String,
    pub invocation_id: String,
    pub attempts: u32,
    pub not_before_ms: i64,
    pub leased_by: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub task_id: String,
    pub kind: String,
    pub invocation_id: String,
    pub payload: String,
    pub attempts: u32,
    pub error: String,
    pub dead_at: String,
}

/// Queue operations bound to one connection (usually an open transaction).
pub struct TaskQueue<'c> {
    conn: &'c Connection,
    config: &'c QueueConfig,
}

impl<'c> TaskQueue<'c> {
    pub fn new(conn: &'c Connection, config: &'c QueueConfig) -> Self {
        Self { conn, config }
    }

    pub fn enqueue(&self, task: &Task) -> Result<String, FinalizerError> {
        let task_id = time::new_task_id();
        let payload = serde_json::to_string(task)?;
        self.conn.execute(
            "INSERT INTO tasks (task_id, kind, invocation_id, payload, attempts, not_before_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
            params![
                task_id,
                task.kind(),
                task.invocation_id(),
                payload,
                time::now_ms(),
                time::to_rfc3339(&time::now())
            ],
        )?;
        tracing::trace!(task_id = %task_id, kind = task.kind(), invocation_id = task.invocation_id(), "task enqueued");
        Ok(task_id)
    }

    /// Claim the oldest due task that is not under a live lease.
    ///
    /// Payloads that no longer decode are dead-lettered on the spot and
    /// skipped.
    pub fn lease(&self, worker_id: &str, now_ms: i64) -> Result<Option<LeasedTask>, FinalizerError> {
        loop {
            let row: Option<(String, String, String, u32)> = self
                .conn
                .query_row(
                    "SELECT task_id, kind, payload, attempts FROM tasks
                     WHERE not_before_ms <= ?1
                       AND (lease_expires_ms IS NULL OR lease_expires_ms <= ?1)
                     ORDER BY not_before_ms, seq
                     LIMIT 1",
                    params![now_ms],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            let Some((task_id, kind, payload, attempts)) = row else {
                return Ok(None);
            };

            let task: Task = match serde_json::from_str(&payload) {
                Ok(task) => task,
                Err(e) => {
                    let error = format!("undecodable {kind} payload: {e}");
                    tracing::error!(task_id = %task_id, %error, "dead-lettering poison task");
                    self.move_to_dead_letters(&task_id, &error)?;
                    continue;
                }
            };

            let lease_expires_ms = now_ms.saturating_add(self.config.lease_ms as i64);
            self.conn.execute(
                "UPDATE tasks SET lease_owner = ?2, lease_expires_ms = ?3, attempts = attempts + 1
                 WHERE task_id = ?1",
                params![task_id, worker_id, lease_expires_ms],
            )?;
            return Ok(Some(LeasedTask {
                task_id,
                task,
                attempts: attempts + 1,
                lease_owner: worker_id.to_string(),
                lease_expires_ms,
            }));
        }
    }

    /// Remove a handled task. Returns `false` if the lease was lost.
    pub fn ack(&self, leased: &LeasedTask) -> Result<bool, FinalizerError> {
        let changed = self.conn.execute(
            "DELETE FROM tasks WHERE task_id = ?1 AND lease_owner = ?2",
            params![leased.task_id, leased.lease_owner],
        )?;
        Ok(changed == 1)
    }

    /// Release the lease and schedule the next delivery after backoff.
    pub fn retry(&self, leased: &LeasedTask, error: &str, now_ms: i64) -> Result<bool, FinalizerError> {
        let delay = self.config.backoff(leased.attempts);
        let not_before_ms = now_ms.saturating_add(delay.as_millis() as i64);
        let changed = self.conn.execute(
            "UPDATE tasks SET lease_owner = NULL, lease_expires_ms = NULL,
                              not_before_ms = ?3, last_error = ?4
             WHERE task_id = ?1 AND lease_owner = ?2",
            params![leased.task_id, leased.lease_owner, not_before_ms, error],
        )?;
        Ok(changed == 1)
    }

    pub fn dead_letter(&self, leased: &LeasedTask, error: &str) -> Result<bool, FinalizerError> {
        let owned: Option<String> = self
            .conn
            .query_row(
                "SELECT task_id FROM tasks WHERE task_id = ?1 AND lease_owner = ?2",
                params![leased.task_id, leased.lease_owner],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Ok(false);
        }
        self.move_to_dead_letters(&leased.task_id, error)?;
        Ok(true)
    }

    fn move_to_dead_letters(&self, task_id: &str, error: &str) -> Result<(), FinalizerError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO dead_letters (task_id, kind, invocation_id, payload, attempts, error, dead_at)
             SELECT task_id, kind, invocation_id, payload, attempts, ?2, ?3 FROM tasks WHERE task_id = ?1",
            params![task_id, error, time::to_rfc3339(&time::now())],
        )?;
        self.conn
            .execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?;
        Ok(())
    }
}

pub fn enqueue_task(store: &Store, task: &Task) -> Result<String, FinalizerError> {
    store.pool().with_transaction("tasks.enqueue", |tx| {
        TaskQueue::new(tx, &store.config.queue).enqueue(task)
    })
}

pub fn lease_task(store: &Store, worker_id: &str) -> Result<Option<LeasedTask>, FinalizerError> {
    store.pool().with_transaction("tasks.lease", |tx| {
        TaskQueue::new(tx, &store.config.queue).lease(worker_id, time::now_ms())
    })
}

pub fn ack_task(store: &Store, leased: &LeasedTask) -> Result<bool, FinalizerError> {
    store.pool().with_transaction("tasks.ack", |tx| {
        TaskQueue::new(tx, &store.config.queue).ack(leased)
    })
}

pub fn retry_task(store: &Store, leased: &LeasedTask, error: &str) -> Result<bool, FinalizerError> {
    store.pool().with_transaction("tasks.retry", |tx| {
        TaskQueue::new(tx, &store.config.queue).retry(leased, error, time::now_ms())
    })
}

pub fn dead_letter_task(store: &Store, leased: &LeasedTask, error: &str) -> Result<bool, FinalizerError> {
    store.pool().with_transaction("tasks.dead_letter", |tx| {
        TaskQueue::new(tx, &store.config.queue).dead_letter(leased, error)
    })
}

/// Tasks not yet acknowledged, leased or not, due or not.
pub fn pending_count(store: &Store) -> Result<u64, FinalizerError> {
    store.pool().with_read("tasks.pending_count", |conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as u64)
    })
}

pub fn list_pending(store: &Store) -> Result<Vec<PendingTask>, FinalizerError> {
    store.pool().with_read("tasks.list_pending", |conn| {
        let mut stmt = conn.prepare(
            "SELECT task_id, kind, invocation_id, attempts, not_before_ms, lease_owner, last_error
             FROM tasks ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingTask {
                task_id: row.get(0)?,
                kind: row.get(1)?,
                invocation_id: row.get(2)?,
                attempts: row.get(3)?,
                not_before_ms: row.get(4)?,
                leased_by: row.get(5)?,
                last_error: row.get(6)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    })
}

/// Decoded payloads of all pending tasks, in enqueue order.
pub fn pending_tasks(store: &Store) -> Result<Vec<Task>, FinalizerError> {
    store.pool().with_read("tasks.pending_tasks", |conn| {
        let mut stmt = conn.prepare("SELECT payload FROM tasks ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(serde_json::from_str(&row?)?);
        }
        Ok(results)
    })
}

pub fn list_dead_letters(store: &Store) -> Result<Vec<DeadLetter>, FinalizerError> {
    store.pool().with_read("tasks.list_dead_letters", |conn| {
        let mut stmt = conn.prepare(
            "SELECT task_id, kind, invocation_id, payload, attempts, error, dead_at
             FROM dead_letters ORDER BY dead_at, task_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DeadLetter {
                task_id: row.get(0)?,
                kind: row.get(1)?,
                invocation_id: row.get(2)?,
                payload: row.get(3)?,
                attempts: row.get(4)?,
                error: row.get(5)?,
                dead_at: row.get(6)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    })
}
