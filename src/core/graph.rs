//! Invocation graph access.
//!
//! `GraphRead` is the read capability the readiness scan and the finalization
//! transition consume. `SqlGraph` implements it over any connection, so the
//! same code runs against an autocommit read connection (advisory, possibly
//! stale) or inside an open transaction (consistent with the writes that
//! transaction commits).
//!
//! The free functions at the bottom are the producer-side surface: creating
//! invocations, adding inclusions and requesting finalization.

use crate::core::error::FinalizerError;
use crate::core::invocation::{
    ExportTarget, Invocation, InvocationState, ParentRef, validate_invocation_id,
};
use crate::core::store::Store;
use crate::core::tasks::{Task, TaskQueue};
use crate::core::time;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

/// The slice of an invocation the readiness scan needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub state: InvocationState,
    pub inclusions: Vec<String>,
}

pub trait GraphRead {
    /// Full invocation record, `None` if no such id.
    fn get_invocation(&self, id: &str) -> Result<Option<Invocation>, FinalizerError>;

    /// State and outgoing edges, `None` if no such id.
    fn get_node(&self, id: &str) -> Result<Option<GraphNode>, FinalizerError>;

    /// Every invocation whose inclusions contain `id`.
    fn get_parents(&self, id: &str) -> Result<Vec<ParentRef>, FinalizerError>;
}

/// Outcome of the FINALIZING → FINALIZED compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub committed: bool,
    /// The stored finalize time after the attempt, if the invocation is finalized.
    pub finalize_time: Option<DateTime<Utc>>,
}

pub struct SqlGraph<'c> {
    conn: &'c Connection,
}

impl<'c> SqlGraph<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn get_state(&self, id: &str) -> Result<Option<InvocationState>, FinalizerError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM invocations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| InvocationState::parse(id, &s)).transpose()
    }

    fn get_inclusions(&self, id: &str) -> Result<Vec<String>, FinalizerError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT included_id FROM inclusions WHERE includer_id = ?1 ORDER BY included_id",
        )?;
        let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Atomically move `id` from FINALIZING to FINALIZED, stamping `at`.
    ///
    /// Returns `committed = false` (not an error) when the precondition no
    /// longer holds.
    pub fn commit_finalization(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<CommitResult, FinalizerError> {
        let changed = self.conn.execute(
            "UPDATE invocations SET state = ?2, finalize_time = ?3
             WHERE id = ?1 AND state = ?4",
            params![
                id,
                InvocationState::Finalized.as_str(),
                time::to_rfc3339(&at),
                InvocationState::Finalizing.as_str()
            ],
        )?;
        if changed == 1 {
            return Ok(CommitResult {
                committed: true,
                finalize_time: Some(at),
            });
        }

        let current = self
            .get_invocation(id)?
            .ok_or_else(|| FinalizerError::NotFound(format!("invocation {id}")))?;
        Ok(CommitResult {
            committed: false,
            finalize_time: current.finalize_time,
        })
    }

    /// Compare-and-set on `state`; returns whether the row changed.
    fn transition(
        &self,
        id: &str,
        from: InvocationState,
        to: InvocationState,
    ) -> Result<bool, FinalizerError> {
        let changed = self.conn.execute(
            "UPDATE invocations SET state = ?2 WHERE id = ?1 AND state = ?3",
            params![id, to.as_str(), from.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn insert(&self, new: &NewInvocation, now: &DateTime<Utc>) -> Result<(), FinalizerError> {
        let created_at = time::to_rfc3339(now);
        let finalize_time = (new.state == InvocationState::Finalized).then(|| created_at.clone());
        let exports_json = serde_json::to_string(&new.export_targets)?;
        self.conn.execute(
            "INSERT INTO invocations (id, state, finalize_time, export_targets, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.id,
                new.state.as_str(),
                finalize_time,
                exports_json,
                created_at
            ],
        )?;
        for included in &new.inclusions {
            self.insert_inclusion(&new.id, included, &created_at)?;
        }
        Ok(())
    }

    fn insert_inclusion(
        &self,
        includer: &str,
        included: &str,
        created_at: &str,
    ) -> Result<(), FinalizerError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO inclusions (includer_id, included_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![includer, included, created_at],
        )?;
        Ok(())
    }
}

impl GraphRead for SqlGraph<'_> {
    fn get_invocation(&self, id: &str) -> Result<Option<Invocation>, FinalizerError> {
        let row: Option<(String, Option<String>, String)> = self
            .conn
            .query_row(
                "SELECT state, finalize_time, export_targets FROM invocations WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((state, finalize_time, exports_json)) = row else {
            return Ok(None);
        };

        let state = InvocationState::parse(id, &state)?;
        let finalize_time = finalize_time
            .map(|raw| time::parse_rfc3339(id, &raw))
            .transpose()?;
        let export_targets: Vec<ExportTarget> =
            serde_json::from_str(&exports_json).map_err(|e| FinalizerError::CorruptRecord {
                id: id.to_string(),
                detail: format!("export_targets: {e}"),
            })?;

        Ok(Some(Invocation {
            id: id.to_string(),
            state,
            finalize_time,
            inclusions: self.get_inclusions(id)?,
            export_targets,
        }))
    }

    fn get_node(&self, id: &str) -> Result<Option<GraphNode>, FinalizerError> {
        let Some(state) = self.get_state(id)? else {
            return Ok(None);
        };
        Ok(Some(GraphNode {
            state,
            inclusions: self.get_inclusions(id)?,
        }))
    }

    fn get_parents(&self, id: &str) -> Result<Vec<ParentRef>, FinalizerError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT i.includer_id, v.state
             FROM inclusions i
             JOIN invocations v ON v.id = i.includer_id
             WHERE i.included_id = ?1
             ORDER BY i.includer_id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (parent_id, state) = row?;
            let state = InvocationState::parse(&parent_id, &state)?;
            results.push(ParentRef {
                id: parent_id,
                state,
            });
        }
        Ok(results)
    }
}

/// Producer-side description of an invocation to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvocation {
    pub id: String,
    pub state: InvocationState,
    pub inclusions: Vec<String>,
    pub export_targets: Vec<ExportTarget>,
}

impl NewInvocation {
    pub fn new(id: &str, state: InvocationState) -> Self {
        Self {
            id: id.to_string(),
            state,
            inclusions: Vec::new(),
            export_targets: Vec::new(),
        }
    }

    pub fn including(mut self, ids: &[&str]) -> Self {
        self.inclusions.extend(ids.iter().map(|id| id.to_string()));
        self
    }

    pub fn exporting(mut self, target: ExportTarget) -> Self {
        self.export_targets.push(target);
        self
    }

    fn validate(&self) -> Result<(), FinalizerError> {
        validate_invocation_id(&self.id)?;
        for included in &self.inclusions {
            validate_invocation_id(included)?;
        }
        for (i, target) in self.export_targets.iter().enumerate() {
            target.validate().map_err(|e| {
                FinalizerError::ValidationError(format!("export_targets[{i}]: {e}"))
            })?;
        }
        Ok(())
    }
}

/// Read one invocation with an advisory (autocommit) read.
pub fn get_invocation(store: &Store, id: &str) -> Result<Invocation, FinalizerError> {
    store.pool().with_read("graph.get_invocation", |conn| {
        SqlGraph::new(conn)
            .get_invocation(id)?
            .ok_or_else(|| FinalizerError::NotFound(format!("invocation {id}")))
    })
}

pub fn get_parents(store: &Store, id: &str) -> Result<Vec<ParentRef>, FinalizerError> {
    store
        .pool()
        .with_read("graph.get_parents", |conn| SqlGraph::new(conn).get_parents(id))
}

/// Create an invocation with its inclusions and export targets.
///
/// Edges may point at invocations that do not exist yet. An invocation
/// created directly in `FINALIZED` gets its finalize time stamped to now.
pub fn insert_invocation(store: &Store, new: &NewInvocation) -> Result<(), FinalizerError> {
    new.validate()?;
    store.pool().with_transaction("graph.insert_invocation", |tx| {
        let graph = SqlGraph::new(tx);
        if graph.get_state(&new.id)?.is_some() {
            return Err(FinalizerError::ValidationError(format!(
                "invocation {} already exists",
                new.id
            )));
        }
        graph.insert(new, &time::now())
    })
}

/// Add the edge `includer → included`.
///
/// The includer must still be `ACTIVE`, and the included invocation must exist.
pub fn include_invocation(store: &Store, includer: &str, included: &str) -> Result<(), FinalizerError> {
    validate_invocation_id(includer)?;
    validate_invocation_id(included)?;
    store.pool().with_transaction("graph.include_invocation", |tx| {
        let graph = SqlGraph::new(tx);
        match graph.get_state(includer)? {
            None => return Err(FinalizerError::NotFound(format!("invocation {includer}"))),
            Some(InvocationState::Active) => {}
            Some(state) => {
                return Err(FinalizerError::ValidationError(format!(
                    "invocation {includer} is {state}, only ACTIVE invocations can include others"
                )));
            }
        }
        if graph.get_state(included)?.is_none() {
            return Err(FinalizerError::NotFound(format!("invocation {included}")));
        }
        graph.insert_inclusion(includer, included, &time::to_rfc3339(&time::now()))
    })
}

/// Move `id` from ACTIVE to FINALIZING and enqueue its first
/// `TryFinalizeInvocation`, in one transaction.
///
/// Already FINALIZING or FINALIZED invocations are left alone. Returns the
/// state after the call.
pub fn request_finalization(store: &Store, id: &str) -> Result<InvocationState, FinalizerError> {
    store.pool().with_transaction("graph.request_finalization", |tx| {
        let graph = SqlGraph::new(tx);
        let state = graph
            .get_state(id)?
            .ok_or_else(|| FinalizerError::NotFound(format!("invocation {id}")))?;
        if state != InvocationState::Active {
            tracing::debug!(invocation_id = id, %state, "finalization already requested");
            return Ok(state);
        }

        graph.transition(id, InvocationState::Active, InvocationState::Finalizing)?;
        TaskQueue::new(tx, &store.config.queue).enqueue(&Task::TryFinalizeInvocation {
            invocation_id: id.to_string(),
        })?;
        tracing::info!(invocation_id = id, "finalization requested");
        Ok(InvocationState::Finalizing)
    })
}
