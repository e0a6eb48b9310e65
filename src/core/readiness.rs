//! Readiness scan: may an invocation be finalized?
//!
//! An invocation is ready when nothing reachable from it through inclusion
//! edges is still `ACTIVE`. Its own state does not matter, and reaching it
//! again through a cycle is not a dependency. `FINALIZING` descendants do not
//! block: they finalize on their own and retrigger their includers when they
//! do.
//!
//! The walk is an explicit worklist guarded by a visited set, so every
//! invocation is read at most once and cycles of any shape terminate. Cost is
//! bounded by the reachable subgraph.

use crate::core::error::FinalizerError;
use crate::core::graph::{GraphRead, SqlGraph};
use crate::core::store::Store;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    /// First `ACTIVE` invocation found, when not ready.
    pub blocking: Option<String>,
    /// Invocations read, excluding the root.
    pub visited: usize,
}

/// Scan the inclusion closure of `root`.
///
/// Fails with `NotFound` if `root` does not exist and `MissingInclusion` if
/// an edge points at an id the graph does not have.
pub fn scan<G: GraphRead + ?Sized>(graph: &G, root: &str) -> Result<ReadinessReport, FinalizerError> {
    let root_node = graph
        .get_node(root)?
        .ok_or_else(|| FinalizerError::NotFound(format!("invocation {root}")))?;

    let mut visited: FxHashSet<String> = FxHashSet::default();
    visited.insert(root.to_string());

    // (includer, included) pairs so a dangling edge can name both ends.
    let mut queue: VecDeque<(String, String)> = VecDeque::new();
    for included in root_node.inclusions {
        if visited.insert(included.clone()) {
            queue.push_back((root.to_string(), included));
        }
    }

    let mut read = 0usize;
    while let Some((includer, id)) = queue.pop_front() {
        let node = graph
            .get_node(&id)?
            .ok_or_else(|| FinalizerError::MissingInclusion {
                includer,
                included: id.clone(),
            })?;
        read += 1;

        if node.state.blocks_includers() {
            return Ok(ReadinessReport {
                ready: false,
                blocking: Some(id),
                visited: read,
            });
        }

        for included in node.inclusions {
            if visited.insert(included.clone()) {
                queue.push_back((id.clone(), included));
            }
        }
    }

    Ok(ReadinessReport {
        ready: true,
        blocking: None,
        visited: read,
    })
}

/// Advisory readiness check with ordinary reads.
///
/// The graph may change while the scan runs, so a `true` here only means a
/// finalization attempt is worth making; the transition re-checks under its
/// own transaction.
pub fn is_ready_to_finalize(store: &Store, id: &str) -> Result<bool, FinalizerError> {
    Ok(readiness_report(store, id)?.ready)
}

pub fn readiness_report(store: &Store, id: &str) -> Result<ReadinessReport, FinalizerError> {
    store
        .pool()
        .with_read("readiness.scan", |conn| scan(&SqlGraph::new(conn), id))
}
