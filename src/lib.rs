//! Finalizer: completion tracking for invocation inclusion graphs.
//!
//! An invocation aggregates the results of the invocations it *includes*.
//! Inclusion forms an arbitrary directed graph, cycles included. Once an
//! invocation's producer is done it is marked `FINALIZING`; this crate decides
//! when it can become `FINALIZED`, commits that transition, and cascades the
//! decision upward to every includer, emitting the configured export jobs
//! along the way.
//!
//! # Guarantees
//!
//! - **Cycle-safe**: the readiness scan is a visited-set worklist; a cycle
//!   never blocks finalization by itself, only an `ACTIVE` invocation does.
//! - **Two-phase**: an advisory scan over ordinary reads decides whether an
//!   attempt is worthwhile; the transition re-checks inside one immediate
//!   transaction and is the only thing that flips state.
//! - **Idempotent**: every handler is a function of stored state. Redelivered
//!   triggers find the invocation already `FINALIZED` and do nothing.
//! - **Transactional enqueue**: parent retriggers and export jobs are written
//!   to the task table in the same commit as the state change.
//!
//! # Architecture
//!
//! ```text
//!  request_finalization ──► tasks (TryFinalizeInvocation)
//!                                │  lease
//!                                ▼
//!                        plugins::dispatch ──► core::finalizer
//!                                │                 │ readiness::scan
//!                                │                 │ commit + enqueue
//!                                ▼                 ▼
//!                        plugins::export     tasks (parents, exports)
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: data model, SQLite store, work queue, readiness and finalization
//! - [`plugins`]: task dispatcher, worker pool and export sinks

pub mod core;
pub mod plugins;

pub use crate::core::error::{ErrorClass, FinalizerError};
pub use crate::core::finalizer::{FinalizeOutcome, finalize_invocation, try_finalize_invocation};
pub use crate::core::invocation::{ExportTarget, Invocation, InvocationState};
pub use crate::core::readiness::{ReadinessReport, is_ready_to_finalize};
pub use crate::core::store::Store;
pub use crate::core::tasks::Task;
