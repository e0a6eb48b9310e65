//! Core modules: data model, store plumbing and the finalization algorithms.

pub mod config;
pub mod db;
pub mod error;
pub mod finalizer;
pub mod graph;
pub mod invocation;
pub mod pool;
pub mod readiness;
pub mod schemas;
pub mod store;
pub mod tasks;
pub mod time;
pub mod trace;
