//! Subsystems around the core: the task dispatcher and export sinks.

pub mod dispatch;
pub mod export;
