//! CLI struct definitions for the `finalizer` operator binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "finalizer",
    version = env!("CARGO_PKG_VERSION"),
    about = "Runs finalization workers over an invocation store and inspects its state."
)]
pub(crate) struct Cli {
    /// Store root directory (holds finalizer.toml and the store database).
    #[clap(long, default_value = ".finalizer")]
    pub root: PathBuf,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the store database and a default finalizer.toml.
    Init,
    /// Process queued tasks.
    Worker {
        /// Worker threads (defaults to worker.threads from the config).
        #[clap(long)]
        threads: Option<usize>,
        /// Exit once the queue is empty instead of polling forever.
        #[clap(long)]
        drain: bool,
    },
    /// Show an invocation, its parents and its readiness.
    Inspect {
        #[clap(long)]
        id: String,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Enqueue a TryFinalizeInvocation for an invocation.
    Retrigger {
        #[clap(long)]
        id: String,
    },
    /// List pending tasks and dead letters.
    Queue {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}
