mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command};
use colored::Colorize;
use finalizer::core::config::{self, FinalizerConfig};
use finalizer::core::graph;
use finalizer::core::readiness;
use finalizer::core::store::Store;
use finalizer::core::tasks::{self, Task};
use finalizer::core::trace;
use finalizer::plugins::dispatch::WorkerPool;
use finalizer::plugins::export::JsonlExportSink;
use finalizer::InvocationState;
use std::fs;
use std::sync::atomic::AtomicBool;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.root)?;
    trace::init_tracing(&config.log)?;
    let store = Store::open_with_config(&cli.root, config)
        .with_context(|| format!("opening store at {}", cli.root.display()))?;

    match cli.command {
        Command::Init => init(&store)?,
        Command::Worker { threads, drain } => {
            let mut worker_config = store.config.worker.clone();
            if let Some(threads) = threads {
                worker_config.threads = threads;
            }
            let pool = WorkerPool::from_config(&worker_config);
            let sink = JsonlExportSink::new(&store.root);
            let stats = if drain {
                pool.drain(&store, &sink)
            } else {
                // Never raised: the process runs until killed. Leases held at
                // that point lapse and the tasks are redelivered.
                let stop = AtomicBool::new(false);
                pool.run(&store, &sink, &stop)
            };
            println!(
                "{} processed={} acked={} retried={} dead_lettered={}",
                "workers stopped".bold(),
                stats.processed,
                stats.acked,
                stats.retried,
                stats.dead_lettered
            );
        }
        Command::Inspect { id, format } => inspect(&store, &id, &format)?,
        Command::Retrigger { id } => {
            // Surface unknown ids now rather than as a dead letter later.
            graph::get_invocation(&store, &id)?;
            let task_id = tasks::enqueue_task(
                &store,
                &Task::TryFinalizeInvocation {
                    invocation_id: id.clone(),
                },
            )?;
            println!("Enqueued {} for {}", task_id, id);
        }
        Command::Queue { format } => queue(&store, &format)?,
    }
    Ok(())
}

fn init(store: &Store) -> Result<()> {
    let path = config::config_path(&store.root);
    if !path.exists() {
        let body = toml::to_string_pretty(&FinalizerConfig::default())?;
        fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    }
    println!("Finalizer store initialized at {}", store.db_path().display());
    Ok(())
}

fn inspect(store: &Store, id: &str, format: &str) -> Result<()> {
    let invocation = graph::get_invocation(store, id)?;
    let parents = graph::get_parents(store, id)?;
    let report = readiness::readiness_report(store, id)?;

    match format {
        "json" => {
            let out = serde_json::json!({
                "invocation": invocation,
                "parents": parents,
                "readiness": report,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        "text" => {
            let state = match invocation.state {
                InvocationState::Active => invocation.state.as_str().yellow(),
                InvocationState::Finalizing => invocation.state.as_str().cyan(),
                InvocationState::Finalized => invocation.state.as_str().green(),
            };
            println!("{} {}", invocation.id.bold(), state);
            if let Some(ts) = invocation.finalize_time {
                println!("  finalized at {}", ts.to_rfc3339());
            }
            println!("  includes: {}", invocation.inclusions.join(", "));
            for target in &invocation.export_targets {
                println!("  exports to: {}", target);
            }
            for parent in &parents {
                println!("  included by: {} ({})", parent.id, parent.state);
            }
            match (report.ready, report.blocking) {
                (true, _) => println!("  {} ({} reachable)", "ready".green(), report.visited),
                (false, Some(blocking)) => {
                    println!("  {} blocked by ACTIVE {}", "not ready".red(), blocking)
                }
                (false, None) => println!("  {}", "not ready".red()),
            }
        }
        other => bail!("unknown format {other:?}; expected 'text' or 'json'"),
    }
    Ok(())
}

fn queue(store: &Store, format: &str) -> Result<()> {
    let pending = tasks::list_pending(store)?;
    let dead = tasks::list_dead_letters(store)?;

    match format {
        "json" => {
            let out = serde_json::json!({ "pending": pending, "dead_letters": dead });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        "text" => {
            println!("{} ({})", "pending".bold(), pending.len());
            for task in &pending {
                let lease = task.leased_by.as_deref().unwrap_or("-");
                println!(
                    "  {} {} {} attempts={} lease={}",
                    task.task_id, task.kind, task.invocation_id, task.attempts, lease
                );
            }
            println!("{} ({})", "dead letters".bold(), dead.len());
            for letter in &dead {
                println!(
                    "  {} {} {} attempts={} {}",
                    letter.task_id,
                    letter.kind,
                    letter.invocation_id,
                    letter.attempts,
                    letter.error.red()
                );
            }
        }
        other => bail!("unknown format {other:?}; expected 'text' or 'json'"),
    }
    Ok(())
}
