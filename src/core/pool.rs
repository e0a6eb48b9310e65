//! SQLite connection factory with read/transaction separation.
//!
//! - **Reads** open a fresh connection and run in autocommit mode. Each
//!   statement sees the latest committed data, but consecutive statements may
//!   observe different snapshots. Use them for advisory scans only.
//! - **Transactions** open a fresh connection and run the closure inside
//!   `BEGIN IMMEDIATE`. The reserved lock is taken up front, so reads inside
//!   the closure are consistent with the writes it commits. The transaction
//!   commits when the closure returns `Ok` and rolls back otherwise.
//!
//! Connections are not cached and there is no in-process write mutex: SQLite's
//! own locking arbitrates between writers, and a writer that cannot get the
//! lock within `busy_timeout` fails with a transient error.

use crate::core::config::StoreConfig;
use crate::core::db;
use crate::core::error::FinalizerError;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SqlitePool {
    db_path: PathBuf,
    read_busy_timeout: Duration,
    write_busy_timeout: Duration,
}

impl SqlitePool {
    pub fn new(db_path: PathBuf, config: &StoreConfig) -> Self {
        Self {
            db_path,
            read_busy_timeout: Duration::from_millis(config.read_busy_timeout_ms),
            write_busy_timeout: Duration::from_millis(config.write_busy_timeout_ms),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Execute a closure with an autocommit read connection.
    pub fn with_read<F, R>(&self, op_name: &str, f: F) -> Result<R, FinalizerError>
    where
        F: FnOnce(&Connection) -> Result<R, FinalizerError>,
    {
        let _span = tracing::trace_span!("store.read", op = op_name).entered();
        let conn = db::db_connect(&self.db_path, self.read_busy_timeout)?;
        f(&conn)
    }

    /// Execute a closure inside one `BEGIN IMMEDIATE` transaction.
    pub fn with_transaction<F, R>(&self, op_name: &str, f: F) -> Result<R, FinalizerError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, FinalizerError>,
    {
        let _span = tracing::trace_span!("store.txn", op = op_name).entered();
        let mut conn = db::db_connect(&self.db_path, self.write_busy_timeout)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                // Dropping the transaction rolls it back; report the original error.
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(op = op_name, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
