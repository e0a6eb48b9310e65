use crate::core::error::FinalizerError;
use crate::core::schemas;
use rusqlite::{Connection, params};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Open a connection with the pragmas every finalizer connection relies on.
pub fn db_connect(db_path: &Path, busy_timeout: Duration) -> Result<Connection, FinalizerError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)
        .map_err(FinalizerError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(FinalizerError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(FinalizerError::RusqliteError)?;
    Ok(conn)
}

/// Create the schema if needed and stamp the schema version.
pub fn initialize_finalizer_db(db_path: &Path, busy_timeout: Duration) -> Result<(), FinalizerError> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(FinalizerError::IoError)?;
    }

    let conn = db_connect(db_path, busy_timeout)?;
    for statement in schemas::DB_SCHEMA_ALL {
        conn.execute(statement, [])?;
    }
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params![
            "schema_version",
            schemas::INVOCATIONS_SCHEMA_VERSION.to_string()
        ],
    )?;
    tracing::debug!(db = %db_path.display(), "finalizer database initialized");
    Ok(())
}
