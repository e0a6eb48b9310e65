//! SQL schema for the finalizer store.
//!
//! The store database holds the invocation graph and the work queue side by
//! side so that a state transition and the tasks it emits commit together.

pub const INVOCATIONS_SCHEMA_VERSION: u32 = 1;

pub const DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const DB_SCHEMA_INVOCATIONS: &str = "
    CREATE TABLE IF NOT EXISTS invocations (
        id TEXT PRIMARY KEY,
        state TEXT NOT NULL CHECK (state IN ('ACTIVE', 'FINALIZING', 'FINALIZED')),
        finalize_time TEXT, -- RFC 3339, set iff state = 'FINALIZED'
        export_targets TEXT NOT NULL DEFAULT '[]', -- JSON array of {project, dataset, table}
        created_at TEXT NOT NULL
    )
";

// included_id is intentionally not a foreign key: a dangling edge must be
// observable as a data-integrity error, not rejected at write time.
pub const DB_SCHEMA_INCLUSIONS: &str = "
    CREATE TABLE IF NOT EXISTS inclusions (
        includer_id TEXT NOT NULL,
        included_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (includer_id, included_id),
        FOREIGN KEY(includer_id) REFERENCES invocations(id)
    )
";

pub const DB_INDEX_INCLUSIONS_REVERSE: &str = "
    CREATE INDEX IF NOT EXISTS idx_inclusions_included ON inclusions(included_id, includer_id)
";

pub const DB_SCHEMA_TASKS: &str = "
    CREATE TABLE IF NOT EXISTS tasks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        invocation_id TEXT NOT NULL,
        payload TEXT NOT NULL, -- JSON-encoded Task
        attempts INTEGER NOT NULL DEFAULT 0,
        not_before_ms INTEGER NOT NULL,
        lease_owner TEXT,
        lease_expires_ms INTEGER,
        last_error TEXT,
        created_at TEXT NOT NULL
    )
";

pub const DB_INDEX_TASKS_DUE: &str = "
    CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(not_before_ms, seq)
";

pub const DB_SCHEMA_DEAD_LETTERS: &str = "
    CREATE TABLE IF NOT EXISTS dead_letters (
        task_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        invocation_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        error TEXT NOT NULL,
        dead_at TEXT NOT NULL
    )
";

/// All statements needed to bring an empty database up to date, in order.
pub const DB_SCHEMA_ALL: &[&str] = &[
    DB_SCHEMA_META,
    DB_SCHEMA_INVOCATIONS,
    DB_SCHEMA_INCLUSIONS,
    DB_INDEX_INCLUSIONS_REVERSE,
    DB_SCHEMA_TASKS,
    DB_INDEX_TASKS_DUE,
    DB_SCHEMA_DEAD_LETTERS,
];
