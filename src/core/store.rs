//! Store handle for the finalizer's state.
//!
//! A `Store` is the explicit context passed into every operation: the root
//! directory, the loaded configuration and a connection factory for the
//! store database. There is no process-wide store; cloning a `Store` is cheap
//! and every clone talks to the same database file.

use crate::core::config::{self, FinalizerConfig};
use crate::core::db;
use crate::core::error::FinalizerError;
use crate::core::pool::SqlitePool;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
    pub config: FinalizerConfig,
    pool: SqlitePool,
}

impl Store {
    /// Open (and initialize if needed) the store rooted at `root`, reading
    /// `finalizer.toml` from it when present.
    pub fn open(root: &Path) -> Result<Self, FinalizerError> {
        let config = config::load_config(root)?;
        Self::open_with_config(root, config)
    }

    pub fn open_with_config(root: &Path, config: FinalizerConfig) -> Result<Self, FinalizerError> {
        fs::create_dir_all(root).map_err(FinalizerError::IoError)?;
        let db_path = root.join(&config.store.db_name);
        db::initialize_finalizer_db(
            &db_path,
            Duration::from_millis(config.store.write_busy_timeout_ms),
        )?;
        let pool = SqlitePool::new(db_path, &config.store);
        Ok(Self {
            root: root.to_path_buf(),
            config,
            pool,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }
}
