//! Export sinks for `ExportInvocationToBq` tasks.
//!
//! Moving rows into BigQuery is outside this crate. A sink receives one
//! request per (invocation, target) and must tolerate seeing the same request
//! more than once.

use crate::core::error::FinalizerError;
use crate::core::invocation::ExportTarget;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const EXPORTS_LOG_NAME: &str = "exports.jsonl";

pub trait ExportSink: Send + Sync {
    fn export(&self, invocation_id: &str, target: &ExportTarget) -> Result<(), FinalizerError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub ts: String,
    pub invocation_id: String,
    pub bq_export: ExportTarget,
}

/// Appends one JSON line per export request to `exports.jsonl`.
pub struct JsonlExportSink {
    path: PathBuf,
    // Serializes appends from worker threads so lines never interleave.
    write_lock: Mutex<()>,
}

impl JsonlExportSink {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(EXPORTS_LOG_NAME),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ExportSink for JsonlExportSink {
    fn export(&self, invocation_id: &str, target: &ExportTarget) -> Result<(), FinalizerError> {
        let request = ExportRequest {
            ts: time::to_rfc3339(&time::now()),
            invocation_id: invocation_id.to_string(),
            bq_export: target.clone(),
        };
        let line = serde_json::to_string(&request)?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| FinalizerError::ExportError("export log lock poisoned".to_string()))?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(FinalizerError::IoError)?;
        writeln!(f, "{}", line).map_err(FinalizerError::IoError)?;
        Ok(())
    }
}

pub fn read_export_log(path: &Path) -> Result<Vec<ExportRequest>, FinalizerError> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = std::fs::read_to_string(path).map_err(FinalizerError::IoError)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(FinalizerError::SerdeError))
        .collect()
}
