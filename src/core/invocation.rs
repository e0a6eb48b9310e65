//! Invocation data model.
//!
//! An invocation moves through `ACTIVE → FINALIZING → FINALIZED` and never
//! back. `finalize_time` is present exactly when the state is `FINALIZED`.

use crate::core::error::FinalizerError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static INVOCATION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_\-:.]{0,99}$").expect("invocation id pattern is valid")
});

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationState {
    Active,
    Finalizing,
    Finalized,
}

impl InvocationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationState::Active => "ACTIVE",
            InvocationState::Finalizing => "FINALIZING",
            InvocationState::Finalized => "FINALIZED",
        }
    }

    pub fn parse(id: &str, raw: &str) -> Result<Self, FinalizerError> {
        match raw {
            "ACTIVE" => Ok(InvocationState::Active),
            "FINALIZING" => Ok(InvocationState::Finalizing),
            "FINALIZED" => Ok(InvocationState::Finalized),
            other => Err(FinalizerError::CorruptRecord {
                id: id.to_string(),
                detail: format!("unknown state {other:?}"),
            }),
        }
    }

    /// Only `ACTIVE` invocations hold back the ones that include them.
    pub fn blocks_includers(&self) -> bool {
        matches!(self, InvocationState::Active)
    }
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A BigQuery destination a finalized invocation is exported to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct ExportTarget {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl ExportTarget {
    pub fn new(project: &str, dataset: &str, table: &str) -> Self {
        Self {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), FinalizerError> {
        for (field, value) in [
            ("project", &self.project),
            ("dataset", &self.dataset),
            ("table", &self.table),
        ] {
            if value.trim().is_empty() {
                return Err(FinalizerError::ValidationError(format!(
                    "export target: {field} is unspecified"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ExportTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl std::str::FromStr for ExportTarget {
    type Err = FinalizerError;

    /// Parses `project.dataset.table`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        let [project, dataset, table] = parts.as_slice() else {
            return Err(FinalizerError::ValidationError(format!(
                "export target {s:?}: expected project.dataset.table"
            )));
        };
        let target = ExportTarget::new(project, dataset, table);
        target.validate()?;
        Ok(target)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub id: String,
    pub state: InvocationState,
    pub finalize_time: Option<DateTime<Utc>>,
    /// Directly included invocation ids, sorted.
    pub inclusions: Vec<String>,
    pub export_targets: Vec<ExportTarget>,
}

/// A direct includer of some invocation, with its state at read time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub id: String,
    pub state: InvocationState,
}

pub fn validate_invocation_id(id: &str) -> Result<(), FinalizerError> {
    if id.is_empty() {
        return Err(FinalizerError::ValidationError(
            "invocation id is unspecified".to_string(),
        ));
    }
    if !INVOCATION_ID_RE.is_match(id) {
        return Err(FinalizerError::ValidationError(format!(
            "invocation id {id:?} does not match {}",
            INVOCATION_ID_RE.as_str()
        )));
    }
    Ok(())
}
