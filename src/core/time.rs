//! Shared timestamp and id helpers.

use crate::core::error::FinalizerError;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use ulid::Ulid;

/// Current time at the precision timestamps are persisted with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Milliseconds since the unix epoch, the unit used for queue scheduling.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Persisted form of a timestamp: RFC 3339 with microseconds, `Z` suffix.
pub fn to_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_rfc3339(id: &str, raw: &str) -> Result<DateTime<Utc>, FinalizerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| FinalizerError::CorruptRecord {
            id: id.to_string(),
            detail: format!("bad timestamp {raw:?}: {e}"),
        })
}

pub fn new_task_id() -> String {
    Ulid::new().to_string()
}
