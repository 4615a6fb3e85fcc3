//! Optimistic-concurrency primitives shared by every guarded record.
//!
//! A record's version token is its last-modified timestamp. Writers present
//! the token they read; storage applies the write only when the stored token
//! still matches, and installs a strictly newer token in the same statement.

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionToken(DateTime<Utc>);

impl VersionToken {
    /// Truncated to microseconds so the token survives a storage round trip.
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self(value.trunc_subsecs(6))
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// A token strictly newer than `self`, even if the clock has not moved.
    pub fn next_after(&self, now: DateTime<Utc>) -> Self {
        let candidate = Self::from_datetime(now);
        if candidate > *self {
            candidate
        } else {
            Self(self.0 + Duration::microseconds(1))
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn to_storage(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn parse(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value.trim())
            .ok()
            .map(|timestamp| Self::from_datetime(timestamp.with_timezone(&Utc)))
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_storage())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    StockItem,
    TestTask,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StockItem => "stock_item",
            Self::TestTask => "test_task",
        }
    }
}

/// A shared mutable record whose writes go through the optimistic guard.
pub trait VersionedRecord: Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn record_id(&self) -> &str;
    fn version(&self) -> VersionToken;
    fn set_version(&mut self, version: VersionToken);

    /// Recomputes fields derived from the business fields before a write.
    fn refresh_derived(&mut self) {}
}

pub fn version_conflict<R: VersionedRecord>(id: &str, expected: &VersionToken) -> WorkflowError {
    WorkflowError::VersionConflict {
        kind: R::KIND.as_str().to_owned(),
        id: id.to_owned(),
        expected: expected.to_storage(),
    }
}

pub fn record_not_found<R: VersionedRecord>(id: &str) -> WorkflowError {
    WorkflowError::RecordNotFound { kind: R::KIND.as_str().to_owned(), id: id.to_owned() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::VersionToken;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[test]
    fn token_survives_storage_round_trip() {
        let token = VersionToken::now();
        assert_eq!(VersionToken::parse(&token.to_storage()), Some(token));
    }

    #[test]
    fn next_after_is_strictly_newer_when_clock_stalls() {
        let token = VersionToken::from_datetime(ts("2026-03-01T08:00:00.000001Z"));
        let same_instant = token.next_after(ts("2026-03-01T08:00:00.000001Z"));
        let earlier_clock = token.next_after(ts("2026-03-01T07:59:59Z"));

        assert!(same_instant > token);
        assert!(earlier_clock > token);
        assert_eq!(same_instant.to_storage(), "2026-03-01T08:00:00.000002Z");
    }

    #[test]
    fn next_after_uses_the_clock_when_it_moved_forward() {
        let token = VersionToken::from_datetime(ts("2026-03-01T08:00:00Z"));
        let next = token.next_after(ts("2026-03-01T08:00:05.123456789Z"));
        assert_eq!(next.to_storage(), "2026-03-01T08:00:05.123456Z");
    }
}
