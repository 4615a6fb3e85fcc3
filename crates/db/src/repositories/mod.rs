use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use signoff_core::concurrency::{VersionToken, VersionedRecord};
use signoff_core::documents::{DocumentRecord, DownstreamEffect, SyncMark};
use signoff_core::domain::business::BusinessType;
use signoff_core::domain::flow::{ApprovalFlow, FlowId};
use signoff_core::domain::instance::{ApprovalInstance, Decision, InstanceId};
use signoff_core::errors::WorkflowError;

pub mod directory;
pub mod document;
pub mod effect;
pub mod flow;
pub mod instance;
pub mod memory;
pub mod sequence;
pub mod stock;
pub mod task;

pub use directory::{DirectoryUser, SqlApproverDirectory};
pub use document::SqlDocumentRepository;
pub use effect::SqlEffectRepository;
pub use flow::SqlFlowRepository;
pub use instance::SqlInstanceRepository;
pub use memory::{
    InMemoryDocumentRepository, InMemoryEffectRepository, InMemoryFlowRepository,
    InMemoryInstanceRepository, InMemorySequenceRepository, InMemoryVersionedRepository,
};
pub use sequence::SqlSequenceRepository;
pub use stock::SqlStockRepository;
pub use task::SqlTestTaskRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Turns a driver-level unique violation into [`RepositoryError::UniqueViolation`].
    pub(crate) fn classify(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                Self::UniqueViolation(db_error.message().to_owned())
            }
            _ => Self::Database(error),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}

impl From<RepositoryError> for WorkflowError {
    fn from(error: RepositoryError) -> Self {
        WorkflowError::Persistence(error.to_string())
    }
}

/// Result of the conditional commit of one decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The instance no longer matched the expected step and version.
    Stale,
}

/// What `record_decision` writes: the next instance state plus the decision,
/// applied only if the stored instance is still at `expected_step` and
/// `expected_version`.
#[derive(Clone, Debug)]
pub struct DecisionCommit<'a> {
    pub instance: &'a ApprovalInstance,
    pub decision: &'a Decision,
    pub expected_step: u32,
    pub expected_version: u32,
}

/// Result of a flow write that may be guarded by pending instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowWrite {
    Applied,
    Missing,
    /// A pending instance still runs on the flow.
    InUse,
}

#[async_trait]
pub trait FlowRepository: Send + Sync {
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<ApprovalFlow>, RepositoryError>;
    async fn find_by_code(
        &self,
        business_type: BusinessType,
        code: &str,
    ) -> Result<Option<ApprovalFlow>, RepositoryError>;
    async fn list(
        &self,
        business_type: Option<BusinessType>,
    ) -> Result<Vec<ApprovalFlow>, RepositoryError>;
    /// Fails with [`RepositoryError::UniqueViolation`] when the code is taken.
    async fn insert(&self, flow: &ApprovalFlow) -> Result<(), RepositoryError>;
    /// Replaces the flow row and its full node list. Never reports
    /// [`FlowWrite::InUse`].
    async fn save(&self, flow: &ApprovalFlow) -> Result<FlowWrite, RepositoryError>;
    /// Like [`FlowRepository::save`], but refused while any instance of the
    /// flow is pending. The check and the write are one atomic step.
    async fn save_idle(&self, flow: &ApprovalFlow) -> Result<FlowWrite, RepositoryError>;
    /// Removes the flow unless an instance of it is pending.
    async fn delete(&self, id: &FlowId) -> Result<FlowWrite, RepositoryError>;
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Fails with [`RepositoryError::UniqueViolation`] when the document
    /// already has a pending instance.
    async fn insert_pending(&self, instance: &ApprovalInstance) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &InstanceId)
        -> Result<Option<ApprovalInstance>, RepositoryError>;
    /// Creation order.
    async fn list_for_business(
        &self,
        business_type: BusinessType,
        business_id: &str,
    ) -> Result<Vec<ApprovalInstance>, RepositoryError>;
    async fn list_pending(&self) -> Result<Vec<ApprovalInstance>, RepositoryError>;
    async fn count_pending_for_flow(&self, flow_id: &FlowId) -> Result<u64, RepositoryError>;
    async fn record_decision(
        &self,
        commit: DecisionCommit<'_>,
    ) -> Result<CommitOutcome, RepositoryError>;
}

/// Result of a mark-guarded document write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncWrite {
    Applied,
    /// The stored document already reflects this or a later instance state.
    Superseded,
    Missing,
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn find(
        &self,
        business_type: BusinessType,
        id: &str,
    ) -> Result<Option<DocumentRecord>, RepositoryError>;
    /// Unconditional upsert of every column.
    async fn save(&self, document: &DocumentRecord) -> Result<(), RepositoryError>;
    /// Writes the binder fields of `document` stamped with `mark`, only if the
    /// stored mark is absent or older.
    async fn sync(
        &self,
        document: &DocumentRecord,
        mark: &SyncMark,
    ) -> Result<SyncWrite, RepositoryError>;
    async fn delete(&self, business_type: BusinessType, id: &str)
        -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait SequenceRepository: Send + Sync {
    /// Atomically bumps the `(prefix, date_key)` counter and returns the new
    /// value; the first call for a key returns 1.
    async fn increment(&self, prefix: &str, date_key: &str) -> Result<u64, RepositoryError>;
    /// Existing numbers and flow codes starting with `stem`.
    async fn count_issued(&self, stem: &str) -> Result<u64, RepositoryError>;
}

/// Storage for a record kind under the optimistic guard.
#[async_trait]
pub trait VersionedRepository<R: VersionedRecord>: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<R>, RepositoryError>;
    async fn insert(&self, record: &R) -> Result<(), RepositoryError>;
    /// Writes `record` (carrying its new version) only if the stored version
    /// still equals `expected`. Returns whether a row changed.
    async fn compare_and_swap(&self, record: &R, expected: VersionToken)
        -> Result<bool, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectRecord {
    pub id: i64,
    pub instance_id: InstanceId,
    pub effect: DownstreamEffect,
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait EffectRepository: Send + Sync {
    /// At most one row per instance and effect kind; recording again returns
    /// the existing id.
    async fn record(
        &self,
        instance_id: &InstanceId,
        effect: &DownstreamEffect,
    ) -> Result<i64, RepositoryError>;
    async fn mark_applied(&self, id: i64) -> Result<(), RepositoryError>;
    async fn list(&self, pending_only: bool) -> Result<Vec<EffectRecord>, RepositoryError>;
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp `{value}`: {e}")))
}

pub(crate) fn parse_sync_mark(value: Option<String>) -> Result<Option<SyncMark>, RepositoryError> {
    value
        .map(|raw| {
            SyncMark::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("invalid sync mark `{raw}`")))
        })
        .transpose()
}

pub(crate) fn parse_business_type(value: &str) -> Result<BusinessType, RepositoryError> {
    BusinessType::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown business type `{value}`")))
}

pub(crate) fn to_storage(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
