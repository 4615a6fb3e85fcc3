use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use signoff_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use signoff_core::concurrency::{
    record_not_found, version_conflict, RetryPolicy, VersionToken, VersionedRecord,
};
use signoff_core::domain::stock::{NewStockItem, StockItem};
use signoff_core::errors::WorkflowError;

use crate::repositories::VersionedRepository;

/// Compare-and-swap updates for shared records.
///
/// Every write presents the version token it was computed against and
/// installs a strictly newer one in the same conditional statement.
pub struct OptimisticGuard<R: VersionedRecord> {
    repository: Arc<dyn VersionedRepository<R>>,
    retry: RetryPolicy,
    audit: Arc<dyn AuditSink>,
}

impl<R: VersionedRecord> Clone for OptimisticGuard<R> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            retry: self.retry,
            audit: self.audit.clone(),
        }
    }
}

impl<R: VersionedRecord> OptimisticGuard<R> {
    pub fn new(repository: Arc<dyn VersionedRepository<R>>) -> Self {
        Self { repository, retry: RetryPolicy::default(), audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub async fn get(&self, id: &str) -> Result<R, WorkflowError> {
        self.repository.find(id).await?.ok_or_else(|| record_not_found::<R>(id))
    }

    pub async fn insert(&self, record: &R) -> Result<(), WorkflowError> {
        Ok(self.repository.insert(record).await?)
    }

    /// Read-check-write: applies `mutation` only if the stored version is
    /// still `expected`.
    pub async fn guarded_update<F>(
        &self,
        id: &str,
        expected: VersionToken,
        mutation: F,
    ) -> Result<R, WorkflowError>
    where
        F: FnOnce(&mut R) -> Result<(), WorkflowError>,
    {
        let current = self.get(id).await?;
        if current.version() != expected {
            self.conflict(id, &expected, "stale_read");
            return Err(version_conflict::<R>(id, &expected));
        }

        let next = self.prepare(current, mutation)?;
        if !self.repository.compare_and_swap(&next, expected).await? {
            self.conflict(id, &expected, "lost_write");
            return Err(version_conflict::<R>(id, &expected));
        }

        self.committed(&next, 1);
        Ok(next)
    }

    /// Reloads and reapplies `mutation` after each conflict, up to the
    /// policy's retry budget.
    pub async fn update_with_retry<F>(&self, id: &str, mut mutation: F) -> Result<R, WorkflowError>
    where
        F: FnMut(&mut R) -> Result<(), WorkflowError>,
    {
        let attempts = self.retry.max_retries + 1;
        for attempt in 1..=attempts {
            let current = self.get(id).await?;
            let expected = current.version();
            let next = self.prepare(current, &mut mutation)?;

            if self.repository.compare_and_swap(&next, expected).await? {
                self.committed(&next, attempt);
                return Ok(next);
            }
            warn!(
                event_name = "concurrency.update.retry",
                correlation_id = "guard",
                record_kind = R::KIND.as_str(),
                record_id = %id,
                attempt,
                "conditional write lost, reloading"
            );
        }

        self.audit.emit(
            AuditEvent::new(
                None,
                "guard",
                "concurrency.update.exhausted",
                AuditCategory::Concurrency,
                "system",
                AuditOutcome::Failed,
            )
            .with_metadata("record_kind", R::KIND.as_str())
            .with_metadata("record_id", id)
            .with_metadata("attempts", attempts.to_string()),
        );
        Err(WorkflowError::RetriesExhausted {
            kind: R::KIND.as_str().to_owned(),
            id: id.to_owned(),
            attempts,
        })
    }

    fn prepare<F>(&self, current: R, mutation: F) -> Result<R, WorkflowError>
    where
        F: FnOnce(&mut R) -> Result<(), WorkflowError>,
    {
        let mut next = current.clone();
        mutation(&mut next)?;
        next.refresh_derived();
        next.set_version(current.version().next_after(Utc::now()));
        Ok(next)
    }

    fn committed(&self, record: &R, attempt: u32) {
        info!(
            event_name = "concurrency.update.committed",
            correlation_id = "guard",
            record_kind = R::KIND.as_str(),
            record_id = %record.record_id(),
            version = %record.version(),
            attempt,
            "guarded update committed"
        );
    }

    fn conflict(&self, id: &str, expected: &VersionToken, reason: &str) {
        self.audit.emit(
            AuditEvent::new(
                None,
                "guard",
                "concurrency.update.conflict",
                AuditCategory::Concurrency,
                "system",
                AuditOutcome::Rejected,
            )
            .with_metadata("record_kind", R::KIND.as_str())
            .with_metadata("record_id", id)
            .with_metadata("expected_version", expected.to_storage())
            .with_metadata("reason", reason),
        );
    }
}

impl OptimisticGuard<StockItem> {
    /// Stores a new item, using `default_threshold` when the registration
    /// names none.
    pub async fn register_stock(
        &self,
        registration: NewStockItem,
        default_threshold: Decimal,
    ) -> Result<StockItem, WorkflowError> {
        let item = registration.into_item(default_threshold)?;
        self.repository.insert(&item).await.map_err(|error| {
            if error.is_unique_violation() {
                let message = format!("stock item `{}` already exists", item.id);
                WorkflowError::invalid_input("id", message)
            } else {
                error.into()
            }
        })?;
        info!(
            event_name = "stock.item.registered",
            correlation_id = "guard",
            record_id = %item.id,
            low_stock_threshold = %item.low_stock_threshold,
            status = item.status.as_str(),
            "stock item registered"
        );
        Ok(item)
    }

    /// Applies `delta` to the on-hand quantity. The result may not drop below
    /// zero; the stock status is recomputed in the same write.
    pub async fn adjust_stock(
        &self,
        id: &str,
        delta: Decimal,
        expected: VersionToken,
    ) -> Result<StockItem, WorkflowError> {
        self.guarded_update(id, expected, |item| item.adjust(delta)).await
    }
}
