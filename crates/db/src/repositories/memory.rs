use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use signoff_core::concurrency::{VersionToken, VersionedRecord};
use signoff_core::documents::{DocumentRecord, DownstreamEffect, SyncMark};
use signoff_core::domain::business::BusinessType;
use signoff_core::domain::flow::{ApprovalFlow, FlowId};
use signoff_core::domain::instance::{ApprovalInstance, InstanceId, StepPosition};

use super::{
    CommitOutcome, DecisionCommit, DocumentRepository, EffectRecord, EffectRepository,
    FlowRepository, FlowWrite, InstanceRepository, RepositoryError, SequenceRepository, SyncWrite,
    VersionedRepository,
};

/// Flow definitions. When built with [`InMemoryFlowRepository::tracking`],
/// guarded writes consult the instance store while holding the flow lock.
#[derive(Default)]
pub struct InMemoryFlowRepository {
    flows: RwLock<HashMap<String, ApprovalFlow>>,
    instances: Option<Arc<InMemoryInstanceRepository>>,
}

impl InMemoryFlowRepository {
    pub fn tracking(instances: Arc<InMemoryInstanceRepository>) -> Self {
        Self { flows: RwLock::default(), instances: Some(instances) }
    }

    async fn in_use(&self, id: &FlowId) -> Result<bool, RepositoryError> {
        match &self.instances {
            Some(instances) => Ok(instances.count_pending_for_flow(id).await? > 0),
            None => Ok(false),
        }
    }

    async fn replace(
        &self,
        flow: &ApprovalFlow,
        idle_only: bool,
    ) -> Result<FlowWrite, RepositoryError> {
        let mut flows = self.flows.write().await;
        if !flows.contains_key(&flow.id.0) {
            return Ok(FlowWrite::Missing);
        }
        if idle_only && self.in_use(&flow.id).await? {
            return Ok(FlowWrite::InUse);
        }
        if flows.values().any(|existing| existing.code == flow.code && existing.id != flow.id) {
            return Err(RepositoryError::UniqueViolation(format!(
                "approval_flow.code `{}`",
                flow.code
            )));
        }
        flows.insert(flow.id.0.clone(), flow.clone());
        Ok(FlowWrite::Applied)
    }
}

#[async_trait::async_trait]
impl FlowRepository for InMemoryFlowRepository {
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let flows = self.flows.read().await;
        Ok(flows.get(&id.0).cloned())
    }

    async fn find_by_code(
        &self,
        business_type: BusinessType,
        code: &str,
    ) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let flows = self.flows.read().await;
        Ok(flows
            .values()
            .find(|flow| flow.business_type == business_type && flow.code == code)
            .cloned())
    }

    async fn list(
        &self,
        business_type: Option<BusinessType>,
    ) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let flows = self.flows.read().await;
        let mut listed: Vec<ApprovalFlow> = flows
            .values()
            .filter(|flow| business_type.map_or(true, |wanted| flow.business_type == wanted))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.code.cmp(&b.code)));
        Ok(listed)
    }

    async fn insert(&self, flow: &ApprovalFlow) -> Result<(), RepositoryError> {
        let mut flows = self.flows.write().await;
        if flows.values().any(|existing| existing.code == flow.code) {
            return Err(RepositoryError::UniqueViolation(format!(
                "approval_flow.code `{}`",
                flow.code
            )));
        }
        flows.insert(flow.id.0.clone(), flow.clone());
        Ok(())
    }

    async fn save(&self, flow: &ApprovalFlow) -> Result<FlowWrite, RepositoryError> {
        self.replace(flow, false).await
    }

    async fn save_idle(&self, flow: &ApprovalFlow) -> Result<FlowWrite, RepositoryError> {
        self.replace(flow, true).await
    }

    async fn delete(&self, id: &FlowId) -> Result<FlowWrite, RepositoryError> {
        let mut flows = self.flows.write().await;
        if !flows.contains_key(&id.0) {
            return Ok(FlowWrite::Missing);
        }
        if self.in_use(id).await? {
            return Ok(FlowWrite::InUse);
        }
        flows.remove(&id.0);
        Ok(FlowWrite::Applied)
    }
}

/// Instances in creation order. The write lock stands in for the partial
/// unique index and the conditional update of the SQL store.
#[derive(Default)]
pub struct InMemoryInstanceRepository {
    instances: RwLock<Vec<ApprovalInstance>>,
}

#[async_trait::async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn insert_pending(&self, instance: &ApprovalInstance) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        if instances.iter().any(|existing| {
            existing.is_pending()
                && existing.business_type == instance.business_type
                && existing.business_id == instance.business_id
        }) {
            return Err(RepositoryError::UniqueViolation(format!(
                "pending instance for {} `{}`",
                instance.business_type, instance.business_id
            )));
        }
        instances.push(instance.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &InstanceId,
    ) -> Result<Option<ApprovalInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances.iter().find(|instance| &instance.id == id).cloned())
    }

    async fn list_for_business(
        &self,
        business_type: BusinessType,
        business_id: &str,
    ) -> Result<Vec<ApprovalInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances
            .iter()
            .filter(|instance| {
                instance.business_type == business_type && instance.business_id == business_id
            })
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances.iter().filter(|instance| instance.is_pending()).cloned().collect())
    }

    async fn count_pending_for_flow(&self, flow_id: &FlowId) -> Result<u64, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances
            .iter()
            .filter(|instance| instance.is_pending() && &instance.flow_id == flow_id)
            .count() as u64)
    }

    async fn record_decision(
        &self,
        commit: DecisionCommit<'_>,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut instances = self.instances.write().await;
        let Some(stored) =
            instances.iter_mut().find(|instance| instance.id == commit.instance.id)
        else {
            return Ok(CommitOutcome::Stale);
        };

        let still_current = stored.is_pending()
            && stored.current_step == StepPosition::At(commit.expected_step)
            && stored.version == commit.expected_version
            && !stored
                .decisions
                .iter()
                .any(|decision| decision.step_order == commit.decision.step_order);
        if !still_current {
            return Ok(CommitOutcome::Stale);
        }

        let mut next = commit.instance.clone();
        next.decisions = stored.decisions.clone();
        next.decisions.push(commit.decision.clone());
        *stored = next;
        Ok(CommitOutcome::Committed)
    }
}

#[derive(Default)]
pub struct InMemoryDocumentRepository {
    documents: RwLock<HashMap<(BusinessType, String), DocumentRecord>>,
}

#[async_trait::async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn find(
        &self,
        business_type: BusinessType,
        id: &str,
    ) -> Result<Option<DocumentRecord>, RepositoryError> {
        let documents = self.documents.read().await;
        Ok(documents.get(&(business_type, id.to_owned())).cloned())
    }

    async fn save(&self, document: &DocumentRecord) -> Result<(), RepositoryError> {
        let mut documents = self.documents.write().await;
        documents.insert((document.business_type, document.id.clone()), document.clone());
        Ok(())
    }

    async fn sync(
        &self,
        document: &DocumentRecord,
        mark: &SyncMark,
    ) -> Result<SyncWrite, RepositoryError> {
        let mut documents = self.documents.write().await;
        let Some(stored) = documents.get_mut(&(document.business_type, document.id.clone())) else {
            return Ok(SyncWrite::Missing);
        };
        if stored.synced.as_ref().is_some_and(|current| current >= mark) {
            return Ok(SyncWrite::Superseded);
        }
        stored.status = document.status.clone();
        stored.current_approval_instance_id = document.current_approval_instance_id.clone();
        stored.last_reject_reason = document.last_reject_reason.clone();
        stored.updated_at = document.updated_at;
        stored.synced = Some(mark.clone());
        Ok(SyncWrite::Applied)
    }

    async fn delete(
        &self,
        business_type: BusinessType,
        id: &str,
    ) -> Result<bool, RepositoryError> {
        let mut documents = self.documents.write().await;
        Ok(documents.remove(&(business_type, id.to_owned())).is_some())
    }
}

#[derive(Default)]
pub struct InMemorySequenceRepository {
    counters: RwLock<HashMap<(String, String), u64>>,
    issued: RwLock<Vec<String>>,
    unavailable: bool,
}

impl InMemorySequenceRepository {
    /// A counter store whose atomic path always fails.
    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }

    /// Registers an existing number for [`SequenceRepository::count_issued`].
    pub async fn record_issued(&self, number: impl Into<String>) {
        self.issued.write().await.push(number.into());
    }
}

#[async_trait::async_trait]
impl SequenceRepository for InMemorySequenceRepository {
    async fn increment(&self, prefix: &str, date_key: &str) -> Result<u64, RepositoryError> {
        if self.unavailable {
            return Err(RepositoryError::Unavailable("sequence counter store offline".to_owned()));
        }
        let mut counters = self.counters.write().await;
        let counter = counters.entry((prefix.to_owned(), date_key.to_owned())).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn count_issued(&self, stem: &str) -> Result<u64, RepositoryError> {
        let issued = self.issued.read().await;
        Ok(issued.iter().filter(|number| number.starts_with(stem)).count() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryEffectRepository {
    effects: RwLock<Vec<EffectRecord>>,
}

#[async_trait::async_trait]
impl EffectRepository for InMemoryEffectRepository {
    async fn record(
        &self,
        instance_id: &InstanceId,
        effect: &DownstreamEffect,
    ) -> Result<i64, RepositoryError> {
        let mut effects = self.effects.write().await;
        if let Some(existing) = effects.iter().find(|record| {
            &record.instance_id == instance_id && record.effect.kind() == effect.kind()
        }) {
            return Ok(existing.id);
        }
        let id = effects.len() as i64 + 1;
        effects.push(EffectRecord {
            id,
            instance_id: instance_id.clone(),
            effect: effect.clone(),
            applied: false,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn mark_applied(&self, id: i64) -> Result<(), RepositoryError> {
        let mut effects = self.effects.write().await;
        if let Some(record) = effects.iter_mut().find(|record| record.id == id) {
            record.applied = true;
        }
        Ok(())
    }

    async fn list(&self, pending_only: bool) -> Result<Vec<EffectRecord>, RepositoryError> {
        let effects = self.effects.read().await;
        Ok(effects.iter().filter(|record| !pending_only || !record.applied).cloned().collect())
    }
}

pub struct InMemoryVersionedRepository<R> {
    records: RwLock<HashMap<String, R>>,
    _kind: PhantomData<fn() -> R>,
}

impl<R> Default for InMemoryVersionedRepository<R> {
    fn default() -> Self {
        Self { records: RwLock::new(HashMap::new()), _kind: PhantomData }
    }
}

#[async_trait::async_trait]
impl<R: VersionedRecord> VersionedRepository<R> for InMemoryVersionedRepository<R> {
    async fn find(&self, id: &str) -> Result<Option<R>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn insert(&self, record: &R) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if records.contains_key(record.record_id()) {
            return Err(RepositoryError::UniqueViolation(format!(
                "{} `{}`",
                R::KIND.as_str(),
                record.record_id()
            )));
        }
        records.insert(record.record_id().to_owned(), record.clone());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        record: &R,
        expected: VersionToken,
    ) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        match records.get_mut(record.record_id()) {
            Some(stored) if stored.version() == expected => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use signoff_core::approvals::{ApprovalEngine, Submission};
    use signoff_core::documents::DownstreamEffect;
    use signoff_core::domain::business::BusinessType;
    use signoff_core::domain::flow::{ApprovalFlow, NewApprovalFlow, NodeDraft, NodeTarget};
    use signoff_core::domain::instance::InstanceId;
    use signoff_core::domain::stock::StockItem;

    use crate::repositories::{
        EffectRepository, FlowRepository, FlowWrite, InMemoryEffectRepository,
        InMemoryFlowRepository, InMemoryInstanceRepository, InMemorySequenceRepository,
        InMemoryVersionedRepository, InstanceRepository, SequenceRepository, VersionedRepository,
    };

    fn flow(code: &str) -> ApprovalFlow {
        ApprovalFlow::create(
            NewApprovalFlow {
                name: "Consultation".to_owned(),
                code: None,
                business_type: BusinessType::ConsultationAssessment,
                description: String::new(),
                enabled: true,
                nodes: vec![NodeDraft::new(
                    "Evaluate",
                    NodeTarget::Role("evaluator".to_owned()),
                    "Evaluator",
                )],
            },
            code.to_owned(),
            Utc::now(),
        )
        .expect("flow")
    }

    #[tokio::test]
    async fn in_memory_flow_codes_are_unique() {
        let repo = InMemoryFlowRepository::default();
        repo.insert(&flow("CS_STD")).await.expect("insert");
        let error = repo.insert(&flow("CS_STD")).await.expect_err("duplicate");
        assert!(error.is_unique_violation());
        let listed = repo.list(Some(BusinessType::ConsultationAssessment)).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert!(repo.list(Some(BusinessType::Report)).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn unavailable_sequence_store_still_counts_issued_numbers() {
        let repo = InMemorySequenceRepository::unavailable();
        repo.record_issued("QT20260301001").await;
        assert!(repo.increment("QT", "20260301").await.is_err());
        assert_eq!(repo.count_issued("QT20260301").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn versioned_store_refuses_stale_swap() {
        let repo = InMemoryVersionedRepository::<StockItem>::default();
        let item = StockItem::new("STK-1", "Ethanol", "L", Decimal::new(10, 0), Decimal::new(2, 0));
        repo.insert(&item).await.expect("insert");

        let mut next = item.clone();
        next.version = item.version.next_after(Utc::now());
        assert!(repo.compare_and_swap(&next, item.version).await.expect("swap"));
        assert!(!repo.compare_and_swap(&next, item.version).await.expect("stale"));
    }

    #[tokio::test]
    async fn tracking_flow_store_refuses_writes_while_instances_pend() {
        let instances = Arc::new(InMemoryInstanceRepository::default());
        let repo = InMemoryFlowRepository::tracking(instances.clone());
        let flow = flow("CS_STD");
        repo.insert(&flow).await.expect("insert");

        let submission = Submission {
            business_type: BusinessType::ConsultationAssessment,
            business_id: "cs-1".to_owned(),
            flow_code: "CS_STD".to_owned(),
            submitter_id: "u-1".to_owned(),
            submitter_name: "Submitter".to_owned(),
        };
        let instance = ApprovalEngine::new().start(&flow, &submission, Utc::now()).expect("start");
        instances.insert_pending(&instance).await.expect("pending");

        assert_eq!(repo.delete(&flow.id).await.expect("delete"), FlowWrite::InUse);
        assert_eq!(repo.save_idle(&flow).await.expect("save"), FlowWrite::InUse);
        assert_eq!(repo.save(&flow).await.expect("save"), FlowWrite::Applied);

        let untracked = InMemoryFlowRepository::default();
        untracked.insert(&flow).await.expect("insert");
        assert_eq!(untracked.delete(&flow.id).await.expect("delete"), FlowWrite::Applied);
        assert_eq!(untracked.delete(&flow.id).await.expect("delete"), FlowWrite::Missing);
    }

    #[tokio::test]
    async fn in_memory_effects_are_recorded_once_per_kind() {
        let repo = InMemoryEffectRepository::default();
        let instance = InstanceId("inst-1".to_owned());
        let effect = DownstreamEffect::PublishReport { report_id: "r-1".to_owned() };

        let first = repo.record(&instance, &effect).await.expect("record");
        assert_eq!(repo.record(&instance, &effect).await.expect("replay"), first);
        assert_eq!(repo.list(true).await.expect("pending").len(), 1);
    }
}
