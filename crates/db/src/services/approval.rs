use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use signoff_core::approvals::{
    Action, ApprovalEngine, NodeResolver, ResolutionContext, Submission, Transition,
};
use signoff_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use signoff_core::documents::{BinderRegistry, DocumentRecord, DownstreamEffect, SyncMark};
use signoff_core::domain::business::BusinessType;
use signoff_core::domain::flow::{ApprovalFlow, ApprovalNode, FlowId};
use signoff_core::domain::identity::ApproverIdentity;
use signoff_core::domain::instance::{ApprovalInstance, InstanceId};
use signoff_core::errors::{ErrorKind, WorkflowError};

use super::{DownstreamHook, OutboxDownstreamHook, Stores};
use crate::repositories::{CommitOutcome, DecisionCommit, SyncWrite};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActResult {
    pub instance: ApprovalInstance,
    pub transition: Transition,
}

/// Runs submissions and decisions against stored flows, instances and
/// documents.
///
/// The instance commit is the source of truth. The document is derived from
/// the committed instance and written with a [`SyncMark`], so a late write
/// for an earlier step never lands over a later one. When that write fails
/// the call reports [`WorkflowError::DocumentOutOfSync`]; the next submission
/// for the document, or [`ApprovalService::resync`], derives it again.
#[derive(Clone)]
pub struct ApprovalService {
    stores: Stores,
    resolver: Arc<dyn NodeResolver>,
    binders: BinderRegistry,
    hook: Arc<dyn DownstreamHook>,
    audit: Arc<dyn AuditSink>,
    engine: ApprovalEngine,
}

impl ApprovalService {
    pub fn new(stores: Stores, resolver: Arc<dyn NodeResolver>) -> Self {
        let hook = Arc::new(OutboxDownstreamHook::new(
            stores.effects.clone(),
            stores.documents.clone(),
        ));
        Self {
            stores,
            resolver,
            binders: BinderRegistry::standard(),
            hook,
            audit: Arc::new(NoopAuditSink),
            engine: ApprovalEngine::new(),
        }
    }

    pub fn with_binders(mut self, binders: BinderRegistry) -> Self {
        self.binders = binders;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn DownstreamHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub async fn submit(
        &self,
        submission: &Submission,
        correlation_id: &str,
    ) -> Result<ApprovalInstance, WorkflowError> {
        let business_type = submission.business_type;
        let flow = self
            .stores
            .flows
            .find_by_code(business_type, &submission.flow_code)
            .await?
            .ok_or_else(|| WorkflowError::FlowNotFound {
                business_type: business_type.as_str().to_owned(),
                code: submission.flow_code.clone(),
            })?;
        self.engine.ensure_submittable(&flow)?;

        let existing =
            self.reconcile(business_type, &submission.business_id, correlation_id).await?;
        if existing.iter().any(ApprovalInstance::is_pending) {
            return Err(already_pending(submission));
        }

        let binder = self.binders.get(business_type)?;
        let document = self
            .stores
            .documents
            .find(business_type, &submission.business_id)
            .await?
            .ok_or_else(|| WorkflowError::DocumentNotFound {
                business_type: business_type.as_str().to_owned(),
                business_id: submission.business_id.clone(),
            })?;
        if let Err(refusal) = binder.can_submit(&document) {
            // A submission that won a race leaves the document pending.
            let current = self
                .stores
                .instances
                .list_for_business(business_type, &submission.business_id)
                .await?;
            if current.iter().any(ApprovalInstance::is_pending) {
                return Err(already_pending(submission));
            }
            return Err(refusal);
        }

        let instance = self.engine.start(&flow, submission, Utc::now())?;
        let first = self.engine.current_node(&instance, &flow)?;
        // A step nobody can act on would strand the document.
        self.resolver.resolve(first, &context(&instance)).await?;

        self.stores.instances.insert_pending(&instance).await.map_err(|error| {
            if error.is_unique_violation() {
                already_pending(submission)
            } else {
                error.into()
            }
        })?;

        info!(
            event_name = "approval.instance.submitted",
            correlation_id = %correlation_id,
            business_type = %business_type,
            business_id = %instance.business_id,
            instance_id = %instance.id.0,
            flow_code = %flow.code,
            "approval instance submitted"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(instance.business_ref()),
                correlation_id,
                "approval.instance.submitted",
                AuditCategory::Approval,
                instance.submitter_id.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("instance_id", instance.id.0.clone())
            .with_metadata("flow_code", flow.code.clone()),
        );

        self.follow(&instance, Some(&flow), correlation_id).await?;
        Ok(instance)
    }

    pub async fn act(
        &self,
        action: &Action,
        correlation_id: &str,
    ) -> Result<ActResult, WorkflowError> {
        let instance = self.get_instance(&action.instance_id).await?;
        self.engine.precheck(&instance, action.action, action.comment.as_deref())?;

        let flow = self.load_flow(&instance.flow_id).await?;
        let node = self.engine.current_node(&instance, &flow)?;
        let approvers = self.resolver.resolve(node, &context(&instance)).await?;

        let outcome = match self.engine.apply(&instance, &flow, &approvers, action, Utc::now()) {
            Ok(outcome) => outcome,
            Err(error) => {
                if error.kind() != ErrorKind::Authorization {
                    return Err(error);
                }
                let error = self.explain_refusal(&instance, &flow, &action.actor_id, error).await;
                self.refused(&instance, action, correlation_id, &error);
                return Err(error);
            }
        };

        let committed = self
            .stores
            .instances
            .record_decision(DecisionCommit {
                instance: &outcome.instance,
                decision: &outcome.decision,
                expected_step: outcome.expected_step,
                expected_version: outcome.expected_version,
            })
            .await?;
        if committed == CommitOutcome::Stale {
            let error = self.stale_error(&instance, outcome.expected_step).await?;
            self.refused(&instance, action, correlation_id, &error);
            return Err(error);
        }

        let next = outcome.instance;
        let event_type = match outcome.transition {
            Transition::Advanced { .. } => "approval.instance.advanced",
            Transition::Approved { .. } => "approval.instance.approved",
            Transition::Rejected { .. } => "approval.instance.rejected",
        };
        info!(
            event_name = event_type,
            correlation_id = %correlation_id,
            business_type = %next.business_type,
            business_id = %next.business_id,
            instance_id = %next.id.0,
            actor_id = %action.actor_id,
            step = outcome.expected_step,
            "approval decision recorded"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(next.business_ref()),
                correlation_id,
                event_type,
                AuditCategory::Approval,
                action.actor_id.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("instance_id", next.id.0.clone())
            .with_metadata("step", outcome.expected_step.to_string())
            .with_metadata("action", action.action.as_str()),
        );

        if let Transition::Advanced { to_step, .. } = outcome.transition {
            if let Some(node) = flow.node_at(to_step) {
                self.announce_step(&next, node, correlation_id).await;
            }
        }
        self.follow(&next, Some(&flow), correlation_id).await?;

        Ok(ActResult { instance: next, transition: outcome.transition })
    }

    /// Derives the document from its latest approval instance if an earlier
    /// write did not land, then returns the stored document.
    pub async fn resync(
        &self,
        business_type: BusinessType,
        business_id: &str,
        correlation_id: &str,
    ) -> Result<DocumentRecord, WorkflowError> {
        self.reconcile(business_type, business_id, correlation_id).await?;
        self.stores.documents.find(business_type, business_id).await?.ok_or_else(|| {
            WorkflowError::DocumentNotFound {
                business_type: business_type.as_str().to_owned(),
                business_id: business_id.to_owned(),
            }
        })
    }

    /// Every instance for one document, oldest first.
    pub async fn instances_for(
        &self,
        business_type: BusinessType,
        business_id: &str,
    ) -> Result<Vec<ApprovalInstance>, WorkflowError> {
        Ok(self.stores.instances.list_for_business(business_type, business_id).await?)
    }

    pub async fn get_instance(&self, id: &InstanceId) -> Result<ApprovalInstance, WorkflowError> {
        self.stores
            .instances
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(id.0.clone()))
    }

    /// Pending instances whose current step resolves to `actor_id`.
    /// Instances whose step cannot currently be resolved are skipped.
    pub async fn pending_for_approver(
        &self,
        actor_id: &str,
    ) -> Result<Vec<ApprovalInstance>, WorkflowError> {
        let mut flows: HashMap<String, ApprovalFlow> = HashMap::new();
        let mut waiting = Vec::new();

        for instance in self.stores.instances.list_pending().await? {
            if !flows.contains_key(&instance.flow_id.0) {
                let flow = self.load_flow(&instance.flow_id).await?;
                flows.insert(flow.id.0.clone(), flow);
            }
            let Some(flow) = flows.get(&instance.flow_id.0) else {
                continue;
            };

            let approvers = match self.current_approvers(&instance, flow).await {
                Ok(approvers) => approvers,
                Err(error)
                    if matches!(error.kind(), ErrorKind::Configuration | ErrorKind::NotFound) =>
                {
                    continue
                }
                Err(error) => return Err(error),
            };
            if approvers.iter().any(|approver| approver.user_id == actor_id) {
                waiting.push(instance);
            }
        }
        Ok(waiting)
    }

    async fn current_approvers(
        &self,
        instance: &ApprovalInstance,
        flow: &ApprovalFlow,
    ) -> Result<Vec<ApproverIdentity>, WorkflowError> {
        let node = self.engine.current_node(instance, flow)?;
        self.resolver.resolve(node, &context(instance)).await
    }

    async fn load_flow(&self, id: &FlowId) -> Result<ApprovalFlow, WorkflowError> {
        self.stores
            .flows
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::FlowIdNotFound(id.0.clone()))
    }

    /// Distinguishes a lost race on the step from a concurrent write that
    /// left the step unchanged.
    async fn stale_error(
        &self,
        read: &ApprovalInstance,
        expected_step: u32,
    ) -> Result<WorkflowError, WorkflowError> {
        let current = self.get_instance(&read.id).await?;
        if !current.is_pending() || current.current_step.step() != Some(expected_step) {
            return Ok(WorkflowError::AlreadyActed {
                instance_id: read.id.0.clone(),
                expected_step,
            });
        }
        Ok(WorkflowError::VersionConflict {
            kind: "approval_instance".to_owned(),
            id: read.id.0.clone(),
            expected: read.version.to_string(),
        })
    }

    /// Loads the document history and re-derives the document from the
    /// latest instance when the stored document lags behind it.
    async fn reconcile(
        &self,
        business_type: BusinessType,
        business_id: &str,
        correlation_id: &str,
    ) -> Result<Vec<ApprovalInstance>, WorkflowError> {
        let history = self.stores.instances.list_for_business(business_type, business_id).await?;
        let Some(latest) = history.last() else {
            return Ok(history);
        };
        let Some(document) = self.stores.documents.find(business_type, business_id).await? else {
            return Ok(history);
        };
        if !document.is_behind(latest) {
            return Ok(history);
        }

        let flow = if latest.is_pending() {
            Some(self.load_flow(&latest.flow_id).await?)
        } else {
            None
        };
        self.follow(latest, flow.as_ref(), correlation_id).await?;
        info!(
            event_name = "approval.document.resynced",
            correlation_id = %correlation_id,
            business_type = %business_type,
            business_id = %business_id,
            instance_id = %latest.id.0,
            instance_version = latest.version,
            "document status re-derived from approval instance"
        );
        Ok(history)
    }

    /// Brings the document in line with a committed instance, reporting a
    /// failed write as [`WorkflowError::DocumentOutOfSync`].
    async fn follow(
        &self,
        instance: &ApprovalInstance,
        flow: Option<&ApprovalFlow>,
        correlation_id: &str,
    ) -> Result<(), WorkflowError> {
        match self.sync_document(instance, flow).await {
            Ok(()) => Ok(()),
            Err(sync_error) => {
                self.sync_failed(instance, correlation_id, &sync_error);
                Err(WorkflowError::DocumentOutOfSync {
                    business_type: instance.business_type.as_str().to_owned(),
                    business_id: instance.business_id.clone(),
                    instance_id: instance.id.0.clone(),
                    reason: sync_error.to_string(),
                })
            }
        }
    }

    /// Writes the binder fields derived from `instance`. Repeating it for the
    /// same instance state changes nothing, and a write for an older state
    /// is dropped by the document store.
    async fn sync_document(
        &self,
        instance: &ApprovalInstance,
        flow: Option<&ApprovalFlow>,
    ) -> Result<(), WorkflowError> {
        let binder = self.binders.get(instance.business_type)?;
        let mut document = self.document_for(instance).await?;
        let mark = SyncMark::of(instance);
        let now = Utc::now();

        let Some(step) = instance.current_step.step().filter(|_| instance.is_pending()) else {
            let effects: Vec<DownstreamEffect> = binder.on_terminal(&mut document, instance, now);
            // Effects are recorded before the document is marked terminal.
            if !effects.is_empty() {
                self.hook.dispatch(instance, &effects).await?;
            }
            let written = self.stores.documents.sync(&document, &mark).await?;
            if written == SyncWrite::Missing && !removes_document(&effects, &document) {
                return Err(missing_document(instance));
            }
            return Ok(());
        };

        let node = flow.and_then(|flow| flow.node_at(step)).ok_or_else(|| {
            WorkflowError::NodeNotFound {
                flow_id: instance.flow_id.0.clone(),
                node: format!("step {step}"),
            }
        })?;
        binder.on_advance(&mut document, instance, node, now);
        match self.stores.documents.sync(&document, &mark).await? {
            SyncWrite::Missing => Err(missing_document(instance)),
            SyncWrite::Applied | SyncWrite::Superseded => Ok(()),
        }
    }

    async fn document_for(
        &self,
        instance: &ApprovalInstance,
    ) -> Result<DocumentRecord, WorkflowError> {
        self.stores
            .documents
            .find(instance.business_type, &instance.business_id)
            .await?
            .ok_or_else(|| missing_document(instance))
    }

    /// An actor refused on the current step who was eligible for an earlier,
    /// already decided step lost a race on that step.
    async fn explain_refusal(
        &self,
        instance: &ApprovalInstance,
        flow: &ApprovalFlow,
        actor_id: &str,
        refusal: WorkflowError,
    ) -> WorkflowError {
        let Some(current) = instance.current_step.step() else {
            return refusal;
        };
        for step in (1..current).rev() {
            let Some(node) = flow.node_at(step) else {
                continue;
            };
            let Ok(approvers) = self.resolver.resolve(node, &context(instance)).await else {
                continue;
            };
            if approvers.iter().any(|approver| approver.user_id == actor_id) {
                return WorkflowError::AlreadyActed {
                    instance_id: instance.id.0.clone(),
                    expected_step: step,
                };
            }
        }
        refusal
    }

    /// Resolves the step that just became current so an unstaffed step is
    /// reported now rather than when someone tries to act on it.
    async fn announce_step(
        &self,
        instance: &ApprovalInstance,
        node: &ApprovalNode,
        correlation_id: &str,
    ) {
        match self.resolver.resolve(node, &context(instance)).await {
            Ok(approvers) => info!(
                event_name = "approval.step.current",
                correlation_id = %correlation_id,
                business_type = %instance.business_type,
                business_id = %instance.business_id,
                instance_id = %instance.id.0,
                step = node.order,
                approver_count = approvers.len(),
                "approval step awaiting decision"
            ),
            Err(resolve_error) => {
                warn!(
                    event_name = "approval.step.unresolved",
                    correlation_id = %correlation_id,
                    business_type = %instance.business_type,
                    business_id = %instance.business_id,
                    instance_id = %instance.id.0,
                    step = node.order,
                    error = %resolve_error,
                    "no approver can currently act on this step"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(instance.business_ref()),
                        correlation_id,
                        "approval.step.unresolved",
                        AuditCategory::Approval,
                        "system",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("instance_id", instance.id.0.clone())
                    .with_metadata("step", node.order.to_string())
                    .with_metadata("error", resolve_error.to_string()),
                );
            }
        }
    }

    fn sync_failed(
        &self,
        instance: &ApprovalInstance,
        correlation_id: &str,
        sync_error: &WorkflowError,
    ) {
        error!(
            event_name = "approval.document.sync_failed",
            correlation_id = %correlation_id,
            business_type = %instance.business_type,
            business_id = %instance.business_id,
            instance_id = %instance.id.0,
            error = %sync_error,
            "document status not updated after committed transition"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(instance.business_ref()),
                correlation_id,
                "approval.document.sync_failed",
                AuditCategory::Document,
                "system",
                AuditOutcome::Failed,
            )
            .with_metadata("instance_id", instance.id.0.clone())
            .with_metadata("error", sync_error.to_string()),
        );
    }

    fn refused(
        &self,
        instance: &ApprovalInstance,
        action: &Action,
        correlation_id: &str,
        refusal: &WorkflowError,
    ) {
        warn!(
            event_name = "approval.decision.refused",
            correlation_id = %correlation_id,
            business_type = %instance.business_type,
            business_id = %instance.business_id,
            instance_id = %instance.id.0,
            actor_id = %action.actor_id,
            error = %refusal,
            "approval decision refused"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(instance.business_ref()),
                correlation_id,
                "approval.decision.refused",
                AuditCategory::Approval,
                action.actor_id.clone(),
                AuditOutcome::Rejected,
            )
            .with_metadata("instance_id", instance.id.0.clone())
            .with_metadata("error_kind", refusal.kind().as_str()),
        );
    }
}

fn context(instance: &ApprovalInstance) -> ResolutionContext {
    ResolutionContext {
        business_type: instance.business_type,
        business_id: instance.business_id.clone(),
        submitter_id: instance.submitter_id.clone(),
    }
}

fn missing_document(instance: &ApprovalInstance) -> WorkflowError {
    WorkflowError::DocumentNotFound {
        business_type: instance.business_type.as_str().to_owned(),
        business_id: instance.business_id.clone(),
    }
}

fn removes_document(effects: &[DownstreamEffect], document: &DocumentRecord) -> bool {
    effects.iter().any(|effect| match effect {
        DownstreamEffect::DeleteInspectionItem { item_id } => *item_id == document.id,
        _ => false,
    })
}

fn already_pending(submission: &Submission) -> WorkflowError {
    WorkflowError::AlreadyPending {
        business_type: submission.business_type.as_str().to_owned(),
        business_id: submission.business_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Notify;

    use signoff_core::approvals::{
        Action, DirectoryNodeResolver, StaticDirectory, Submission, Transition,
    };
    use signoff_core::audit::InMemoryAuditSink;
    use signoff_core::documents::{DocumentRecord, DownstreamEffect, SyncMark};
    use signoff_core::domain::business::BusinessType;
    use signoff_core::domain::flow::{NewApprovalFlow, NodeDraft, NodeTarget};
    use signoff_core::domain::identity::ApproverIdentity;
    use signoff_core::domain::instance::{
        DecisionAction, InstanceId, InstanceStatus, StepPosition,
    };
    use signoff_core::errors::{ErrorKind, WorkflowError};

    use super::ApprovalService;
    use crate::repositories::{
        DocumentRepository, InMemoryDocumentRepository, InstanceRepository, RepositoryError,
        SyncWrite,
    };
    use crate::services::{FlowAdminService, RecordingDownstreamHook, SequenceGenerator, Stores};

    /// Document store whose mark-guarded writes can be switched off, or held
    /// back for one status until released.
    #[derive(Default)]
    struct UnreliableDocuments {
        inner: InMemoryDocumentRepository,
        offline: AtomicBool,
        held: Option<(&'static str, Arc<Notify>)>,
    }

    impl UnreliableDocuments {
        fn holding(status: &'static str, gate: Arc<Notify>) -> Self {
            Self { held: Some((status, gate)), ..Self::default() }
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DocumentRepository for UnreliableDocuments {
        async fn find(
            &self,
            business_type: BusinessType,
            id: &str,
        ) -> Result<Option<DocumentRecord>, RepositoryError> {
            self.inner.find(business_type, id).await
        }

        async fn save(&self, document: &DocumentRecord) -> Result<(), RepositoryError> {
            self.inner.save(document).await
        }

        async fn sync(
            &self,
            document: &DocumentRecord,
            mark: &SyncMark,
        ) -> Result<SyncWrite, RepositoryError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(RepositoryError::Unavailable("document store offline".to_owned()));
            }
            if let Some((status, gate)) = &self.held {
                if document.status == *status {
                    gate.notified().await;
                }
            }
            self.inner.sync(document, mark).await
        }

        async fn delete(
            &self,
            business_type: BusinessType,
            id: &str,
        ) -> Result<bool, RepositoryError> {
            self.inner.delete(business_type, id).await
        }
    }

    struct Harness {
        service: ApprovalService,
        admin: FlowAdminService,
        stores: Stores,
        directory: StaticDirectory,
        hook: RecordingDownstreamHook,
        audit: InMemoryAuditSink,
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(InMemoryDocumentRepository::default())).await
    }

    async fn harness_with(documents: Arc<dyn DocumentRepository>) -> Harness {
        let mut stores = Stores::in_memory();
        stores.documents = documents;
        let directory = StaticDirectory::new()
            .with_user("u-sales", "Zhao Min", &["sales"])
            .with_user("u-sm", "Qian Li", &["sales_manager"])
            .with_user("u-fin", "Sun Wei", &["finance"])
            .with_user("u-dir", "Li Na", &["lab_director"]);
        let hook = RecordingDownstreamHook::default();
        let audit = InMemoryAuditSink::default();

        let admin =
            FlowAdminService::new(&stores, SequenceGenerator::new(stores.sequences.clone()));
        admin
            .create(
                NewApprovalFlow {
                    name: "Quotation approval".to_owned(),
                    code: Some("QT_STD".to_owned()),
                    business_type: BusinessType::Quotation,
                    description: String::new(),
                    enabled: true,
                    nodes: vec![
                        role_step("Sales", "sales_manager", "Sales manager"),
                        role_step("Finance", "finance", "Finance"),
                        role_step("Director", "lab_director", "Lab director"),
                    ],
                },
                "setup",
            )
            .await
            .expect("flow");

        for (id, number) in [("q-1", "QT20260301001"), ("q-2", "QT20260301002")] {
            stores
                .documents
                .save(&DocumentRecord::new(
                    BusinessType::Quotation,
                    id,
                    number,
                    "Water panel",
                    "draft",
                    Utc::now(),
                ))
                .await
                .expect("document");
        }

        let service = ApprovalService::new(
            stores.clone(),
            Arc::new(DirectoryNodeResolver::new(directory.clone())),
        )
        .with_hook(Arc::new(hook.clone()))
        .with_audit(Arc::new(audit.clone()));

        Harness { service, admin, stores, directory, hook, audit }
    }

    fn role_step(name: &str, role: &str, target_name: &str) -> NodeDraft {
        NodeDraft::new(name, NodeTarget::Role(role.to_owned()), target_name)
    }

    fn submission() -> Submission {
        submission_for("q-1")
    }

    fn submission_for(business_id: &str) -> Submission {
        Submission {
            business_type: BusinessType::Quotation,
            business_id: business_id.to_owned(),
            flow_code: "QT_STD".to_owned(),
            submitter_id: "u-sales".to_owned(),
            submitter_name: "Zhao Min".to_owned(),
        }
    }

    fn approve(instance_id: &InstanceId, actor: &str) -> Action {
        decide(instance_id, actor, DecisionAction::Approve, None)
    }

    fn reject(instance_id: &InstanceId, actor: &str, reason: &str) -> Action {
        decide(instance_id, actor, DecisionAction::Reject, Some(reason))
    }

    fn decide(
        instance_id: &InstanceId,
        actor: &str,
        action: DecisionAction,
        comment: Option<&str>,
    ) -> Action {
        Action {
            instance_id: instance_id.clone(),
            actor_id: actor.to_owned(),
            actor_name: actor.to_owned(),
            action,
            comment: comment.map(str::to_owned),
        }
    }

    async fn document(stores: &Stores) -> DocumentRecord {
        stores
            .documents
            .find(BusinessType::Quotation, "q-1")
            .await
            .expect("find")
            .expect("exists")
    }

    async fn status(stores: &Stores) -> String {
        document(stores).await.status
    }

    #[tokio::test]
    async fn full_approval_walks_document_through_each_stage() {
        let h = harness().await;
        let instance = h.service.submit(&submission(), "req-1").await.expect("submit");
        assert_eq!(status(&h.stores).await, "pending_sales_manager");

        let step = h.service.act(&approve(&instance.id, "u-sm"), "req-2").await.expect("sm");
        assert_eq!(step.transition, Transition::Advanced { from_step: 1, to_step: 2 });
        assert_eq!(status(&h.stores).await, "pending_finance");

        h.service.act(&approve(&instance.id, "u-fin"), "req-3").await.expect("fin");
        assert_eq!(status(&h.stores).await, "pending_lab_director");

        let done = h
            .service
            .act(&decide(&instance.id, "u-dir", DecisionAction::Approve, Some("ok")), "req-4")
            .await
            .expect("dir");
        assert_eq!(done.instance.status, InstanceStatus::Approved);
        assert_eq!(done.instance.decisions.len(), 3);
        assert_eq!(status(&h.stores).await, "approved");
        assert_eq!(document(&h.stores).await.synced, Some(SyncMark::of(&done.instance)));
        assert_eq!(
            h.hook.dispatched(),
            vec![DownstreamEffect::GenerateContract { quotation_id: "q-1".to_owned() }]
        );
        assert_eq!(h.audit.events_of_type("approval.instance.approved").len(), 1);
    }

    #[tokio::test]
    async fn rejection_records_reason_and_allows_resubmission() {
        let h = harness().await;
        let instance = h.service.submit(&submission(), "req-1").await.expect("submit");
        h.service.act(&approve(&instance.id, "u-sm"), "req-2").await.expect("sm");

        let missing = h
            .service
            .act(&reject(&instance.id, "u-fin", "  "), "req-3")
            .await
            .expect_err("reason required");
        assert!(matches!(missing, WorkflowError::RejectReasonRequired { .. }));

        let rejected = h
            .service
            .act(&reject(&instance.id, "u-fin", "price too low"), "req-4")
            .await
            .expect("reject");
        assert_eq!(rejected.instance.status, InstanceStatus::Rejected);
        assert_eq!(rejected.instance.decisions.len(), 2);

        let stored = document(&h.stores).await;
        assert_eq!(stored.status, "rejected");
        assert_eq!(stored.last_reject_reason.as_deref(), Some("price too low"));

        let second = h.service.submit(&submission(), "req-5").await.expect("resubmit");
        assert_ne!(second.id, instance.id);
        let history =
            h.service.instances_for(BusinessType::Quotation, "q-1").await.expect("history");
        let ids: Vec<InstanceId> = history.iter().map(|item| item.id.clone()).collect();
        assert_eq!(ids, vec![instance.id, second.id]);
        assert!(status(&h.stores).await.starts_with("pending_"));
    }

    #[tokio::test]
    async fn rejection_on_first_or_last_step_ends_the_instance() {
        let h = harness().await;
        let first = h.service.submit(&submission(), "req-1").await.expect("submit");
        let early = h
            .service
            .act(&reject(&first.id, "u-sm", "scope unclear"), "req-2")
            .await
            .expect("reject at step 1");
        assert_eq!(
            early.transition,
            Transition::Rejected { step: 1, reason: "scope unclear".to_owned() }
        );
        assert_eq!(early.instance.decisions.len(), 1);
        assert_eq!(early.instance.current_step, StepPosition::Finished);
        assert_eq!(status(&h.stores).await, "rejected");

        let second = h.service.submit(&submission(), "req-3").await.expect("resubmit");
        h.service.act(&approve(&second.id, "u-sm"), "req-4").await.expect("sm");
        h.service.act(&approve(&second.id, "u-fin"), "req-5").await.expect("fin");
        let late = h
            .service
            .act(&reject(&second.id, "u-dir", "accreditation lapsed"), "req-6")
            .await
            .expect("reject at last step");
        assert_eq!(
            late.transition,
            Transition::Rejected { step: 3, reason: "accreditation lapsed".to_owned() }
        );
        assert_eq!(late.instance.decisions.len(), 3);
        assert_eq!(late.instance.status, InstanceStatus::Rejected);

        let stored = document(&h.stores).await;
        assert_eq!(stored.status, "rejected");
        assert_eq!(stored.last_reject_reason.as_deref(), Some("accreditation lapsed"));
        assert!(h.hook.dispatched().is_empty());
        assert!(matches!(
            h.service.act(&approve(&second.id, "u-dir"), "req-7").await,
            Err(WorkflowError::InstanceClosed { .. })
        ));
    }

    #[tokio::test]
    async fn second_submission_while_pending_is_refused() {
        let h = harness().await;
        h.service.submit(&submission(), "req-1").await.expect("submit");
        let error = h.service.submit(&submission(), "req-2").await.expect_err("pending");
        assert!(matches!(error, WorkflowError::AlreadyPending { .. }));
    }

    #[tokio::test]
    async fn unknown_flow_code_is_not_found() {
        let h = harness().await;
        let mut unknown = submission();
        unknown.flow_code = "QT_MISSING".to_owned();

        let error = h.service.submit(&unknown, "req-1").await.expect_err("no such flow");
        assert_eq!(
            error,
            WorkflowError::FlowNotFound {
                business_type: "quotation".to_owned(),
                code: "QT_MISSING".to_owned(),
            }
        );
        assert_eq!(error.kind(), ErrorKind::NotFound);
        let history = h.service.instances_for(BusinessType::Quotation, "q-1").await.expect("list");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn disabling_a_flow_keeps_running_instances_but_refuses_new_ones() {
        let h = harness().await;
        let running = h.service.submit(&submission(), "req-1").await.expect("submit");
        let flow = h
            .stores
            .flows
            .find_by_code(BusinessType::Quotation, "QT_STD")
            .await
            .expect("find")
            .expect("exists");
        h.admin.set_enabled(&flow.id, false, "req-2").await.expect("disable");

        let step = h.service.act(&approve(&running.id, "u-sm"), "req-3").await.expect("sm");
        assert_eq!(step.transition, Transition::Advanced { from_step: 1, to_step: 2 });
        assert_eq!(status(&h.stores).await, "pending_finance");

        let error = h
            .service
            .submit(&submission_for("q-2"), "req-4")
            .await
            .expect_err("flow disabled");
        assert_eq!(error, WorkflowError::FlowDisabled("QT_STD".to_owned()));
        let history = h.service.instances_for(BusinessType::Quotation, "q-2").await.expect("list");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn unresolved_actor_cannot_act_and_nothing_is_appended() {
        let h = harness().await;
        let instance = h.service.submit(&submission(), "req-1").await.expect("submit");

        let error = h
            .service
            .act(&approve(&instance.id, "u-fin"), "req-2")
            .await
            .expect_err("wrong step");
        assert!(matches!(error, WorkflowError::NotAuthorizedApprover { step: 1, .. }));

        let stored =
            h.stores.instances.find_by_id(&instance.id).await.expect("find").expect("exists");
        assert!(stored.decisions.is_empty());
        assert_eq!(h.audit.events_of_type("approval.decision.refused").len(), 1);
    }

    #[tokio::test]
    async fn approver_of_finished_step_gets_already_acted() {
        let h = harness().await;
        let instance = h.service.submit(&submission(), "req-1").await.expect("submit");
        h.directory.upsert_user(ApproverIdentity::new("u-sm2", "Zhou"), &["sales_manager"]);

        h.service.act(&approve(&instance.id, "u-sm"), "req-2").await.expect("first");
        let error = h
            .service
            .act(&approve(&instance.id, "u-sm2"), "req-3")
            .await
            .expect_err("step moved on");
        assert_eq!(
            error,
            WorkflowError::AlreadyActed { instance_id: instance.id.0.clone(), expected_step: 1 }
        );
        assert_eq!(error.kind(), ErrorKind::Conflict);

        let error = h
            .service
            .act(&approve(&instance.id, "u-sales"), "req-4")
            .await
            .expect_err("never an approver");
        assert!(matches!(error, WorkflowError::NotAuthorizedApprover { step: 2, .. }));
    }

    #[tokio::test]
    async fn submission_requires_submittable_document_and_staffed_first_step() {
        let h = harness().await;

        let missing = submission_for("q-404");
        assert!(matches!(
            h.service.submit(&missing, "req-1").await,
            Err(WorkflowError::DocumentNotFound { .. })
        ));

        h.directory.set_active("u-sm", false);
        assert!(matches!(
            h.service.submit(&submission(), "req-2").await,
            Err(WorkflowError::NoApproverFound { .. })
        ));
        let history = h.service.instances_for(BusinessType::Quotation, "q-1").await.expect("list");
        assert!(history.is_empty());
        assert_eq!(status(&h.stores).await, "draft");
    }

    #[tokio::test]
    async fn pending_for_approver_lists_current_step_only() {
        let h = harness().await;
        let instance = h.service.submit(&submission(), "req-1").await.expect("submit");

        assert_eq!(h.service.pending_for_approver("u-sm").await.expect("sm").len(), 1);
        assert!(h.service.pending_for_approver("u-fin").await.expect("fin").is_empty());

        h.service.act(&approve(&instance.id, "u-sm"), "req-2").await.expect("sm");
        assert!(h.service.pending_for_approver("u-sm").await.expect("sm").is_empty());
        assert_eq!(h.service.pending_for_approver("u-fin").await.expect("fin").len(), 1);
    }

    #[tokio::test]
    async fn failed_document_write_is_reported_and_healed_before_resubmission() {
        let documents = Arc::new(UnreliableDocuments::default());
        let h = harness_with(documents.clone()).await;
        let instance = h.service.submit(&submission(), "req-1").await.expect("submit");

        documents.set_offline(true);
        let error = h
            .service
            .act(&reject(&instance.id, "u-sm", "price too low"), "req-2")
            .await
            .expect_err("document write fails");
        assert!(matches!(
            error,
            WorkflowError::DocumentOutOfSync { ref instance_id, .. }
                if *instance_id == instance.id.0
        ));
        assert_eq!(error.kind(), ErrorKind::Persistence);
        assert_eq!(h.audit.events_of_type("approval.document.sync_failed").len(), 1);

        let committed = h.service.get_instance(&instance.id).await.expect("reload");
        assert_eq!(committed.status, InstanceStatus::Rejected);
        assert_eq!(status(&h.stores).await, "pending_sales_manager");

        let error = h.service.submit(&submission(), "req-3").await.expect_err("still offline");
        assert!(matches!(error, WorkflowError::DocumentOutOfSync { .. }));
        let history = h.service.instances_for(BusinessType::Quotation, "q-1").await.expect("list");
        assert_eq!(history.len(), 1);

        documents.set_offline(false);
        let healed =
            h.service.resync(BusinessType::Quotation, "q-1", "req-4").await.expect("resync");
        assert_eq!(healed.status, "rejected");
        assert_eq!(healed.last_reject_reason.as_deref(), Some("price too low"));
        assert_eq!(healed.synced, Some(SyncMark::of(&committed)));

        let again =
            h.service.resync(BusinessType::Quotation, "q-1", "req-5").await.expect("no-op");
        assert_eq!(again, healed);

        let second = h.service.submit(&submission(), "req-6").await.expect("resubmit");
        assert_ne!(second.id, instance.id);
        assert_eq!(status(&h.stores).await, "pending_sales_manager");
        assert_eq!(document(&h.stores).await.last_reject_reason, None);
    }

    #[tokio::test]
    async fn resubmission_heals_a_stale_rejection_without_manual_resync() {
        let documents = Arc::new(UnreliableDocuments::default());
        let h = harness_with(documents.clone()).await;
        let instance = h.service.submit(&submission(), "req-1").await.expect("submit");

        documents.set_offline(true);
        h.service
            .act(&reject(&instance.id, "u-sm", "missing annex"), "req-2")
            .await
            .expect_err("document write fails");
        documents.set_offline(false);

        let second = h.service.submit(&submission(), "req-3").await.expect("resubmit");
        let stored = document(&h.stores).await;
        assert_eq!(stored.status, "pending_sales_manager");
        assert_eq!(stored.current_approval_instance_id, Some(second.id.clone()));
        assert_eq!(stored.synced, Some(SyncMark::of(&second)));
        assert_eq!(h.audit.events_of_type("approval.instance.submitted").len(), 2);
    }

    #[tokio::test]
    async fn late_write_for_an_earlier_step_does_not_overwrite_approval() {
        let gate = Arc::new(Notify::new());
        let documents = Arc::new(UnreliableDocuments::holding("pending_finance", gate.clone()));
        let h = harness_with(documents).await;
        let instance = h.service.submit(&submission(), "req-1").await.expect("submit");

        let service = h.service.clone();
        let first_step = approve(&instance.id, "u-sm");
        let slow = tokio::spawn(async move { service.act(&first_step, "req-2").await });
        while h.service.get_instance(&instance.id).await.expect("reload").current_step
            != StepPosition::At(2)
        {
            tokio::task::yield_now().await;
        }

        h.service.act(&approve(&instance.id, "u-fin"), "req-3").await.expect("fin");
        let done = h.service.act(&approve(&instance.id, "u-dir"), "req-4").await.expect("dir");
        assert_eq!(done.instance.status, InstanceStatus::Approved);
        assert_eq!(status(&h.stores).await, "approved");

        gate.notify_one();
        let late = slow.await.expect("task completes").expect("step 1 commit stands");
        assert_eq!(late.transition, Transition::Advanced { from_step: 1, to_step: 2 });

        let stored = document(&h.stores).await;
        assert_eq!(stored.status, "approved");
        assert_eq!(stored.synced, Some(SyncMark::of(&done.instance)));

        let error = h.service.submit(&submission(), "req-5").await.expect_err("already approved");
        assert!(matches!(
            error,
            WorkflowError::DocumentNotSubmittable { ref status, .. } if status == "approved"
        ));
    }
}
