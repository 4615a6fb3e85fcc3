use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use signoff_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use signoff_core::domain::business::BusinessType;
use signoff_core::domain::flow::{
    ApprovalFlow, FlowId, FlowPatch, NewApprovalFlow, NodeDraft, NodeId, NodePatch,
};
use signoff_core::errors::WorkflowError;

use super::{SequenceGenerator, Stores};
use crate::repositories::{FlowRepository, FlowWrite, RepositoryError};

const FLOW_CODE_PREFIX: &str = "FLOW";

/// Administration of approval flows and their node lists.
///
/// Structural node changes (add, remove, reorder) and deletion are refused
/// while the flow has pending instances, since those instances address nodes
/// by position. The repository applies that check atomically with the write.
#[derive(Clone)]
pub struct FlowAdminService {
    flows: Arc<dyn FlowRepository>,
    sequence: SequenceGenerator,
    audit: Arc<dyn AuditSink>,
}

impl FlowAdminService {
    pub fn new(stores: &Stores, sequence: SequenceGenerator) -> Self {
        Self {
            flows: stores.flows.clone(),
            sequence,
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub async fn create(
        &self,
        new: NewApprovalFlow,
        correlation_id: &str,
    ) -> Result<ApprovalFlow, WorkflowError> {
        let code = match new.code.as_deref().map(str::trim).filter(|code| !code.is_empty()) {
            Some(code) => code.to_owned(),
            None => self.sequence.next(FLOW_CODE_PREFIX).await?.value,
        };
        let flow = ApprovalFlow::create(new, code, Utc::now())?;

        self.flows.insert(&flow).await.map_err(|error| duplicate_code(error, &flow.code))?;
        self.record(&flow, correlation_id, "flow.definition.created");
        Ok(flow)
    }

    pub async fn get(&self, id: &FlowId) -> Result<ApprovalFlow, WorkflowError> {
        self.flows.find_by_id(id).await?.ok_or_else(|| WorkflowError::FlowIdNotFound(id.0.clone()))
    }

    pub async fn list(
        &self,
        business_type: Option<BusinessType>,
    ) -> Result<Vec<ApprovalFlow>, WorkflowError> {
        Ok(self.flows.list(business_type).await?)
    }

    pub async fn update(
        &self,
        id: &FlowId,
        patch: FlowPatch,
        correlation_id: &str,
    ) -> Result<ApprovalFlow, WorkflowError> {
        self.mutate(id, correlation_id, "flow.definition.updated", false, |flow| {
            flow.apply_patch(patch, Utc::now())
        })
        .await
    }

    pub async fn set_enabled(
        &self,
        id: &FlowId,
        enabled: bool,
        correlation_id: &str,
    ) -> Result<ApprovalFlow, WorkflowError> {
        let event = if enabled { "flow.definition.enabled" } else { "flow.definition.disabled" };
        self.mutate(id, correlation_id, event, false, |flow| {
            flow.enabled = enabled;
            flow.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, id: &FlowId, correlation_id: &str) -> Result<(), WorkflowError> {
        let flow = self.get(id).await?;
        ensure_written(self.flows.delete(id).await?, &flow)?;
        self.record(&flow, correlation_id, "flow.definition.deleted");
        Ok(())
    }

    pub async fn add_node(
        &self,
        id: &FlowId,
        draft: NodeDraft,
        position: Option<u32>,
        correlation_id: &str,
    ) -> Result<ApprovalFlow, WorkflowError> {
        self.mutate(id, correlation_id, "flow.node.added", true, |flow| {
            flow.add_node(draft, position, Utc::now()).map(|_| ())
        })
        .await
    }

    pub async fn update_node(
        &self,
        id: &FlowId,
        node_id: &NodeId,
        patch: NodePatch,
        correlation_id: &str,
    ) -> Result<ApprovalFlow, WorkflowError> {
        self.mutate(id, correlation_id, "flow.node.updated", false, |flow| {
            flow.update_node(node_id, patch, Utc::now())
        })
        .await
    }

    pub async fn remove_node(
        &self,
        id: &FlowId,
        node_id: &NodeId,
        correlation_id: &str,
    ) -> Result<ApprovalFlow, WorkflowError> {
        self.mutate(id, correlation_id, "flow.node.removed", true, |flow| {
            flow.remove_node(node_id, Utc::now()).map(|_| ())
        })
        .await
    }

    pub async fn reorder(
        &self,
        id: &FlowId,
        ordered: &[NodeId],
        correlation_id: &str,
    ) -> Result<ApprovalFlow, WorkflowError> {
        self.mutate(id, correlation_id, "flow.node.reordered", true, |flow| {
            flow.reorder(ordered, Utc::now())
        })
        .await
    }

    async fn mutate<F>(
        &self,
        id: &FlowId,
        correlation_id: &str,
        event_type: &str,
        structural: bool,
        change: F,
    ) -> Result<ApprovalFlow, WorkflowError>
    where
        F: FnOnce(&mut ApprovalFlow) -> Result<(), WorkflowError>,
    {
        let mut flow = self.get(id).await?;
        change(&mut flow)?;

        let written = if structural {
            self.flows.save_idle(&flow).await
        } else {
            self.flows.save(&flow).await
        };
        ensure_written(written.map_err(|error| duplicate_code(error, &flow.code))?, &flow)?;
        self.record(&flow, correlation_id, event_type);
        Ok(flow)
    }


    fn record(&self, flow: &ApprovalFlow, correlation_id: &str, event_type: &str) {
        info!(
            event_name = event_type,
            correlation_id = %correlation_id,
            flow_id = %flow.id.0,
            flow_code = %flow.code,
            business_type = %flow.business_type,
            node_count = flow.node_count(),
            "approval flow changed"
        );
        self.audit.emit(
            AuditEvent::new(
                None,
                correlation_id,
                event_type,
                AuditCategory::Flow,
                "admin",
                AuditOutcome::Success,
            )
            .with_metadata("flow_id", flow.id.0.clone())
            .with_metadata("flow_code", flow.code.clone())
            .with_metadata("business_type", flow.business_type.as_str())
            .with_metadata("enabled", flow.enabled.to_string()),
        );
    }
}

fn ensure_written(written: FlowWrite, flow: &ApprovalFlow) -> Result<(), WorkflowError> {
    match written {
        FlowWrite::Applied => Ok(()),
        FlowWrite::Missing => Err(WorkflowError::FlowIdNotFound(flow.id.0.clone())),
        FlowWrite::InUse => Err(WorkflowError::FlowInUse(flow.code.clone())),
    }
}

fn duplicate_code(error: RepositoryError, code: &str) -> WorkflowError {
    if error.is_unique_violation() {
        WorkflowError::DuplicateFlowCode(code.to_owned())
    } else {
        error.into()
    }
}
