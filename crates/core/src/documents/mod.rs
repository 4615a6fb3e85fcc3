//! Document status binders.
//!
//! The engine only knows `pending`, `approved` and `rejected`. Each document
//! type owns its own status vocabulary and maps engine transitions onto it
//! through a [`StatusBinder`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business::{BusinessRef, BusinessType};
use crate::domain::flow::{ApprovalNode, NodeTarget};
use crate::domain::instance::{ApprovalInstance, InstanceId, InstanceStatus};
use crate::errors::WorkflowError;

pub mod consultation;
pub mod contract;
pub mod inspection;
pub mod quotation;
pub mod report;

pub use consultation::{evaluation_round, ConsultationBinder, ConsultationStatus};
pub use contract::{ContractBinder, ContractStatus};
pub use inspection::{InspectionItemBinder, InspectionItemStatus};
pub use quotation::{QuotationBinder, QuotationStatus};
pub use report::{ReportBinder, ReportStatus};

/// The state-machine slice of a business document. Business fields live with
/// the host application; only what the binder reads or writes is modelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub business_type: BusinessType,
    pub id: String,
    pub number: String,
    pub title: String,
    pub status: String,
    pub current_approval_instance_id: Option<InstanceId>,
    pub last_reject_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// The instance state the binder fields were last derived from.
    #[serde(default)]
    pub synced: Option<SyncMark>,
}

impl DocumentRecord {
    pub fn new(
        business_type: BusinessType,
        id: impl Into<String>,
        number: impl Into<String>,
        title: impl Into<String>,
        status: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            business_type,
            id: id.into(),
            number: number.into(),
            title: title.into(),
            status: status.into(),
            current_approval_instance_id: None,
            last_reject_reason: None,
            updated_at: now,
            synced: None,
        }
    }

    /// Whether the binder fields lag behind `instance`.
    pub fn is_behind(&self, instance: &ApprovalInstance) -> bool {
        self.synced.as_ref() < Some(&SyncMark::of(instance))
    }

    pub fn business_ref(&self) -> BusinessRef {
        BusinessRef::new(self.business_type, self.id.clone())
    }
}

/// Position of an instance in a document's approval history: later
/// submissions order after earlier ones, later decisions after earlier ones.
/// Document writes carrying a mark only land over an older mark.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncMark {
    pub instance_created_at: DateTime<Utc>,
    pub instance_version: u32,
}

impl SyncMark {
    pub fn of(instance: &ApprovalInstance) -> Self {
        Self {
            instance_created_at: instance.created_at.trunc_subsecs(6),
            instance_version: instance.version,
        }
    }

    /// Text form whose lexical order matches the mark order.
    pub fn to_storage(&self) -> String {
        format!(
            "{}#{:010}",
            self.instance_created_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            self.instance_version
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (created_at, version) = value.split_once('#')?;
        let instance_created_at =
            DateTime::parse_from_rfc3339(created_at).ok()?.with_timezone(&Utc);
        Some(Self { instance_created_at, instance_version: version.parse().ok()? })
    }
}

/// Work handed to the host after a document reaches its approved state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum DownstreamEffect {
    GenerateContract { quotation_id: String },
    GenerateEntrustment { contract_id: String },
    PublishReport { report_id: String },
    DeleteInspectionItem { item_id: String },
}

impl DownstreamEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GenerateContract { .. } => "generate_contract",
            Self::GenerateEntrustment { .. } => "generate_entrustment",
            Self::PublishReport { .. } => "publish_report",
            Self::DeleteInspectionItem { .. } => "delete_inspection_item",
        }
    }

    pub fn business_ref(&self) -> BusinessRef {
        match self {
            Self::GenerateContract { quotation_id } => {
                BusinessRef::new(BusinessType::Quotation, quotation_id.clone())
            }
            Self::GenerateEntrustment { contract_id } => {
                BusinessRef::new(BusinessType::Contract, contract_id.clone())
            }
            Self::PublishReport { report_id } => {
                BusinessRef::new(BusinessType::Report, report_id.clone())
            }
            Self::DeleteInspectionItem { item_id } => {
                BusinessRef::new(BusinessType::InspectionItem, item_id.clone())
            }
        }
    }
}

/// Maps engine transitions onto one document type's status vocabulary.
///
/// Implementors supply the vocabulary; the provided methods apply it and keep
/// the instance link and rejection reason consistent across types.
pub trait StatusBinder: Send + Sync {
    fn business_type(&self) -> BusinessType;

    /// Statuses from which a new approval may be started.
    fn submittable_statuses(&self) -> &'static [&'static str];

    /// Status while `node` (at 1-based `step`) awaits a decision.
    fn pending_status(&self, step: u32, node: &ApprovalNode) -> &'static str;

    fn approved_status(&self) -> &'static str;

    fn rejected_status(&self) -> &'static str;

    fn approved_effects(&self, _document: &DocumentRecord) -> Vec<DownstreamEffect> {
        Vec::new()
    }

    fn can_submit(&self, document: &DocumentRecord) -> Result<(), WorkflowError> {
        if self.submittable_statuses().contains(&document.status.as_str()) {
            return Ok(());
        }
        Err(WorkflowError::DocumentNotSubmittable {
            business_type: document.business_type.as_str().to_owned(),
            business_id: document.id.clone(),
            status: document.status.clone(),
        })
    }

    /// The instance moved onto a new pending step, including step 1 right
    /// after submission.
    fn on_advance(
        &self,
        document: &mut DocumentRecord,
        instance: &ApprovalInstance,
        node: &ApprovalNode,
        now: DateTime<Utc>,
    ) {
        document.status = self.pending_status(node.order, node).to_owned();
        document.current_approval_instance_id = Some(instance.id.clone());
        document.last_reject_reason = None;
        document.updated_at = now;
    }

    /// The instance reached `approved` or `rejected`.
    fn on_terminal(
        &self,
        document: &mut DocumentRecord,
        instance: &ApprovalInstance,
        now: DateTime<Utc>,
    ) -> Vec<DownstreamEffect> {
        document.current_approval_instance_id = Some(instance.id.clone());
        document.updated_at = now;
        match instance.status {
            InstanceStatus::Approved => {
                document.status = self.approved_status().to_owned();
                document.last_reject_reason = None;
                self.approved_effects(document)
            }
            InstanceStatus::Rejected => {
                document.status = self.rejected_status().to_owned();
                document.last_reject_reason = instance.rejection_reason().map(str::to_owned);
                Vec::new()
            }
            InstanceStatus::Pending => Vec::new(),
        }
    }
}

/// Picks the pending status for a step. A role node whose code names a known
/// stage wins; otherwise the step position selects the stage, clamped to the
/// last one.
pub(crate) fn stage_for_step(
    stages: &[(&'static str, &'static str)],
    step: u32,
    node: &ApprovalNode,
) -> &'static str {
    if let NodeTarget::Role(role_code) = &node.target {
        if let Some((_, status)) = stages.iter().find(|(role, _)| *role == role_code.as_str()) {
            return *status;
        }
    }
    let index = (step.max(1) as usize - 1).min(stages.len().saturating_sub(1));
    stages.get(index).map(|(_, status)| *status).unwrap_or("pending")
}

#[derive(Clone, Default)]
pub struct BinderRegistry {
    binders: HashMap<BusinessType, Arc<dyn StatusBinder>>,
}

impl BinderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One binder per built-in document type.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(QuotationBinder));
        registry.register(Arc::new(ContractBinder));
        registry.register(Arc::new(ReportBinder));
        registry.register(Arc::new(InspectionItemBinder));
        registry.register(Arc::new(ConsultationBinder));
        registry
    }

    pub fn register(&mut self, binder: Arc<dyn StatusBinder>) {
        self.binders.insert(binder.business_type(), binder);
    }

    pub fn get(&self, business_type: BusinessType) -> Result<&dyn StatusBinder, WorkflowError> {
        self.binders
            .get(&business_type)
            .map(|binder| binder.as_ref())
            .ok_or_else(|| WorkflowError::NoBinder(business_type.as_str().to_owned()))
    }
}

impl std::fmt::Debug for BinderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.binders.keys().map(BusinessType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("BinderRegistry").field("business_types", &types).finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use crate::domain::business::BusinessType;
    use crate::domain::flow::{ApprovalNode, FlowId, NodeId, NodeTarget};
    use crate::domain::instance::{
        ApprovalInstance, Decision, DecisionAction, InstanceId, InstanceStatus, StepPosition,
    };

    pub fn node(order: u32, target: NodeTarget) -> ApprovalNode {
        ApprovalNode {
            id: NodeId(format!("n-{order}")),
            name: format!("step {order}"),
            target,
            target_name: format!("step {order}"),
            order,
        }
    }

    pub fn role_node(order: u32, role: &str) -> ApprovalNode {
        node(order, NodeTarget::Role(role.to_owned()))
    }

    pub fn instance(
        business_type: BusinessType,
        business_id: &str,
        status: InstanceStatus,
        reject_reason: Option<&str>,
    ) -> ApprovalInstance {
        let now = Utc::now();
        let decisions = reject_reason
            .map(|reason| {
                vec![Decision {
                    step_order: 1,
                    node_target_name: "step 1".to_owned(),
                    actor_id: "u-1".to_owned(),
                    actor_name: "Reviewer".to_owned(),
                    action: DecisionAction::Reject,
                    comment: Some(reason.to_owned()),
                    decided_at: now,
                }]
            })
            .unwrap_or_default();
        ApprovalInstance {
            id: InstanceId(format!("inst-{business_id}")),
            business_type,
            business_id: business_id.to_owned(),
            flow_id: FlowId("flow-1".to_owned()),
            flow_code: "FLOW".to_owned(),
            submitter_id: "u-sub".to_owned(),
            submitter_name: "Submitter".to_owned(),
            current_step: if status.is_terminal() {
                StepPosition::Finished
            } else {
                StepPosition::At(1)
            },
            status,
            decisions,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use chrono::Duration;

    use super::test_support::{instance, role_node};
    use super::{BinderRegistry, DocumentRecord, StatusBinder, SyncMark};
    use crate::domain::business::BusinessType;
    use crate::domain::instance::InstanceStatus;
    use crate::errors::WorkflowError;

    #[test]
    fn standard_registry_covers_every_business_type() {
        let registry = BinderRegistry::standard();
        for business_type in BusinessType::ALL {
            let binder = registry.get(business_type).expect("binder registered");
            assert_eq!(binder.business_type(), business_type);
        }
    }

    #[test]
    fn empty_registry_reports_missing_binder() {
        let registry = BinderRegistry::new();
        assert!(matches!(
            registry.get(BusinessType::Report),
            Err(WorkflowError::NoBinder(ref business_type)) if business_type == "report"
        ));
    }

    #[test]
    fn resubmission_clears_previous_reject_reason() {
        let registry = BinderRegistry::standard();
        let binder = registry.get(BusinessType::Contract).expect("binder");
        let mut document = DocumentRecord::new(
            BusinessType::Contract,
            "ct-1",
            "CT20260301001",
            "Water testing framework",
            "rejected",
            Utc::now(),
        );
        document.last_reject_reason = Some("missing annex".to_owned());

        binder.can_submit(&document).expect("rejected contracts may be resubmitted");
        let next = instance(BusinessType::Contract, "ct-1", InstanceStatus::Pending, None);
        binder.on_advance(&mut document, &next, &role_node(1, "legal"), Utc::now());

        assert_eq!(document.status, "pending_review");
        assert_eq!(document.last_reject_reason, None);
        assert_eq!(document.current_approval_instance_id, Some(next.id));
    }

    #[test]
    fn sync_marks_order_by_submission_then_decision() {
        let first = instance(BusinessType::Quotation, "q-1", InstanceStatus::Pending, None);
        let mut decided = first.clone();
        decided.version = 2;
        let mut resubmitted = first.clone();
        resubmitted.created_at = first.created_at + Duration::seconds(5);

        let marks = [SyncMark::of(&first), SyncMark::of(&decided), SyncMark::of(&resubmitted)];
        assert!(marks[0] < marks[1]);
        assert!(marks[1] < marks[2]);
        assert!(marks[0].to_storage() < marks[1].to_storage());
        assert!(marks[1].to_storage() < marks[2].to_storage());
        assert_eq!(SyncMark::parse(&marks[1].to_storage()), Some(marks[1].clone()));
        assert_eq!(SyncMark::parse("not a mark"), None);

        let mut document = DocumentRecord::new(
            BusinessType::Quotation,
            "q-1",
            "QT20260301001",
            "Soil panel",
            "draft",
            Utc::now(),
        );
        assert!(document.is_behind(&first));
        document.synced = Some(SyncMark::of(&decided));
        assert!(!document.is_behind(&first));
        assert!(!document.is_behind(&decided));
        assert!(document.is_behind(&resubmitted));
    }
}
