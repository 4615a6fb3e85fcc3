use serde::{Deserialize, Serialize};

use super::{stage_for_step, DocumentRecord, DownstreamEffect, StatusBinder};
use crate::domain::business::BusinessType;
use crate::domain::flow::ApprovalNode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotationStatus {
    Draft,
    PendingSalesManager,
    PendingFinance,
    PendingLabDirector,
    Approved,
    Rejected,
    Archived,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingSalesManager => "pending_sales_manager",
            Self::PendingFinance => "pending_finance",
            Self::PendingLabDirector => "pending_lab_director",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "draft" => Some(Self::Draft),
            "pending_sales_manager" => Some(Self::PendingSalesManager),
            "pending_finance" => Some(Self::PendingFinance),
            "pending_lab_director" => Some(Self::PendingLabDirector),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

const STAGES: [(&str, &str); 3] = [
    ("sales_manager", "pending_sales_manager"),
    ("finance", "pending_finance"),
    ("lab_director", "pending_lab_director"),
];

const SUBMITTABLE: [&str; 2] = ["draft", "rejected"];

#[derive(Clone, Copy, Debug, Default)]
pub struct QuotationBinder;

impl StatusBinder for QuotationBinder {
    fn business_type(&self) -> BusinessType {
        BusinessType::Quotation
    }

    fn submittable_statuses(&self) -> &'static [&'static str] {
        &SUBMITTABLE
    }

    fn pending_status(&self, step: u32, node: &ApprovalNode) -> &'static str {
        stage_for_step(&STAGES, step, node)
    }

    fn approved_status(&self) -> &'static str {
        QuotationStatus::Approved.as_str()
    }

    fn rejected_status(&self) -> &'static str {
        QuotationStatus::Rejected.as_str()
    }

    fn approved_effects(&self, document: &DocumentRecord) -> Vec<DownstreamEffect> {
        vec![DownstreamEffect::GenerateContract { quotation_id: document.id.clone() }]
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{QuotationBinder, QuotationStatus};
    use crate::documents::test_support::{instance, node, role_node};
    use crate::documents::{DocumentRecord, DownstreamEffect, StatusBinder};
    use crate::domain::business::BusinessType;
    use crate::domain::flow::NodeTarget;
    use crate::domain::instance::InstanceStatus;
    use crate::errors::WorkflowError;

    fn draft() -> DocumentRecord {
        DocumentRecord::new(
            BusinessType::Quotation,
            "qt-1",
            "QT20260301001",
            "Soil heavy metals",
            "draft",
            Utc::now(),
        )
    }

    #[test]
    fn each_step_has_its_own_pending_status() {
        let binder = QuotationBinder;
        let pending = instance(BusinessType::Quotation, "qt-1", InstanceStatus::Pending, None);
        let mut document = draft();

        let mut seen = Vec::new();
        for (order, role) in [(1, "sales_manager"), (2, "finance"), (3, "lab_director")] {
            binder.on_advance(&mut document, &pending, &role_node(order, role), Utc::now());
            seen.push(QuotationStatus::parse(&document.status).expect("known status"));
        }
        assert_eq!(
            seen,
            vec![
                QuotationStatus::PendingSalesManager,
                QuotationStatus::PendingFinance,
                QuotationStatus::PendingLabDirector,
            ]
        );
    }

    #[test]
    fn unknown_targets_fall_back_to_position() {
        let binder = QuotationBinder;
        let reviewer = node(2, NodeTarget::User("u-77".to_owned()));
        assert_eq!(binder.pending_status(2, &reviewer), "pending_finance");
        let late = node(6, NodeTarget::Department("qa".to_owned()));
        assert_eq!(binder.pending_status(6, &late), "pending_lab_director");
    }

    #[test]
    fn approval_requests_contract_generation() {
        let binder = QuotationBinder;
        let approved = instance(BusinessType::Quotation, "qt-1", InstanceStatus::Approved, None);
        let mut document = draft();

        let effects = binder.on_terminal(&mut document, &approved, Utc::now());
        assert_eq!(document.status, "approved");
        assert_eq!(
            effects,
            vec![DownstreamEffect::GenerateContract { quotation_id: "qt-1".to_owned() }]
        );
    }

    #[test]
    fn rejection_records_the_reason() {
        let binder = QuotationBinder;
        let rejected = instance(
            BusinessType::Quotation,
            "qt-1",
            InstanceStatus::Rejected,
            Some("price too low"),
        );
        let mut document = draft();

        let effects = binder.on_terminal(&mut document, &rejected, Utc::now());
        assert!(effects.is_empty());
        assert_eq!(document.status, "rejected");
        assert_eq!(document.last_reject_reason.as_deref(), Some("price too low"));
    }

    #[test]
    fn pending_quotation_cannot_be_resubmitted() {
        let mut document = draft();
        document.status = "pending_finance".to_owned();
        assert!(matches!(
            QuotationBinder.can_submit(&document),
            Err(WorkflowError::DocumentNotSubmittable { ref status, .. })
                if status == "pending_finance"
        ));
    }
}
