use serde::{Deserialize, Serialize};

use super::{DocumentRecord, DownstreamEffect, StatusBinder};
use crate::domain::business::BusinessType;
use crate::domain::flow::ApprovalNode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    PendingReview,
    Effective,
    Rejected,
    Archived,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Effective => "effective",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "draft" => Some(Self::Draft),
            "pending_review" => Some(Self::PendingReview),
            "effective" => Some(Self::Effective),
            "rejected" => Some(Self::Rejected),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

const SUBMITTABLE: [&str; 2] = ["draft", "rejected"];

/// Contracts have a single review status however many steps the flow has.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContractBinder;

impl StatusBinder for ContractBinder {
    fn business_type(&self) -> BusinessType {
        BusinessType::Contract
    }

    fn submittable_statuses(&self) -> &'static [&'static str] {
        &SUBMITTABLE
    }

    fn pending_status(&self, _step: u32, _node: &ApprovalNode) -> &'static str {
        ContractStatus::PendingReview.as_str()
    }

    fn approved_status(&self) -> &'static str {
        ContractStatus::Effective.as_str()
    }

    fn rejected_status(&self) -> &'static str {
        ContractStatus::Rejected.as_str()
    }

    fn approved_effects(&self, document: &DocumentRecord) -> Vec<DownstreamEffect> {
        vec![DownstreamEffect::GenerateEntrustment { contract_id: document.id.clone() }]
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ContractBinder, ContractStatus};
    use crate::documents::test_support::{instance, role_node};
    use crate::documents::{DocumentRecord, DownstreamEffect, StatusBinder};
    use crate::domain::business::BusinessType;
    use crate::domain::instance::InstanceStatus;

    #[test]
    fn approved_contract_becomes_effective() {
        let binder = ContractBinder;
        let mut document = DocumentRecord::new(
            BusinessType::Contract,
            "ct-9",
            "CT20260302004",
            "Annual air monitoring",
            ContractStatus::Draft.as_str(),
            Utc::now(),
        );
        let pending = instance(BusinessType::Contract, "ct-9", InstanceStatus::Pending, None);
        binder.on_advance(&mut document, &pending, &role_node(2, "legal"), Utc::now());
        assert_eq!(ContractStatus::parse(&document.status), Some(ContractStatus::PendingReview));

        let approved = instance(BusinessType::Contract, "ct-9", InstanceStatus::Approved, None);
        let effects = binder.on_terminal(&mut document, &approved, Utc::now());
        assert_eq!(ContractStatus::parse(&document.status), Some(ContractStatus::Effective));
        assert_eq!(
            effects,
            vec![DownstreamEffect::GenerateEntrustment { contract_id: "ct-9".to_owned() }]
        );
    }
}
