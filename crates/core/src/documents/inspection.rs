//! Deleting a current inspection-standard item is itself an approval. The
//! item stays `current` until the deletion is approved; the delete happens as
//! a downstream effect.

use serde::{Deserialize, Serialize};

use super::{DocumentRecord, DownstreamEffect, StatusBinder};
use crate::domain::business::BusinessType;
use crate::domain::flow::ApprovalNode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionItemStatus {
    Current,
    PendingDelete,
    Deleted,
}

impl InspectionItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::PendingDelete => "pending_delete",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "current" => Some(Self::Current),
            "pending_delete" => Some(Self::PendingDelete),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

const SUBMITTABLE: [&str; 1] = ["current"];

#[derive(Clone, Copy, Debug, Default)]
pub struct InspectionItemBinder;

impl StatusBinder for InspectionItemBinder {
    fn business_type(&self) -> BusinessType {
        BusinessType::InspectionItem
    }

    fn submittable_statuses(&self) -> &'static [&'static str] {
        &SUBMITTABLE
    }

    fn pending_status(&self, _step: u32, _node: &ApprovalNode) -> &'static str {
        InspectionItemStatus::PendingDelete.as_str()
    }

    fn approved_status(&self) -> &'static str {
        InspectionItemStatus::Deleted.as_str()
    }

    /// A refused deletion leaves the item in force.
    fn rejected_status(&self) -> &'static str {
        InspectionItemStatus::Current.as_str()
    }

    fn approved_effects(&self, document: &DocumentRecord) -> Vec<DownstreamEffect> {
        vec![DownstreamEffect::DeleteInspectionItem { item_id: document.id.clone() }]
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{InspectionItemBinder, InspectionItemStatus};
    use crate::documents::test_support::{instance, role_node};
    use crate::documents::{DocumentRecord, DownstreamEffect, StatusBinder};
    use crate::domain::business::BusinessType;
    use crate::domain::instance::InstanceStatus;

    fn current_item() -> DocumentRecord {
        DocumentRecord::new(
            BusinessType::InspectionItem,
            "item-5",
            "GB5749-2022-4.1",
            "Total coliforms",
            InspectionItemStatus::Current.as_str(),
            Utc::now(),
        )
    }

    #[test]
    fn rejected_deletion_returns_item_to_current() {
        let binder = InspectionItemBinder;
        let mut item = current_item();
        let pending =
            instance(BusinessType::InspectionItem, "item-5", InstanceStatus::Pending, None);
        binder.can_submit(&item).expect("current items may be submitted");
        binder.on_advance(&mut item, &pending, &role_node(1, "quality_manager"), Utc::now());
        assert_eq!(item.status, "pending_delete");

        let rejected = instance(
            BusinessType::InspectionItem,
            "item-5",
            InstanceStatus::Rejected,
            Some("still referenced by contract CT20260301002"),
        );
        let effects = binder.on_terminal(&mut item, &rejected, Utc::now());
        assert!(effects.is_empty());
        assert_eq!(item.status, "current");
        assert!(item.last_reject_reason.is_some());
        binder.can_submit(&item).expect("item can be proposed for deletion again");
    }

    #[test]
    fn approved_deletion_emits_delete_effect() {
        let binder = InspectionItemBinder;
        let mut item = current_item();
        let approved =
            instance(BusinessType::InspectionItem, "item-5", InstanceStatus::Approved, None);

        let effects = binder.on_terminal(&mut item, &approved, Utc::now());
        assert_eq!(item.status, "deleted");
        assert_eq!(
            effects,
            vec![DownstreamEffect::DeleteInspectionItem { item_id: "item-5".to_owned() }]
        );
    }
}
