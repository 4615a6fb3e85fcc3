use serde::{Deserialize, Serialize};

use super::StatusBinder;
use crate::domain::business::BusinessType;
use crate::domain::flow::ApprovalNode;
use crate::domain::instance::{ApprovalInstance, InstanceId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Draft,
    PendingEvaluation,
    Approved,
    Rejected,
}

impl ConsultationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingEvaluation => "pending_evaluation",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "draft" => Some(Self::Draft),
            "pending_evaluation" => Some(Self::PendingEvaluation),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

const SUBMITTABLE: [&str; 2] = ["draft", "rejected"];

#[derive(Clone, Copy, Debug, Default)]
pub struct ConsultationBinder;

impl StatusBinder for ConsultationBinder {
    fn business_type(&self) -> BusinessType {
        BusinessType::ConsultationAssessment
    }

    fn submittable_statuses(&self) -> &'static [&'static str] {
        &SUBMITTABLE
    }

    fn pending_status(&self, _step: u32, _node: &ApprovalNode) -> &'static str {
        ConsultationStatus::PendingEvaluation.as_str()
    }

    fn approved_status(&self) -> &'static str {
        ConsultationStatus::Approved.as_str()
    }

    fn rejected_status(&self) -> &'static str {
        ConsultationStatus::Rejected.as_str()
    }
}

/// 1-based evaluation round of `instance_id` among all instances of one
/// document, which must be in creation order.
pub fn evaluation_round(instances: &[ApprovalInstance], instance_id: &InstanceId) -> Option<u32> {
    instances
        .iter()
        .position(|instance| &instance.id == instance_id)
        .map(|index| index as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::evaluation_round;
    use crate::documents::test_support::instance;
    use crate::domain::business::BusinessType;
    use crate::domain::instance::{InstanceId, InstanceStatus};

    #[test]
    fn rounds_follow_creation_order() {
        let mut first = instance(
            BusinessType::ConsultationAssessment,
            "ca-1",
            InstanceStatus::Rejected,
            Some("scope unclear"),
        );
        first.id = InstanceId("inst-a".to_owned());
        let mut second =
            instance(BusinessType::ConsultationAssessment, "ca-1", InstanceStatus::Pending, None);
        second.id = InstanceId("inst-b".to_owned());
        let history = vec![first, second];

        assert_eq!(evaluation_round(&history, &InstanceId("inst-a".to_owned())), Some(1));
        assert_eq!(evaluation_round(&history, &InstanceId("inst-b".to_owned())), Some(2));
        assert_eq!(evaluation_round(&history, &InstanceId("inst-z".to_owned())), None);
    }
}
