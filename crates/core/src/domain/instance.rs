use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business::{BusinessRef, BusinessType};
use crate::domain::flow::FlowId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Approved,
    Rejected,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Some(Self::Approve),
            "reject" | "rejected" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Position of an instance within its flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPosition {
    At(u32),
    Finished,
}

impl StepPosition {
    /// Storage encoding: the 1-based step, or 0 once finished.
    pub fn to_storage(self) -> i64 {
        match self {
            Self::At(step) => i64::from(step),
            Self::Finished => 0,
        }
    }

    pub fn from_storage(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Finished),
            step if step > 0 => u32::try_from(step).ok().map(Self::At),
            _ => None,
        }
    }

    pub fn step(self) -> Option<u32> {
        match self {
            Self::At(step) => Some(step),
            Self::Finished => None,
        }
    }
}

/// One approver's immutable verdict on one step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub step_order: u32,
    pub node_target_name: String,
    pub actor_id: String,
    pub actor_name: String,
    pub action: DecisionAction,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalInstance {
    pub id: InstanceId,
    pub business_type: BusinessType,
    pub business_id: String,
    pub flow_id: FlowId,
    pub flow_code: String,
    pub submitter_id: String,
    pub submitter_name: String,
    pub current_step: StepPosition,
    pub status: InstanceStatus,
    pub decisions: Vec<Decision>,
    /// Bumped on every committed decision; guards concurrent `act` calls.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalInstance {
    pub fn business_ref(&self) -> BusinessRef {
        BusinessRef::new(self.business_type, self.business_id.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.status == InstanceStatus::Pending
    }

    pub fn last_decision(&self) -> Option<&Decision> {
        self.decisions.last()
    }

    /// Comment of the rejecting decision, if this instance was rejected.
    pub fn rejection_reason(&self) -> Option<&str> {
        if self.status != InstanceStatus::Rejected {
            return None;
        }
        self.decisions
            .iter()
            .rev()
            .find(|decision| decision.action == DecisionAction::Reject)
            .and_then(|decision| decision.comment.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::{DecisionAction, InstanceStatus, StepPosition};

    #[test]
    fn instance_status_round_trips_from_storage_encoding() {
        for status in [InstanceStatus::Pending, InstanceStatus::Approved, InstanceStatus::Rejected]
        {
            assert_eq!(InstanceStatus::parse(status.as_str()), Some(status));
        }
        assert!(!InstanceStatus::Pending.is_terminal());
        assert!(InstanceStatus::Approved.is_terminal());
        assert!(InstanceStatus::Rejected.is_terminal());
    }

    #[test]
    fn step_position_uses_zero_as_finished_sentinel() {
        assert_eq!(StepPosition::from_storage(0), Some(StepPosition::Finished));
        assert_eq!(StepPosition::from_storage(3), Some(StepPosition::At(3)));
        assert_eq!(StepPosition::from_storage(-1), None);
        assert_eq!(StepPosition::At(2).to_storage(), 2);
        assert_eq!(StepPosition::Finished.step(), None);
    }

    #[test]
    fn decision_action_parses_past_tense() {
        assert_eq!(DecisionAction::parse("approved"), Some(DecisionAction::Approve));
        assert_eq!(DecisionAction::parse("REJECT"), Some(DecisionAction::Reject));
        assert_eq!(DecisionAction::parse("escalate"), None);
    }
}
