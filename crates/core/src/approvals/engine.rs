//! Deterministic approval state machine.
//!
//! The engine never touches storage: it validates a request against the
//! current instance and flow, and returns the next instance state together
//! with the decision to append. Persistence layers commit the result with a
//! conditional write keyed on `(current_step, version)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::business::BusinessType;
use crate::domain::flow::{ApprovalFlow, ApprovalNode};
use crate::domain::identity::ApproverIdentity;
use crate::domain::instance::{
    ApprovalInstance, Decision, DecisionAction, InstanceId, InstanceStatus, StepPosition,
};
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub business_type: BusinessType,
    pub business_id: String,
    pub flow_code: String,
    pub submitter_id: String,
    pub submitter_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub instance_id: InstanceId,
    pub actor_id: String,
    pub actor_name: String,
    pub action: DecisionAction,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Advanced { from_step: u32, to_step: u32 },
    Approved { final_step: u32 },
    Rejected { step: u32, reason: String },
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Advanced { .. })
    }
}

/// Result of applying one decision; `expected_*` identify the state the
/// decision was computed against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActOutcome {
    pub instance: ApprovalInstance,
    pub decision: Decision,
    pub transition: Transition,
    pub expected_step: u32,
    pub expected_version: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalEngine;

impl ApprovalEngine {
    pub fn new() -> Self {
        Self
    }

    /// A flow must be enabled and non-empty to accept new submissions.
    pub fn ensure_submittable(&self, flow: &ApprovalFlow) -> Result<(), WorkflowError> {
        if !flow.enabled {
            return Err(WorkflowError::FlowDisabled(flow.code.clone()));
        }
        if flow.nodes.is_empty() {
            return Err(WorkflowError::EmptyFlow(flow.code.clone()));
        }
        Ok(())
    }

    pub fn start(
        &self,
        flow: &ApprovalFlow,
        submission: &Submission,
        now: DateTime<Utc>,
    ) -> Result<ApprovalInstance, WorkflowError> {
        if flow.business_type != submission.business_type {
            return Err(WorkflowError::FlowNotFound {
                business_type: submission.business_type.as_str().to_owned(),
                code: submission.flow_code.clone(),
            });
        }
        self.ensure_submittable(flow)?;
        if submission.business_id.trim().is_empty() {
            return Err(WorkflowError::invalid_input("business_id", "must not be empty"));
        }
        if submission.submitter_id.trim().is_empty() {
            return Err(WorkflowError::invalid_input("submitter_id", "must not be empty"));
        }

        Ok(ApprovalInstance {
            id: InstanceId(Uuid::new_v4().to_string()),
            business_type: submission.business_type,
            business_id: submission.business_id.clone(),
            flow_id: flow.id.clone(),
            flow_code: flow.code.clone(),
            submitter_id: submission.submitter_id.clone(),
            submitter_name: submission.submitter_name.clone(),
            current_step: StepPosition::At(1),
            status: InstanceStatus::Pending,
            decisions: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Checks that need no approver lookup. Returns the current step.
    pub fn precheck(
        &self,
        instance: &ApprovalInstance,
        action: DecisionAction,
        comment: Option<&str>,
    ) -> Result<u32, WorkflowError> {
        let step = match (instance.status, instance.current_step) {
            (InstanceStatus::Pending, StepPosition::At(step)) => step,
            (status, _) => {
                return Err(WorkflowError::InstanceClosed {
                    instance_id: instance.id.0.clone(),
                    status: status.as_str().to_owned(),
                })
            }
        };

        if action == DecisionAction::Reject
            && comment.map(str::trim).filter(|comment| !comment.is_empty()).is_none()
        {
            return Err(WorkflowError::RejectReasonRequired { instance_id: instance.id.0.clone() });
        }

        Ok(step)
    }

    pub fn current_node<'f>(
        &self,
        instance: &ApprovalInstance,
        flow: &'f ApprovalFlow,
    ) -> Result<&'f ApprovalNode, WorkflowError> {
        let step = instance.current_step.step().ok_or_else(|| WorkflowError::InstanceClosed {
            instance_id: instance.id.0.clone(),
            status: instance.status.as_str().to_owned(),
        })?;
        flow.node_at(step).ok_or_else(|| WorkflowError::NodeNotFound {
            flow_id: flow.id.0.clone(),
            node: format!("step {step}"),
        })
    }

    /// Applies `action` by an actor drawn from `approvers`, the identities
    /// resolved for the current step.
    pub fn apply(
        &self,
        instance: &ApprovalInstance,
        flow: &ApprovalFlow,
        approvers: &[ApproverIdentity],
        action: &Action,
        now: DateTime<Utc>,
    ) -> Result<ActOutcome, WorkflowError> {
        let step = self.precheck(instance, action.action, action.comment.as_deref())?;
        let node = self.current_node(instance, flow)?;

        if !approvers.iter().any(|approver| approver.active && approver.user_id == action.actor_id)
        {
            return Err(WorkflowError::NotAuthorizedApprover {
                instance_id: instance.id.0.clone(),
                actor_id: action.actor_id.clone(),
                step,
            });
        }

        let comment = action
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|comment| !comment.is_empty())
            .map(str::to_owned);
        let decision = Decision {
            step_order: step,
            node_target_name: node.target_name.clone(),
            actor_id: action.actor_id.clone(),
            actor_name: action.actor_name.clone(),
            action: action.action,
            comment: comment.clone(),
            decided_at: now,
        };

        let transition = match action.action {
            DecisionAction::Reject => {
                Transition::Rejected { step, reason: comment.unwrap_or_default() }
            }
            DecisionAction::Approve if flow.is_last_step(step) || step >= flow.node_count() => {
                Transition::Approved { final_step: step }
            }
            DecisionAction::Approve => Transition::Advanced { from_step: step, to_step: step + 1 },
        };

        let mut next = instance.clone();
        match &transition {
            Transition::Advanced { to_step, .. } => {
                next.current_step = StepPosition::At(*to_step);
            }
            Transition::Approved { .. } => {
                next.current_step = StepPosition::Finished;
                next.status = InstanceStatus::Approved;
            }
            Transition::Rejected { .. } => {
                next.current_step = StepPosition::Finished;
                next.status = InstanceStatus::Rejected;
            }
        }
        next.decisions.push(decision.clone());
        next.version = instance.version + 1;
        next.updated_at = now;

        Ok(ActOutcome {
            instance: next,
            decision,
            transition,
            expected_step: step,
            expected_version: instance.version,
        })
    }
}
