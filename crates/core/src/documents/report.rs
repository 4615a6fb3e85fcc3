use serde::{Deserialize, Serialize};

use super::{stage_for_step, DocumentRecord, DownstreamEffect, StatusBinder};
use crate::domain::business::BusinessType;
use crate::domain::flow::ApprovalNode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    PendingReview,
    PendingApproval,
    PendingIssue,
    Issued,
    Rejected,
    Archived,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::PendingApproval => "pending_approval",
            Self::PendingIssue => "pending_issue",
            Self::Issued => "issued",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "draft" => Some(Self::Draft),
            "pending_review" => Some(Self::PendingReview),
            "pending_approval" => Some(Self::PendingApproval),
            "pending_issue" => Some(Self::PendingIssue),
            "issued" => Some(Self::Issued),
            "rejected" => Some(Self::Rejected),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

// review -> approve -> issue
const STAGES: [(&str, &str); 3] = [
    ("report_reviewer", "pending_review"),
    ("report_approver", "pending_approval"),
    ("report_issuer", "pending_issue"),
];

const SUBMITTABLE: [&str; 2] = ["draft", "rejected"];

#[derive(Clone, Copy, Debug, Default)]
pub struct ReportBinder;

impl StatusBinder for ReportBinder {
    fn business_type(&self) -> BusinessType {
        BusinessType::Report
    }

    fn submittable_statuses(&self) -> &'static [&'static str] {
        &SUBMITTABLE
    }

    fn pending_status(&self, step: u32, node: &ApprovalNode) -> &'static str {
        stage_for_step(&STAGES, step, node)
    }

    fn approved_status(&self) -> &'static str {
        ReportStatus::Issued.as_str()
    }

    fn rejected_status(&self) -> &'static str {
        ReportStatus::Rejected.as_str()
    }

    fn approved_effects(&self, document: &DocumentRecord) -> Vec<DownstreamEffect> {
        vec![DownstreamEffect::PublishReport { report_id: document.id.clone() }]
    }
}
