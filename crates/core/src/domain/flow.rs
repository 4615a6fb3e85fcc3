use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::business::BusinessType;
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

/// Who may act on a node. Resolved to concrete identities only when the
/// node becomes the current step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "target_type", content = "target_id", rename_all = "snake_case")]
pub enum NodeTarget {
    Role(String),
    User(String),
    Department(String),
}

impl NodeTarget {
    pub fn target_type(&self) -> &'static str {
        match self {
            Self::Role(_) => "role",
            Self::User(_) => "user",
            Self::Department(_) => "department",
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            Self::Role(id) | Self::User(id) | Self::Department(id) => id,
        }
    }

    pub fn from_parts(target_type: &str, target_id: impl Into<String>) -> Option<Self> {
        let target_id = target_id.into();
        match target_type.trim().to_ascii_lowercase().as_str() {
            "role" => Some(Self::Role(target_id)),
            "user" => Some(Self::User(target_id)),
            "department" | "dept" => Some(Self::Department(target_id)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalNode {
    pub id: NodeId,
    pub name: String,
    pub target: NodeTarget,
    pub target_name: String,
    /// 1-based position within the owning flow.
    pub order: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDraft {
    pub name: String,
    pub target: NodeTarget,
    pub target_name: String,
}

impl NodeDraft {
    pub fn new(
        name: impl Into<String>,
        target: NodeTarget,
        target_name: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), target, target_name: target_name.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePatch {
    pub name: Option<String>,
    pub target: Option<NodeTarget>,
    pub target_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApprovalFlow {
    pub name: String,
    /// Generated from the sequence generator when absent.
    pub code: Option<String>,
    pub business_type: BusinessType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub nodes: Vec<NodeDraft>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub business_type: Option<BusinessType>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub id: FlowId,
    pub name: String,
    pub code: String,
    pub business_type: BusinessType,
    pub description: String,
    pub enabled: bool,
    pub nodes: Vec<ApprovalNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalFlow {
    pub fn create(
        new: NewApprovalFlow,
        code: String,
        now: DateTime<Utc>,
    ) -> Result<Self, WorkflowError> {
        validate_label("name", &new.name)?;
        validate_label("code", &code)?;

        let mut flow = Self {
            id: FlowId(Uuid::new_v4().to_string()),
            name: new.name.trim().to_owned(),
            code: code.trim().to_owned(),
            business_type: new.business_type,
            description: new.description,
            enabled: new.enabled,
            nodes: Vec::with_capacity(new.nodes.len()),
            created_at: now,
            updated_at: now,
        };
        for draft in new.nodes {
            flow.add_node(draft, None, now)?;
        }
        Ok(flow)
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn node_at(&self, step: u32) -> Option<&ApprovalNode> {
        self.nodes.iter().find(|node| node.order == step)
    }

    pub fn is_last_step(&self, step: u32) -> bool {
        step == self.node_count()
    }

    pub fn apply_patch(
        &mut self,
        patch: FlowPatch,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        if let Some(name) = patch.name {
            validate_label("name", &name)?;
            self.name = name.trim().to_owned();
        }
        if let Some(code) = patch.code {
            validate_label("code", &code)?;
            self.code = code.trim().to_owned();
        }
        if let Some(business_type) = patch.business_type {
            self.business_type = business_type;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Inserts at `position` (1-based, clamped to the end) or appends.
    pub fn add_node(
        &mut self,
        draft: NodeDraft,
        position: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<NodeId, WorkflowError> {
        validate_label("node.name", &draft.name)?;
        validate_label("node.target_id", draft.target.target_id())?;

        let id = NodeId(Uuid::new_v4().to_string());
        let node = ApprovalNode {
            id: id.clone(),
            name: draft.name.trim().to_owned(),
            target: draft.target,
            target_name: draft.target_name,
            order: 0,
        };

        let index = match position {
            Some(0) => {
                return Err(WorkflowError::invalid_input("position", "node positions are 1-based"))
            }
            Some(position) => ((position - 1) as usize).min(self.nodes.len()),
            None => self.nodes.len(),
        };
        self.nodes.insert(index, node);
        self.renumber();
        self.updated_at = now;
        Ok(id)
    }

    pub fn update_node(
        &mut self,
        node_id: &NodeId,
        patch: NodePatch,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let flow_id = self.id.0.clone();
        let node = self.nodes.iter_mut().find(|node| &node.id == node_id).ok_or_else(|| {
            WorkflowError::NodeNotFound { flow_id, node: node_id.0.clone() }
        })?;

        if let Some(name) = patch.name {
            validate_label("node.name", &name)?;
            node.name = name.trim().to_owned();
        }
        if let Some(target) = patch.target {
            validate_label("node.target_id", target.target_id())?;
            node.target = target;
        }
        if let Some(target_name) = patch.target_name {
            node.target_name = target_name;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn remove_node(
        &mut self,
        node_id: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<ApprovalNode, WorkflowError> {
        let index = self.nodes.iter().position(|node| &node.id == node_id).ok_or_else(|| {
            WorkflowError::NodeNotFound { flow_id: self.id.0.clone(), node: node_id.0.clone() }
        })?;
        let removed = self.nodes.remove(index);
        self.renumber();
        self.updated_at = now;
        Ok(removed)
    }

    /// `ordered` must name every node of the flow exactly once.
    pub fn reorder(&mut self, ordered: &[NodeId], now: DateTime<Utc>) -> Result<(), WorkflowError> {
        if ordered.len() != self.nodes.len() {
            return Err(WorkflowError::invalid_input(
                "node_ids",
                format!("expected {} node ids, got {}", self.nodes.len(), ordered.len()),
            ));
        }

        let mut remaining = std::mem::take(&mut self.nodes);
        let mut reordered = Vec::with_capacity(remaining.len());
        for node_id in ordered {
            match remaining.iter().position(|node| &node.id == node_id) {
                Some(index) => reordered.push(remaining.remove(index)),
                None => {
                    reordered.append(&mut remaining);
                    self.nodes = reordered;
                    self.renumber();
                    return Err(WorkflowError::NodeNotFound {
                        flow_id: self.id.0.clone(),
                        node: node_id.0.clone(),
                    });
                }
            }
        }

        self.nodes = reordered;
        self.renumber();
        self.updated_at = now;
        Ok(())
    }

    pub fn has_dense_order(&self) -> bool {
        self.nodes.iter().enumerate().all(|(index, node)| node.order == index as u32 + 1)
    }

    fn renumber(&mut self) {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            node.order = index as u32 + 1;
        }
    }
}

fn validate_label(field: &str, value: &str) -> Result<(), WorkflowError> {
    if value.trim().is_empty() {
        return Err(WorkflowError::invalid_input(field, "must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ApprovalFlow, NewApprovalFlow, NodeDraft, NodeId, NodePatch, NodeTarget};
    use crate::domain::business::BusinessType;
    use crate::errors::WorkflowError;

    fn quotation_flow() -> ApprovalFlow {
        ApprovalFlow::create(
            NewApprovalFlow {
                name: "Quotation sign-off".to_owned(),
                code: None,
                business_type: BusinessType::Quotation,
                description: String::new(),
                enabled: true,
                nodes: vec![
                    NodeDraft::new(
                        "Sales manager",
                        NodeTarget::Role("sales_manager".to_owned()),
                        "Sales Manager",
                    ),
                    NodeDraft::new("Finance", NodeTarget::Role("finance".to_owned()), "Finance"),
                    NodeDraft::new(
                        "Lab director",
                        NodeTarget::Role("lab_director".to_owned()),
                        "Lab Director",
                    ),
                ],
            },
            "QUOTE_STD".to_owned(),
            Utc::now(),
        )
        .expect("valid flow")
    }

    fn orders(flow: &ApprovalFlow) -> Vec<(String, u32)> {
        flow.nodes.iter().map(|node| (node.name.clone(), node.order)).collect()
    }

    #[test]
    fn create_numbers_nodes_densely() {
        let flow = quotation_flow();
        assert_eq!(flow.node_count(), 3);
        assert!(flow.has_dense_order());
        assert_eq!(flow.node_at(2).map(|node| node.name.as_str()), Some("Finance"));
        assert!(flow.is_last_step(3));
    }

    #[test]
    fn insert_in_the_middle_renumbers_followers() {
        let mut flow = quotation_flow();
        flow.add_node(
            NodeDraft::new("Quality", NodeTarget::Department("qa".to_owned()), "QA head"),
            Some(2),
            Utc::now(),
        )
        .expect("insert");

        assert!(flow.has_dense_order());
        assert_eq!(
            orders(&flow),
            vec![
                ("Sales manager".to_owned(), 1),
                ("Quality".to_owned(), 2),
                ("Finance".to_owned(), 3),
                ("Lab director".to_owned(), 4),
            ]
        );
    }

    #[test]
    fn position_past_the_end_appends() {
        let mut flow = quotation_flow();
        flow.add_node(
            NodeDraft::new("Archive", NodeTarget::User("u-archivist".to_owned()), "Archivist"),
            Some(99),
            Utc::now(),
        )
        .expect("append");
        assert_eq!(flow.node_at(4).map(|node| node.name.as_str()), Some("Archive"));
    }

    #[test]
    fn remove_closes_the_gap() {
        let mut flow = quotation_flow();
        let finance = flow.nodes[1].id.clone();
        let removed = flow.remove_node(&finance, Utc::now()).expect("remove");

        assert_eq!(removed.name, "Finance");
        assert!(flow.has_dense_order());
        assert_eq!(
            orders(&flow),
            vec![("Sales manager".to_owned(), 1), ("Lab director".to_owned(), 2)]
        );
    }

    #[test]
    fn reorder_requires_a_full_permutation() {
        let mut flow = quotation_flow();
        let ids: Vec<NodeId> = flow.nodes.iter().map(|node| node.id.clone()).collect();

        let error = flow.reorder(&ids[..2], Utc::now()).expect_err("partial list");
        assert!(matches!(error, WorkflowError::InvalidInput { .. }));

        flow.reorder(&[ids[2].clone(), ids[0].clone(), ids[1].clone()], Utc::now())
            .expect("reorder");
        assert_eq!(
            orders(&flow),
            vec![
                ("Lab director".to_owned(), 1),
                ("Sales manager".to_owned(), 2),
                ("Finance".to_owned(), 3),
            ]
        );
    }

    #[test]
    fn reorder_with_unknown_id_keeps_order_dense() {
        let mut flow = quotation_flow();
        let mut ids: Vec<NodeId> = flow.nodes.iter().map(|node| node.id.clone()).collect();
        ids[1] = NodeId("missing".to_owned());

        let error = flow.reorder(&ids, Utc::now()).expect_err("unknown node");
        assert!(matches!(error, WorkflowError::NodeNotFound { .. }));
        assert_eq!(flow.node_count(), 3);
        assert!(flow.has_dense_order());
    }

    #[test]
    fn update_node_changes_target() {
        let mut flow = quotation_flow();
        let first = flow.nodes[0].id.clone();
        flow.update_node(
            &first,
            NodePatch {
                target: Some(NodeTarget::User("u-42".to_owned())),
                target_name: Some("Wang Li".to_owned()),
                ..NodePatch::default()
            },
            Utc::now(),
        )
        .expect("update");

        assert_eq!(flow.nodes[0].target, NodeTarget::User("u-42".to_owned()));
        assert_eq!(flow.nodes[0].target_name, "Wang Li");
        assert_eq!(flow.nodes[0].name, "Sales manager");
    }

    #[test]
    fn blank_names_are_rejected() {
        let mut flow = quotation_flow();
        let error = flow
            .add_node(
                NodeDraft::new("  ", NodeTarget::Role("finance".to_owned()), "Finance"),
                None,
                Utc::now(),
            )
            .expect_err("blank");
        assert!(matches!(
            error,
            WorkflowError::InvalidInput { ref field, .. } if field == "node.name"
        ));
    }

    #[test]
    fn node_target_parts_round_trip() {
        let target = NodeTarget::from_parts("department", "lab-1").expect("known type");
        assert_eq!(target.target_type(), "department");
        assert_eq!(target.target_id(), "lab-1");
        assert_eq!(NodeTarget::from_parts("group", "x"), None);
    }
}
