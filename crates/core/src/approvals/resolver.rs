use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::business::BusinessType;
use crate::domain::flow::{ApprovalNode, NodeTarget};
use crate::domain::identity::ApproverIdentity;
use crate::errors::WorkflowError;

/// The host's identity/role directory.
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    async fn find_users_by_role(
        &self,
        role_code: &str,
    ) -> Result<Vec<ApproverIdentity>, WorkflowError>;
    async fn find_department_head(
        &self,
        department_id: &str,
    ) -> Result<Option<ApproverIdentity>, WorkflowError>;
    async fn get_user(&self, user_id: &str) -> Result<Option<ApproverIdentity>, WorkflowError>;
}

#[async_trait]
impl<D> ApproverDirectory for Arc<D>
where
    D: ApproverDirectory + ?Sized,
{
    async fn find_users_by_role(
        &self,
        role_code: &str,
    ) -> Result<Vec<ApproverIdentity>, WorkflowError> {
        (**self).find_users_by_role(role_code).await
    }

    async fn find_department_head(
        &self,
        department_id: &str,
    ) -> Result<Option<ApproverIdentity>, WorkflowError> {
        (**self).find_department_head(department_id).await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<ApproverIdentity>, WorkflowError> {
        (**self).get_user(user_id).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionContext {
    pub business_type: BusinessType,
    pub business_id: String,
    pub submitter_id: String,
}

/// Turns a node definition into the identities allowed to act on it.
/// Called whenever a step becomes current, so directory changes apply to
/// later steps of long-running instances.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    async fn resolve(
        &self,
        node: &ApprovalNode,
        context: &ResolutionContext,
    ) -> Result<Vec<ApproverIdentity>, WorkflowError>;
}

pub struct DirectoryNodeResolver<D> {
    directory: D,
}

impl<D> DirectoryNodeResolver<D>
where
    D: ApproverDirectory,
{
    pub fn new(directory: D) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl<D> NodeResolver for DirectoryNodeResolver<D>
where
    D: ApproverDirectory,
{
    async fn resolve(
        &self,
        node: &ApprovalNode,
        _context: &ResolutionContext,
    ) -> Result<Vec<ApproverIdentity>, WorkflowError> {
        let resolved: Vec<ApproverIdentity> = match &node.target {
            NodeTarget::Role(role_code) => self
                .directory
                .find_users_by_role(role_code)
                .await?
                .into_iter()
                .filter(|identity| identity.active)
                .collect(),
            NodeTarget::User(user_id) => self
                .directory
                .get_user(user_id)
                .await?
                .filter(|identity| identity.active)
                .into_iter()
                .collect(),
            NodeTarget::Department(department_id) => self
                .directory
                .find_department_head(department_id)
                .await?
                .filter(|identity| identity.active)
                .into_iter()
                .collect(),
        };

        if resolved.is_empty() {
            return Err(no_approver(&node.target));
        }
        Ok(resolved)
    }
}

fn no_approver(target: &NodeTarget) -> WorkflowError {
    WorkflowError::NoApproverFound {
        target_type: target.target_type().to_owned(),
        target_id: target.target_id().to_owned(),
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: BTreeMap<String, ApproverIdentity>,
    roles: BTreeMap<String, BTreeSet<String>>,
    department_heads: BTreeMap<String, String>,
}

/// In-process directory for tests, seeds and single-binary deployments.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user_id: &str, display_name: &str, roles: &[&str]) -> Self {
        self.upsert_user(ApproverIdentity::new(user_id, display_name), roles);
        self
    }

    pub fn with_department_head(self, department_id: &str, user_id: &str) -> Self {
        self.assign_department_head(department_id, user_id);
        self
    }

    pub fn upsert_user(&self, identity: ApproverIdentity, roles: &[&str]) {
        self.write(|state| {
            for members in state.roles.values_mut() {
                members.remove(&identity.user_id);
            }
            for role in roles {
                state
                    .roles
                    .entry((*role).to_owned())
                    .or_default()
                    .insert(identity.user_id.clone());
            }
            state.users.insert(identity.user_id.clone(), identity);
        });
    }

    pub fn assign_department_head(&self, department_id: &str, user_id: &str) {
        self.write(|state| {
            state.department_heads.insert(department_id.to_owned(), user_id.to_owned());
        });
    }

    pub fn set_active(&self, user_id: &str, active: bool) {
        self.write(|state| {
            if let Some(identity) = state.users.get_mut(user_id) {
                identity.active = active;
            }
        });
    }

    fn read<T>(&self, f: impl FnOnce(&DirectoryState) -> T) -> T {
        match self.state.read() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write(&self, f: impl FnOnce(&mut DirectoryState)) {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl ApproverDirectory for StaticDirectory {
    async fn find_users_by_role(
        &self,
        role_code: &str,
    ) -> Result<Vec<ApproverIdentity>, WorkflowError> {
        Ok(self.read(|state| {
            state
                .roles
                .get(role_code)
                .map(|members| {
                    members.iter().filter_map(|user_id| state.users.get(user_id).cloned()).collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn find_department_head(
        &self,
        department_id: &str,
    ) -> Result<Option<ApproverIdentity>, WorkflowError> {
        Ok(self.read(|state| {
            state
                .department_heads
                .get(department_id)
                .and_then(|user_id| state.users.get(user_id).cloned())
        }))
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<ApproverIdentity>, WorkflowError> {
        Ok(self.read(|state| state.users.get(user_id).cloned()))
    }
}
