use serde::{Deserialize, Serialize};

/// A concrete person who may act on an approval step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApproverIdentity {
    pub user_id: String,
    pub display_name: String,
    pub active: bool,
}

impl ApproverIdentity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), display_name: display_name.into(), active: true }
    }
}
