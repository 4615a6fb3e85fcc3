use serde::{Deserialize, Serialize};

use crate::concurrency::{RecordKind, VersionToken, VersionedRecord};
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    fn for_progress(progress_pct: u8) -> Self {
        match progress_pct {
            0 => Self::Pending,
            100 => Self::Completed,
            _ => Self::InProgress,
        }
    }
}

/// A test task spawned from an entrustment; several lab staff update it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTask {
    pub id: String,
    pub title: String,
    pub assignee_id: Option<String>,
    pub progress_pct: u8,
    pub state: TaskState,
    pub version: VersionToken,
}

impl TestTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            assignee_id: None,
            progress_pct: 0,
            state: TaskState::Pending,
            version: VersionToken::now(),
        }
    }

    pub fn set_progress(&mut self, progress_pct: u8) -> Result<(), WorkflowError> {
        if progress_pct > 100 {
            return Err(WorkflowError::invalid_input(
                "progress_pct",
                format!("{progress_pct} is above 100"),
            ));
        }
        self.progress_pct = progress_pct;
        self.state = TaskState::for_progress(progress_pct);
        Ok(())
    }
}

impl VersionedRecord for TestTask {
    const KIND: RecordKind = RecordKind::TestTask;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> VersionToken {
        self.version
    }

    fn set_version(&mut self, version: VersionToken) {
        self.version = version;
    }

    fn refresh_derived(&mut self) {
        self.state = TaskState::for_progress(self.progress_pct);
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskState, TestTask};

    #[test]
    fn progress_drives_state() {
        let mut task = TestTask::new("T-1", "Heavy metals, batch 7");
        task.set_progress(40).expect("valid");
        assert_eq!(task.state, TaskState::InProgress);
        task.set_progress(100).expect("valid");
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.set_progress(101).is_err());
        assert_eq!(task.progress_pct, 100);
    }
}
