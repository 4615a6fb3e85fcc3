use rust_decimal::Decimal;
use thiserror::Error;

/// Stable classification of every workflow failure. Hosts translate these
/// into user-facing messages; the core only reports kind plus context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Authorization,
    Configuration,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Authorization => "authorization",
            Self::Configuration => "configuration",
            Self::Persistence => "persistence",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("rejecting instance `{instance_id}` requires a non-empty comment")]
    RejectReasonRequired { instance_id: String },
    #[error("invalid input for `{field}`: {message}")]
    InvalidInput { field: String, message: String },
    #[error("{business_type} `{business_id}` cannot be submitted from status `{status}`")]
    DocumentNotSubmittable { business_type: String, business_id: String, status: String },

    #[error("no approval flow `{code}` for business type {business_type}")]
    FlowNotFound { business_type: String, code: String },
    #[error("approval flow `{0}` not found")]
    FlowIdNotFound(String),
    #[error("node `{node}` not found in approval flow `{flow_id}`")]
    NodeNotFound { flow_id: String, node: String },
    #[error("approval instance `{0}` not found")]
    InstanceNotFound(String),
    #[error("{business_type} `{business_id}` not found")]
    DocumentNotFound { business_type: String, business_id: String },
    #[error("{kind} `{id}` not found")]
    RecordNotFound { kind: String, id: String },

    #[error("{business_type} `{business_id}` already has pending approval instance")]
    AlreadyPending { business_type: String, business_id: String },
    #[error("instance `{instance_id}` is no longer at step {expected_step}")]
    AlreadyActed { instance_id: String, expected_step: u32 },
    #[error("instance `{instance_id}` is already {status}")]
    InstanceClosed { instance_id: String, status: String },
    #[error("{kind} `{id}` was modified concurrently (expected version {expected})")]
    VersionConflict { kind: String, id: String, expected: String },
    #[error("approval flow code `{0}` is already in use")]
    DuplicateFlowCode(String),
    #[error("approval flow `{0}` still has pending instances")]
    FlowInUse(String),
    #[error("stock item `{id}` has {available}, cannot remove {requested}")]
    InsufficientStock { id: String, available: Decimal, requested: Decimal },
    #[error("{kind} `{id}` still conflicting after {attempts} attempts")]
    RetriesExhausted { kind: String, id: String, attempts: u32 },

    #[error("`{actor_id}` is not an approver for step {step} of instance `{instance_id}`")]
    NotAuthorizedApprover { instance_id: String, actor_id: String, step: u32 },

    #[error("approval flow `{0}` is disabled")]
    FlowDisabled(String),
    #[error("approval flow `{0}` has no nodes")]
    EmptyFlow(String),
    #[error("no approver found for {target_type} `{target_id}`")]
    NoApproverFound { target_type: String, target_id: String },
    #[error("no status binder registered for {0}")]
    NoBinder(String),
    #[error("sequence counter store unavailable for prefix `{prefix}`: {message}")]
    SequenceUnavailable { prefix: String, message: String },

    #[error("approver directory failure: {0}")]
    Directory(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error(
        "instance `{instance_id}` committed; {business_type} `{business_id}` not updated: {reason}"
    )]
    DocumentOutOfSync {
        business_type: String,
        business_id: String,
        instance_id: String,
        reason: String,
    },
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RejectReasonRequired { .. }
            | Self::InvalidInput { .. }
            | Self::DocumentNotSubmittable { .. } => ErrorKind::Validation,
            Self::FlowNotFound { .. }
            | Self::FlowIdNotFound(_)
            | Self::NodeNotFound { .. }
            | Self::InstanceNotFound(_)
            | Self::DocumentNotFound { .. }
            | Self::RecordNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyPending { .. }
            | Self::AlreadyActed { .. }
            | Self::InstanceClosed { .. }
            | Self::VersionConflict { .. }
            | Self::DuplicateFlowCode(_)
            | Self::FlowInUse(_)
            | Self::InsufficientStock { .. }
            | Self::RetriesExhausted { .. } => ErrorKind::Conflict,
            Self::NotAuthorizedApprover { .. } => ErrorKind::Authorization,
            Self::FlowDisabled(_)
            | Self::EmptyFlow(_)
            | Self::NoApproverFound { .. }
            | Self::NoBinder(_) => ErrorKind::Configuration,
            Self::SequenceUnavailable { .. }
            | Self::Directory(_)
            | Self::Persistence(_)
            | Self::DocumentOutOfSync { .. } => ErrorKind::Persistence,
        }
    }

    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput { field: field.into(), message: message.into() }
    }

    /// Conflicts are expected under concurrent use; callers re-fetch and retry.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record changed while you were working on it. Reload and try again."
            }
            Self::Forbidden { .. } => "You are not an approver for the current step.",
            Self::Unprocessable { .. } => {
                "The approval flow is not configured correctly. Contact an administrator."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Workflow(error) => {
                let message = error.to_string();
                match error.kind() {
                    ErrorKind::Validation => Self::BadRequest { message, correlation_id },
                    ErrorKind::NotFound => Self::NotFound { message, correlation_id },
                    ErrorKind::Conflict => Self::Conflict { message, correlation_id },
                    ErrorKind::Authorization => Self::Forbidden { message, correlation_id },
                    ErrorKind::Configuration => Self::Unprocessable { message, correlation_id },
                    ErrorKind::Persistence => {
                        Self::ServiceUnavailable { message, correlation_id }
                    }
                }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, ErrorKind, InterfaceError, WorkflowError};

    #[test]
    fn validation_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(WorkflowError::RejectReasonRequired {
            instance_id: "inst-1".to_owned(),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn conflicts_are_recoverable_and_map_to_conflict() {
        let error = WorkflowError::AlreadyPending {
            business_type: "quotation".to_owned(),
            business_id: "QT20260301001".to_owned(),
        };
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(error.is_recoverable());

        let interface = ApplicationError::from(error).into_interface("req-2");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn authorization_and_configuration_errors_are_classified() {
        let unauthorized = WorkflowError::NotAuthorizedApprover {
            instance_id: "inst-1".to_owned(),
            actor_id: "u-9".to_owned(),
            step: 2,
        };
        assert_eq!(unauthorized.kind(), ErrorKind::Authorization);
        assert!(!unauthorized.is_recoverable());

        let headless = WorkflowError::NoApproverFound {
            target_type: "department".to_owned(),
            target_id: "lab".to_owned(),
        };
        assert_eq!(headless.kind(), ErrorKind::Configuration);
        assert!(matches!(
            ApplicationError::from(headless).into_interface("req-3"),
            InterfaceError::Unprocessable { .. }
        ));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::from(WorkflowError::Persistence("database lock timeout".to_owned()))
                .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("bad pad length".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
