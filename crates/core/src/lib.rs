pub mod approvals;
pub mod audit;
pub mod concurrency;
pub mod config;
pub mod documents;
pub mod domain;
pub mod errors;
pub mod sequence;

pub use approvals::{
    ActOutcome, Action, ApprovalEngine, ApproverDirectory, DirectoryNodeResolver, NodeResolver,
    ResolutionContext, StaticDirectory, Submission, Transition,
};
pub use concurrency::{RecordKind, RetryPolicy, VersionToken, VersionedRecord};
pub use documents::{BinderRegistry, DocumentRecord, DownstreamEffect, StatusBinder, SyncMark};
pub use domain::business::{BusinessRef, BusinessType};
pub use domain::flow::{
    ApprovalFlow, ApprovalNode, FlowId, FlowPatch, NewApprovalFlow, NodeDraft, NodeId, NodePatch,
    NodeTarget,
};
pub use domain::identity::ApproverIdentity;
pub use domain::instance::{
    ApprovalInstance, Decision, DecisionAction, InstanceId, InstanceStatus, StepPosition,
};
pub use domain::stock::{NewStockItem, StockItem, StockStatus};
pub use domain::task::{TaskState, TestTask};
pub use errors::{ApplicationError, ErrorKind, InterfaceError, WorkflowError};
pub use sequence::{DocumentNumber, Uniqueness};
