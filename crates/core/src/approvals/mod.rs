pub mod engine;
pub mod resolver;

pub use engine::{ActOutcome, Action, ApprovalEngine, Submission, Transition};
pub use resolver::{
    ApproverDirectory, DirectoryNodeResolver, NodeResolver, ResolutionContext, StaticDirectory,
};
