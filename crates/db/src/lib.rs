pub mod audit;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod services;

pub use audit::TracingAuditSink;
pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{FlowSeedInfo, SeedDataset, SeedResult, VerificationResult};
pub use services::{
    ApprovalService, DownstreamHook, FlowAdminService, OptimisticGuard, OutboxDownstreamHook,
    RecordingDownstreamHook, SequenceGenerator, Stores,
};
