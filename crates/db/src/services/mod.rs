use std::sync::Arc;

use crate::repositories::{
    DocumentRepository, EffectRepository, FlowRepository, InMemoryDocumentRepository,
    InMemoryEffectRepository, InMemoryFlowRepository, InMemoryInstanceRepository,
    InMemorySequenceRepository, InstanceRepository, SequenceRepository, SqlDocumentRepository,
    SqlEffectRepository, SqlFlowRepository, SqlInstanceRepository, SqlSequenceRepository,
};
use crate::DbPool;

pub mod approval;
pub mod downstream;
pub mod flows;
pub mod guard;
pub mod sequence;

pub use approval::ApprovalService;
pub use downstream::{DownstreamHook, OutboxDownstreamHook, RecordingDownstreamHook};
pub use flows::FlowAdminService;
pub use guard::OptimisticGuard;
pub use sequence::SequenceGenerator;

/// The repositories the workflow services share.
#[derive(Clone)]
pub struct Stores {
    pub flows: Arc<dyn FlowRepository>,
    pub instances: Arc<dyn InstanceRepository>,
    pub documents: Arc<dyn DocumentRepository>,
    pub sequences: Arc<dyn SequenceRepository>,
    pub effects: Arc<dyn EffectRepository>,
}

impl Stores {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            flows: Arc::new(SqlFlowRepository::new(pool.clone())),
            instances: Arc::new(SqlInstanceRepository::new(pool.clone())),
            documents: Arc::new(SqlDocumentRepository::new(pool.clone())),
            sequences: Arc::new(SqlSequenceRepository::new(pool.clone())),
            effects: Arc::new(SqlEffectRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let instances = Arc::new(InMemoryInstanceRepository::default());
        Self {
            flows: Arc::new(InMemoryFlowRepository::tracking(instances.clone())),
            instances,
            documents: Arc::new(InMemoryDocumentRepository::default()),
            sequences: Arc::new(InMemorySequenceRepository::default()),
            effects: Arc::new(InMemoryEffectRepository::default()),
        }
    }
}
