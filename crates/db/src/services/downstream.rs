use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use signoff_core::documents::DownstreamEffect;
use signoff_core::domain::business::BusinessType;
use signoff_core::domain::instance::ApprovalInstance;
use signoff_core::errors::WorkflowError;

use crate::repositories::{DocumentRepository, EffectRepository};

/// Receives the side effects of a final approval. The engine never performs
/// them itself.
#[async_trait]
pub trait DownstreamHook: Send + Sync {
    async fn dispatch(
        &self,
        instance: &ApprovalInstance,
        effects: &[DownstreamEffect],
    ) -> Result<(), WorkflowError>;
}

/// Persists effects to the `downstream_effect` outbox for the host to pick
/// up. Inspection-item deletion is applied directly. Dispatching the same
/// instance again leaves one row per effect kind.
pub struct OutboxDownstreamHook {
    effects: Arc<dyn EffectRepository>,
    documents: Arc<dyn DocumentRepository>,
}

impl OutboxDownstreamHook {
    pub fn new(effects: Arc<dyn EffectRepository>, documents: Arc<dyn DocumentRepository>) -> Self {
        Self { effects, documents }
    }
}

#[async_trait]
impl DownstreamHook for OutboxDownstreamHook {
    async fn dispatch(
        &self,
        instance: &ApprovalInstance,
        effects: &[DownstreamEffect],
    ) -> Result<(), WorkflowError> {
        for effect in effects {
            let id = self.effects.record(&instance.id, effect).await?;

            if let DownstreamEffect::DeleteInspectionItem { item_id } = effect {
                self.documents.delete(BusinessType::InspectionItem, item_id).await?;
                self.effects.mark_applied(id).await?;
            }

            info!(
                event_name = "approval.effect.recorded",
                correlation_id = %instance.id.0,
                business_type = %instance.business_type,
                business_id = %instance.business_id,
                effect = effect.kind(),
                effect_id = id,
                "downstream effect recorded"
            );
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingDownstreamHook {
    dispatched: Arc<Mutex<Vec<DownstreamEffect>>>,
}

impl RecordingDownstreamHook {
    pub fn dispatched(&self) -> Vec<DownstreamEffect> {
        match self.dispatched.lock() {
            Ok(dispatched) => dispatched.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl DownstreamHook for RecordingDownstreamHook {
    async fn dispatch(
        &self,
        _instance: &ApprovalInstance,
        effects: &[DownstreamEffect],
    ) -> Result<(), WorkflowError> {
        match self.dispatched.lock() {
            Ok(mut dispatched) => dispatched.extend_from_slice(effects),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(effects),
        }
        Ok(())
    }
}
