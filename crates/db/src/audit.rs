use tracing::{info, warn};

use signoff_core::audit::{AuditEvent, AuditOutcome, AuditSink};

/// Writes audit events to the structured log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let (business_type, business_id) = match &event.business {
            Some(business) => (business.business_type.as_str(), business.business_id.as_str()),
            None => ("none", "none"),
        };
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                audit_event_id = %event.event_id,
                business_type,
                business_id,
                category = ?event.category,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                audit_event_id = %event.event_id,
                business_type,
                business_id,
                category = ?event.category,
                outcome = ?event.outcome,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}
