use crate::events::AuditEvent;
use async_trait::async_trait;

/// Trait for emitting structured audit events.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Emit an event.
    async fn emit(&self, event: AuditEvent);
}

/// No-op implementation for when no audit sink is configured.
pub struct NoOpEventEmitter;

#[async_trait]
impl EventEmitter for NoOpEventEmitter {
    async fn emit(&self, _event: AuditEvent) {}
}
