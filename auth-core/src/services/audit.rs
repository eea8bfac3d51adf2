//! Best-effort audit logging.
//!
//! Audit is a log, not a transactional gate: a write failure never blocks the
//! authentication decision, but it is surfaced to operational monitoring via
//! an error-level trace event.

use std::sync::Arc;

use crate::models::AuditEvent;
use crate::store::AuditStore;

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn AuditStore> {
        self.store.clone()
    }

    /// Append an event. Persistence failures are logged and swallowed.
    pub async fn record(&self, event: AuditEvent) {
        tracing::debug!(
            kind = event.kind.as_str(),
            username = %event.username,
            success = event.success,
            risk_score = event.risk_score,
            "audit event"
        );
        if let Err(e) = self.store.append(&event).await {
            tracing::error!(
                error = %e,
                kind = event.kind.as_str(),
                username = %event.username,
                "Failed to persist audit event"
            );
        }
    }
}
