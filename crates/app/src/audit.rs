use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{error, info};
use ulid::Ulid;

use domain_verify_core::{DomainClaim, EventSink, VerificationEvent};
use domain_verify_storage::{AuditRepository, NewAuditEvent};

/// Audit sink writing verification outcomes to the `audit_events` table.
#[derive(Clone)]
pub struct AuditLog {
    repo: AuditRepository,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AuditLog {
    pub fn new(repo: AuditRepository, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { repo, clock }
    }
}

#[async_trait]
impl EventSink for AuditLog {
    async fn emit(&self, claim: &DomainClaim, event: VerificationEvent) {
        let id = Ulid::new().to_string();
        let record = NewAuditEvent {
            id: &id,
            claim,
            event,
            occurred_at: (self.clock)(),
        };

        match self.repo.append(&record).await {
            Ok(()) => info!(
                stage = "audit",
                event_id = %id,
                claim_id = %claim.id,
                organization_id = %claim.organization_id,
                domain = %claim.domain_name,
                kind = event.as_str(),
                "audit event recorded"
            ),
            Err(err) => {
                counter!("audit_emit_failures_total").increment(1);
                error!(
                    stage = "audit",
                    claim_id = %claim.id,
                    kind = event.as_str(),
                    error = %err,
                    "failed to record audit event"
                );
            }
        }
    }
}
