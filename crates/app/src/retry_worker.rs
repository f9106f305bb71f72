use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use domain_verify_core::{
    DomainClaim, DomainClaimStore, RetryDecision, RetryPolicy, StoreError, VerificationOutcome,
};

use crate::verification::{VerificationCoordinator, VerifyError};

/// Background worker that re-runs verification for pending claims.
#[derive(Clone)]
pub struct RetryWorker {
    store: Arc<dyn DomainClaimStore>,
    coordinator: VerificationCoordinator,
    policy: RetryPolicy,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    interval: Duration,
    batch_size: u32,
}

/// Tally of a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySweep {
    pub examined: usize,
    pub attempted: usize,
    pub verified: usize,
    pub expired: usize,
    pub waiting: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl RetryWorker {
    pub fn new(
        store: Arc<dyn DomainClaimStore>,
        coordinator: VerificationCoordinator,
        policy: RetryPolicy,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
        interval: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            store,
            coordinator,
            policy,
            clock,
            interval,
            batch_size,
        }
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(sweep) if sweep.examined > 0 => info!(
                    stage = "scheduler",
                    examined = sweep.examined,
                    attempted = sweep.attempted,
                    verified = sweep.verified,
                    expired = sweep.expired,
                    waiting = sweep.waiting,
                    rejected = sweep.rejected,
                    failed = sweep.failed,
                    "retry sweep completed"
                ),
                Ok(_) => {}
                Err(err) => error!(stage = "scheduler", error = %err, "retry sweep failed"),
            }
        }
    }

    /// Executes one sweep over the pending claims.
    pub async fn run_once(&self) -> Result<RetrySweep, RetryWorkerError> {
        let now = (self.clock)();
        let pending = self
            .store
            .list_pending(self.policy.max_attempts, self.batch_size)
            .await?;

        let mut sweep = RetrySweep {
            examined: pending.len(),
            ..RetrySweep::default()
        };

        for claim in pending {
            match self.policy.decide(&claim, now) {
                RetryDecision::Due => self.attempt(&claim, &mut sweep).await,
                RetryDecision::Wait(_) => sweep.waiting += 1,
                // list_pending already filters these; a concurrent writer may have raced us.
                RetryDecision::Verified | RetryDecision::Expired => {}
            }
        }

        Ok(sweep)
    }

    async fn attempt(&self, claim: &DomainClaim, sweep: &mut RetrySweep) {
        sweep.attempted += 1;
        match self.coordinator.verify(claim.id).await {
            Ok(VerificationOutcome::Verified) => sweep.verified += 1,
            Ok(VerificationOutcome::NotYetVerified) => {
                if self.became_expired(claim).await {
                    sweep.expired += 1;
                }
            }
            Err(VerifyError::Conflict(reason)) => {
                sweep.rejected += 1;
                info!(
                    stage = "scheduler",
                    claim_id = %claim.id,
                    domain = %claim.domain_name,
                    reason = reason.as_str(),
                    "automatic verification rejected"
                );
            }
            Err(err) => {
                sweep.failed += 1;
                error!(
                    stage = "scheduler",
                    claim_id = %claim.id,
                    error = %err,
                    "automatic verification failed"
                );
            }
        }
    }

    async fn became_expired(&self, claim: &DomainClaim) -> bool {
        match self.store.get_by_id(claim.id).await {
            Ok(current) if self.policy.is_expired(&current) => {
                counter!("retry_worker_expired_total").increment(1);
                warn!(
                    stage = "scheduler",
                    claim_id = %current.id,
                    organization_id = %current.organization_id,
                    domain = %current.domain_name,
                    attempts = current.attempt_count,
                    "claim expired without verification; automatic retries stop"
                );
                true
            }
            Ok(_) => false,
            Err(err) => {
                warn!(stage = "scheduler", claim_id = %claim.id, error = %err, "failed to reload claim");
                false
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryWorkerError {
    #[error("failed to list pending claims: {0}")]
    ListPending(#[from] StoreError),
}
