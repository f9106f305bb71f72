use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use domain_verify_core::{
    find_conflict, ConflictReason, DnsResolver, DomainClaim, DomainClaimStore, EventSink,
    ResolutionError, StoreError, VerificationEvent, VerificationOutcome,
};

/// Attempts at the read-modify-write cycle before a write race is reported as fatal.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Runs verification attempts against stored claims.
#[derive(Clone)]
pub struct VerificationCoordinator {
    store: Arc<dyn DomainClaimStore>,
    resolver: Arc<dyn DnsResolver>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    dns_timeout: Duration,
}

impl VerificationCoordinator {
    pub fn new(
        store: Arc<dyn DomainClaimStore>,
        resolver: Arc<dyn DnsResolver>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
        dns_timeout: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            events,
            clock,
            dns_timeout,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Performs one verification attempt for the claim.
    ///
    /// Resolver failures never surface here; they are recorded as an ordinary
    /// unsuccessful attempt. Every path except `NotFound` persists the claim.
    pub async fn verify(&self, claim_id: Uuid) -> Result<VerificationOutcome, VerifyError> {
        let claim = self.store.get_by_id(claim_id).await?;

        if claim.is_verified() {
            return self.reject(claim, ConflictReason::AlreadyVerified).await;
        }

        let verified = self
            .store
            .get_verified_claims_by_domain(&claim.domain_name)
            .await?;
        if let Some(owner) = find_conflict(claim.organization_id, &verified) {
            info!(
                stage = "verify",
                claim_id = %claim.id,
                domain = %claim.domain_name,
                owner_claim_id = %owner.id,
                "domain already verified by another organization"
            );
            return self.reject(claim, ConflictReason::DomainUnavailable).await;
        }

        let matched = self.resolve(&claim).await;
        self.record_attempt(claim, matched).await
    }

    async fn resolve(&self, claim: &DomainClaim) -> bool {
        let start = Instant::now();
        let lookup = self.resolver.resolve(&claim.domain_name, &claim.token);
        let result = match timeout(self.dns_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(ResolutionError::Timeout),
        };
        histogram!("dns_lookup_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(matched) => matched,
            Err(err) => {
                counter!("dns_resolution_errors_total", "kind" => err.kind()).increment(1);
                warn!(
                    stage = "dns",
                    claim_id = %claim.id,
                    domain = %claim.domain_name,
                    error = %err,
                    "txt resolution failed; recording attempt as not verified"
                );
                false
            }
        }
    }

    async fn record_attempt(
        &self,
        mut claim: DomainClaim,
        matched: bool,
    ) -> Result<VerificationOutcome, VerifyError> {
        let now = self.now();

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut next = claim.clone();
            next.record_attempt(now, matched);

            match self.store.replace(&next).await {
                Ok(stored) => {
                    let outcome = if stored.is_verified() {
                        VerificationOutcome::Verified
                    } else {
                        VerificationOutcome::NotYetVerified
                    };
                    counter!("domain_verification_attempts_total", "outcome" => outcome.as_str())
                        .increment(1);
                    info!(
                        stage = "verify",
                        claim_id = %stored.id,
                        domain = %stored.domain_name,
                        attempt = stored.attempt_count,
                        outcome = outcome.as_str(),
                        "verification attempt recorded"
                    );
                    self.events
                        .emit(&stored, VerificationEvent::from_outcome(outcome))
                        .await;
                    return Ok(outcome);
                }
                Err(StoreError::Stale) => {
                    counter!("claim_replace_conflicts_total").increment(1);
                    claim = self.store.get_by_id(claim.id).await?;
                    if claim.is_verified() {
                        return self.reject(claim, ConflictReason::AlreadyVerified).await;
                    }
                }
                Err(StoreError::DomainTaken) => {
                    info!(
                        stage = "verify",
                        claim_id = %claim.id,
                        domain = %claim.domain_name,
                        "domain was verified by another claim during the attempt"
                    );
                    return self.reject(claim, ConflictReason::DomainUnavailable).await;
                }
                Err(err) => return Err(self.persistence_failure(&claim, err)),
            }
        }

        Err(self.persistence_failure(&claim, StoreError::Stale))
    }

    /// Persists the check timestamp for a rejected request and returns the conflict.
    async fn reject(
        &self,
        mut claim: DomainClaim,
        reason: ConflictReason,
    ) -> Result<VerificationOutcome, VerifyError> {
        let now = self.now();

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut next = claim.clone();
            next.record_check(now);

            match self.store.replace(&next).await {
                Ok(_) => {
                    counter!("domain_verification_conflicts_total", "reason" => reason.as_str())
                        .increment(1);
                    return Err(VerifyError::Conflict(reason));
                }
                Err(StoreError::Stale) => {
                    counter!("claim_replace_conflicts_total").increment(1);
                    claim = self.store.get_by_id(claim.id).await?;
                }
                Err(err) => return Err(self.persistence_failure(&claim, err)),
            }
        }

        Err(self.persistence_failure(&claim, StoreError::Stale))
    }

    fn persistence_failure(&self, claim: &DomainClaim, err: StoreError) -> VerifyError {
        error!(
            stage = "storage",
            claim_id = %claim.id,
            error = %err,
            "failed to persist verification attempt"
        );
        VerifyError::from(err)
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("claim not found")]
    NotFound,
    #[error("{0}")]
    Conflict(ConflictReason),
    #[error("failed to persist claim: {0}")]
    Persistence(#[source] StoreError),
}

impl From<StoreError> for VerifyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            other => Self::Persistence(other),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;
    use tokio::sync::Barrier;
    use uuid::Uuid;

    use domain_verify_core::{
        DnsResolver, DomainClaim, DomainClaimStore, EventSink, ResolutionError, StoreError,
        VerificationEvent,
    };
    use domain_verify_storage::{ClaimRepository, Database};

    pub async fn setup_db() -> (TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("app.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        (dir, db)
    }

    pub fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    pub async fn insert_claim(db: &Database, organization_id: Uuid, domain: &str) -> DomainClaim {
        let claim = DomainClaim::new(
            Uuid::new_v4(),
            organization_id,
            domain,
            format!("domain-verify={}", Uuid::new_v4().simple()),
            base_time(),
        );
        db.claims().insert(&claim).await.expect("insert claim");
        claim
    }

    /// Resolver double returning a fixed answer and counting calls.
    pub struct StaticResolver {
        answer: Result<bool, ResolutionError>,
        calls: AtomicUsize,
    }

    impl StaticResolver {
        pub fn new(answer: Result<bool, ResolutionError>) -> Self {
            Self {
                answer,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DnsResolver for StaticResolver {
        async fn resolve(&self, _domain: &str, _token: &str) -> Result<bool, ResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    /// Resolver that never answers within any reasonable timeout.
    pub struct HangingResolver;

    #[async_trait]
    impl DnsResolver for HangingResolver {
        async fn resolve(&self, _domain: &str, _token: &str) -> Result<bool, ResolutionError> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(true)
        }
    }

    /// Resolver that holds every caller until `parties` lookups are in flight.
    pub struct BarrierResolver {
        barrier: Barrier,
        answer: bool,
    }

    impl BarrierResolver {
        pub fn new(parties: usize) -> Self {
            Self {
                barrier: Barrier::new(parties),
                answer: true,
            }
        }

        pub fn unmatched(parties: usize) -> Self {
            Self {
                barrier: Barrier::new(parties),
                answer: false,
            }
        }
    }

    #[async_trait]
    impl DnsResolver for BarrierResolver {
        async fn resolve(&self, _domain: &str, _token: &str) -> Result<bool, ResolutionError> {
            self.barrier.wait().await;
            Ok(self.answer)
        }
    }

    #[derive(Debug, Clone, Copy)]
    pub enum Fault {
        Backend,
        Stale,
    }

    /// SQLite-backed store whose `replace` always fails with the given fault.
    pub struct FaultyStore {
        inner: ClaimRepository,
        fault: Fault,
        replace_calls: AtomicUsize,
    }

    impl FaultyStore {
        pub fn new(inner: ClaimRepository, fault: Fault) -> Self {
            Self {
                inner,
                fault,
                replace_calls: AtomicUsize::new(0),
            }
        }

        pub fn replace_calls(&self) -> usize {
            self.replace_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DomainClaimStore for FaultyStore {
        async fn insert(&self, claim: &DomainClaim) -> Result<(), StoreError> {
            self.inner.insert(claim).await
        }

        async fn get_by_id(&self, id: Uuid) -> Result<DomainClaim, StoreError> {
            self.inner.get_by_id(id).await
        }

        async fn get_verified_claims_by_domain(
            &self,
            domain_name: &str,
        ) -> Result<Vec<DomainClaim>, StoreError> {
            self.inner.get_verified_claims_by_domain(domain_name).await
        }

        async fn list_by_organization(
            &self,
            organization_id: Uuid,
        ) -> Result<Vec<DomainClaim>, StoreError> {
            self.inner.list_by_organization(organization_id).await
        }

        async fn list_pending(
            &self,
            max_attempts: u32,
            limit: u32,
        ) -> Result<Vec<DomainClaim>, StoreError> {
            self.inner.list_pending(max_attempts, limit).await
        }

        async fn replace(&self, _claim: &DomainClaim) -> Result<DomainClaim, StoreError> {
            self.replace_calls.fetch_add(1, Ordering::SeqCst);
            Err(match self.fault {
                Fault::Backend => StoreError::Backend("disk I/O error".into()),
                Fault::Stale => StoreError::Stale,
            })
        }
    }

    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<(Uuid, VerificationEvent)>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<(Uuid, VerificationEvent)> {
            self.events.lock().expect("sink lock").clone()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn emit(&self, claim: &DomainClaim, event: VerificationEvent) {
            self.events
                .lock()
                .expect("sink lock")
                .push((claim.id, event));
        }
    }

    pub async fn load(db: &Database, id: Uuid) -> DomainClaim {
        db.claims().get_by_id(id).await.expect("load claim")
    }
}
