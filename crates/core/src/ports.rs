//! Collaborator contracts the verification flow depends on.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{DomainClaim, VerificationEvent};

/// Looks up whether a domain currently publishes the expected TXT token.
///
/// Implementations compare record values against the token exactly, after
/// trimming surrounding whitespace. A domain without TXT records is `Ok(false)`,
/// not an error.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, domain: &str, expected_token: &str) -> Result<bool, ResolutionError>;
}

/// Transient DNS failures. Callers treat every variant as "not verified yet".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("dns lookup timed out")]
    Timeout,
    #[error("dns lookup failed: {0}")]
    Lookup(String),
    #[error("malformed dns response: {0}")]
    Malformed(String),
}

impl ResolutionError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Lookup(_) => "lookup",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Durable storage for claims.
#[async_trait]
pub trait DomainClaimStore: Send + Sync {
    async fn insert(&self, claim: &DomainClaim) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<DomainClaim, StoreError>;

    /// All verified claims on the normalized domain name.
    async fn get_verified_claims_by_domain(
        &self,
        domain_name: &str,
    ) -> Result<Vec<DomainClaim>, StoreError>;

    async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<DomainClaim>, StoreError>;

    /// Unverified claims with `attempt_count < max_attempts`, least recently checked first.
    ///
    /// Claims whose domain another organization has already verified are left
    /// out; no automatic attempt can ever succeed for them.
    async fn list_pending(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<DomainClaim>, StoreError>;

    /// Overwrites the stored claim if its revision still equals `claim.revision`.
    ///
    /// Returns the stored snapshot with the bumped revision. Fails with
    /// [`StoreError::Stale`] when another writer got there first and with
    /// [`StoreError::DomainTaken`] when setting `verified_at` would leave two
    /// verified claims on one domain.
    async fn replace(&self, claim: &DomainClaim) -> Result<DomainClaim, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("claim not found")]
    NotFound,
    #[error("claim was modified concurrently")]
    Stale,
    #[error("domain already has a verified claim")]
    DomainTaken,
    #[error("claim with the same id already exists")]
    DuplicateId,
    #[error("organization already has a claim for this domain")]
    DuplicateClaim,
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Append-only audit trail. Delivery problems are the sink's own concern.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, claim: &DomainClaim, event: VerificationEvent);
}
