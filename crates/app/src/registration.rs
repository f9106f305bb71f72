use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use domain_verify_core::{
    is_domain_unavailable, normalize_domain, DomainClaim, DomainClaimStore, DomainNameError,
    StoreError,
};

pub const TOKEN_PREFIX: &str = "domain-verify=";
const TOKEN_BYTES: usize = 32;

/// Creates new domain claims for organizations.
#[derive(Clone)]
pub struct ClaimRegistrar {
    store: Arc<dyn DomainClaimStore>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl ClaimRegistrar {
    pub fn new(
        store: Arc<dyn DomainClaimStore>,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self { store, clock }
    }

    /// Registers a claim with a freshly generated token.
    pub async fn register(
        &self,
        organization_id: Uuid,
        raw_domain: &str,
    ) -> Result<DomainClaim, RegistrationError> {
        let domain_name = normalize_domain(raw_domain)?;

        let existing = self.store.list_by_organization(organization_id).await?;
        if existing.iter().any(|claim| claim.domain_name == domain_name) {
            return Err(RegistrationError::DuplicateClaim);
        }

        let verified = self
            .store
            .get_verified_claims_by_domain(&domain_name)
            .await?;
        if is_domain_unavailable(organization_id, &verified) {
            return Err(RegistrationError::DomainUnavailable);
        }

        let claim = DomainClaim::new(
            Uuid::new_v4(),
            organization_id,
            domain_name,
            generate_token(),
            (self.clock)(),
        );
        self.store.insert(&claim).await.map_err(|err| match err {
            StoreError::DuplicateClaim => RegistrationError::DuplicateClaim,
            other => RegistrationError::Storage(other),
        })?;

        info!(
            stage = "app",
            claim_id = %claim.id,
            organization_id = %organization_id,
            domain = %claim.domain_name,
            "domain claim registered"
        );
        Ok(claim)
    }
}

/// Generates a fresh, unguessable TXT token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid domain name: {0}")]
    InvalidDomain(#[from] DomainNameError),
    #[error("organization already has a claim for this domain")]
    DuplicateClaim,
    #[error("domain not available to be claimed")]
    DomainUnavailable,
    #[error("failed to store claim: {0}")]
    Storage(#[from] StoreError),
}
