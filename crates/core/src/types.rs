use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An organization's assertion of ownership over a domain name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainClaim {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Normalized domain, see [`crate::domain::normalize_domain`].
    pub domain_name: String,
    /// Value the organization must publish as a TXT record on `domain_name`.
    pub token: String,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by every successful replace.
    pub revision: u64,
}

impl DomainClaim {
    /// Creates a fresh, unverified claim.
    pub fn new(
        id: Uuid,
        organization_id: Uuid,
        domain_name: impl Into<String>,
        token: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            organization_id,
            domain_name: domain_name.into(),
            token: token.into(),
            verified_at: None,
            last_checked_at: None,
            attempt_count: 0,
            created_at,
            revision: 0,
        }
    }

    /// Returns `true` once the claim reached the terminal verified state.
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    /// Marks a rejected operation against the claim. Only the check timestamp moves.
    pub fn record_check(&mut self, now: DateTime<Utc>) {
        self.last_checked_at = Some(now);
    }

    /// Applies the result of one DNS-backed attempt.
    ///
    /// Returns `true` when this attempt is the one that verified the claim.
    /// An existing `verified_at` is never overwritten.
    pub fn record_attempt(&mut self, now: DateTime<Utc>, matched: bool) -> bool {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_checked_at = Some(now);
        if matched && self.verified_at.is_none() {
            self.verified_at = Some(now);
            return true;
        }
        false
    }
}

/// Successful result of a verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    NotYetVerified,
}

impl VerificationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::NotYetVerified => "not_yet_verified",
        }
    }
}

/// Why a verification request was rejected without a DNS attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    AlreadyVerified,
    DomainUnavailable,
}

impl ConflictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyVerified => "already_verified",
            Self::DomainUnavailable => "domain_unavailable",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyVerified => f.write_str("domain has already been verified"),
            Self::DomainUnavailable => f.write_str("domain not available to be claimed"),
        }
    }
}

/// Audit event emitted once per verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationEvent {
    DomainVerified,
    DomainNotVerified,
}

impl VerificationEvent {
    /// Canonical representation used in the audit table and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DomainVerified => "domain_verified",
            Self::DomainNotVerified => "domain_not_verified",
        }
    }

    pub fn from_outcome(outcome: VerificationOutcome) -> Self {
        match outcome {
            VerificationOutcome::Verified => Self::DomainVerified,
            VerificationOutcome::NotYetVerified => Self::DomainNotVerified,
        }
    }
}
