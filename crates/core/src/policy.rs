use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DomainClaim;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MIN_INTERVAL_HOURS: i64 = 12;

/// Retry policy consumed by whatever re-invokes verification automatically.
///
/// Expiry is derived from the claim and the current policy rather than stored,
/// so changing `max_attempts` reclassifies existing claims immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_interval: Duration::hours(DEFAULT_MIN_INTERVAL_HOURS),
        }
    }
}

/// Lifecycle state of a claim under a given policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    Unverified,
    Verified,
    Expired,
}

impl ClaimState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
            Self::Expired => "expired",
        }
    }
}

/// What the scheduler should do with a claim right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Due,
    Wait(DateTime<Utc>),
    Verified,
    Expired,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_interval: Duration) -> Self {
        Self {
            max_attempts,
            min_interval,
        }
    }

    pub fn state(&self, claim: &DomainClaim) -> ClaimState {
        if claim.is_verified() {
            ClaimState::Verified
        } else if claim.attempt_count >= self.max_attempts {
            ClaimState::Expired
        } else {
            ClaimState::Unverified
        }
    }

    /// `true` when automatic attempts are exhausted and the claim is still unverified.
    pub fn is_expired(&self, claim: &DomainClaim) -> bool {
        matches!(self.state(claim), ClaimState::Expired)
    }

    /// Earliest instant an automatic attempt is allowed.
    ///
    /// `None` for terminal claims and when the interval pushes the instant past
    /// the representable range; neither gets another automatic attempt.
    pub fn next_attempt_at(&self, claim: &DomainClaim) -> Option<DateTime<Utc>> {
        match self.state(claim) {
            ClaimState::Unverified => match claim.last_checked_at {
                Some(last) => last.checked_add_signed(self.min_interval),
                None => Some(claim.created_at),
            },
            ClaimState::Verified | ClaimState::Expired => None,
        }
    }

    pub fn decide(&self, claim: &DomainClaim, now: DateTime<Utc>) -> RetryDecision {
        match self.state(claim) {
            ClaimState::Verified => RetryDecision::Verified,
            ClaimState::Expired => RetryDecision::Expired,
            ClaimState::Unverified => match self.next_attempt_at(claim) {
                Some(at) if at <= now => RetryDecision::Due,
                Some(at) => RetryDecision::Wait(at),
                None => RetryDecision::Wait(DateTime::<Utc>::MAX_UTC),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn created_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn claim() -> DomainClaim {
        DomainClaim::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "corp.example",
            "abc123",
            created_at(),
        )
    }

    #[test]
    fn fresh_claim_is_due_immediately() {
        let policy = RetryPolicy::default();
        let claim = claim();
        assert_eq!(policy.next_attempt_at(&claim), Some(created_at()));
        assert_eq!(policy.decide(&claim, created_at()), RetryDecision::Due);
    }

    #[test]
    fn waits_for_min_interval_after_last_check() {
        let policy = RetryPolicy::new(3, Duration::hours(12));
        let mut claim = claim();
        let checked = created_at() + Duration::minutes(1);
        claim.record_attempt(checked, false);

        let until = checked + Duration::hours(12);
        assert_eq!(
            policy.decide(&claim, checked + Duration::hours(1)),
            RetryDecision::Wait(until)
        );
        assert_eq!(policy.decide(&claim, until), RetryDecision::Due);
    }

    #[test]
    fn exhausted_attempts_expire_the_claim() {
        let policy = RetryPolicy::new(2, Duration::minutes(1));
        let mut claim = claim();
        claim.record_attempt(created_at(), false);
        assert_eq!(policy.state(&claim), ClaimState::Unverified);
        claim.record_attempt(created_at() + Duration::minutes(2), false);

        assert!(policy.is_expired(&claim));
        assert_eq!(policy.next_attempt_at(&claim), None);
        assert_eq!(
            policy.decide(&claim, created_at() + Duration::days(1)),
            RetryDecision::Expired
        );
    }

    #[test]
    fn verified_claim_is_never_expired() {
        let policy = RetryPolicy::new(1, Duration::minutes(1));
        let mut claim = claim();
        claim.record_attempt(created_at(), true);
        assert_eq!(policy.state(&claim), ClaimState::Verified);
        assert!(!policy.is_expired(&claim));
    }

    #[test]
    fn oversized_interval_never_schedules_instead_of_overflowing() {
        let policy = RetryPolicy::new(3, Duration::seconds(1_000_000_000_000_000));
        let mut claim = claim();
        claim.record_attempt(created_at(), false);

        assert_eq!(policy.next_attempt_at(&claim), None);
        assert_eq!(
            policy.decide(&claim, created_at() + Duration::days(365)),
            RetryDecision::Wait(DateTime::<Utc>::MAX_UTC)
        );
        assert_eq!(policy.state(&claim), ClaimState::Unverified);
    }

    #[test]
    fn raising_the_bound_revives_expired_claims() {
        let mut claim = claim();
        claim.record_attempt(created_at(), false);
        assert!(RetryPolicy::new(1, Duration::hours(1)).is_expired(&claim));
        assert!(!RetryPolicy::new(5, Duration::hours(1)).is_expired(&claim));
    }
}
