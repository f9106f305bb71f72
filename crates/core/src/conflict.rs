use uuid::Uuid;

use crate::types::DomainClaim;

/// Returns the verified claim that blocks `requester` from claiming the domain, if any.
///
/// `verified` is the store's view of verified claims sharing the normalized
/// domain name. At most one claim per domain can ever be verified, so the
/// first match is the only one.
pub fn find_conflict(requester: Uuid, verified: &[DomainClaim]) -> Option<&DomainClaim> {
    verified
        .iter()
        .find(|claim| claim.is_verified() && claim.organization_id != requester)
}

/// Convenience wrapper over [`find_conflict`].
pub fn is_domain_unavailable(requester: Uuid, verified: &[DomainClaim]) -> bool {
    find_conflict(requester, verified).is_some()
}
