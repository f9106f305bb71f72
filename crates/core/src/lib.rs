//! Domain layer for DNS based domain ownership verification.
//!
//! Holds the claim model, the conflict and retry decisions, and the traits the
//! application wires real DNS, storage and audit implementations into.

pub mod conflict;
pub mod domain;
pub mod policy;
pub mod ports;
pub mod types;

pub use conflict::{find_conflict, is_domain_unavailable};
pub use domain::{normalize_domain, DomainNameError};
pub use policy::{ClaimState, RetryDecision, RetryPolicy};
pub use ports::{DnsResolver, DomainClaimStore, EventSink, ResolutionError, StoreError};
pub use types::{ConflictReason, DomainClaim, VerificationEvent, VerificationOutcome};
