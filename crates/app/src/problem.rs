use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use domain_verify_core::ConflictReason;

use crate::registration::RegistrationError;
use crate::verification::VerifyError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    pub fn not_found(detail: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "claim_not_found", detail)
    }

    pub fn internal(detail: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", detail)
    }
}

impl From<VerifyError> for ProblemResponse {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::NotFound => Self::not_found("domain claim not found"),
            VerifyError::Conflict(reason) => {
                let problem_type = match reason {
                    ConflictReason::AlreadyVerified => "already_verified",
                    ConflictReason::DomainUnavailable => "domain_unavailable",
                };
                Self::new(StatusCode::CONFLICT, problem_type, reason.to_string())
            }
            VerifyError::Persistence(_) => Self::internal("failed to record verification attempt"),
        }
    }
}

impl From<RegistrationError> for ProblemResponse {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::InvalidDomain(inner) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_domain", inner.to_string())
            }
            RegistrationError::DuplicateClaim => Self::new(
                StatusCode::CONFLICT,
                "duplicate_claim",
                "organization already has a claim for this domain",
            ),
            RegistrationError::DomainUnavailable => Self::new(
                StatusCode::CONFLICT,
                "domain_unavailable",
                ConflictReason::DomainUnavailable.to_string(),
            ),
            RegistrationError::Storage(_) => Self::internal("failed to store domain claim"),
        }
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_verify_core::{DomainNameError, StoreError};

    #[test]
    fn conflicts_map_to_409_with_reason_type() {
        let problem = ProblemResponse::from(VerifyError::Conflict(ConflictReason::AlreadyVerified));
        assert_eq!(problem.status, StatusCode::CONFLICT);
        assert_eq!(problem.body.problem_type, "already_verified");
        assert_eq!(problem.body.detail, "domain has already been verified");

        let problem =
            ProblemResponse::from(VerifyError::Conflict(ConflictReason::DomainUnavailable));
        assert_eq!(problem.body.problem_type, "domain_unavailable");
        assert_eq!(problem.body.detail, "domain not available to be claimed");
    }

    #[test]
    fn storage_failures_do_not_leak_details() {
        let problem = ProblemResponse::from(VerifyError::Persistence(StoreError::Stale));
        assert_eq!(problem.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(problem.body.detail, "failed to record verification attempt");
    }

    #[test]
    fn invalid_domain_is_bad_request() {
        let problem = ProblemResponse::from(RegistrationError::InvalidDomain(
            DomainNameError::SingleLabel,
        ));
        assert_eq!(problem.status, StatusCode::BAD_REQUEST);
        assert_eq!(problem.body.problem_type, "invalid_domain");
    }
}
