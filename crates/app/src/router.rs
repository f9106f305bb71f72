use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use domain_verify_core::{
    ClaimState, DomainClaim, DomainClaimStore, RetryPolicy, StoreError, VerificationOutcome,
};

use crate::problem::ProblemResponse;
use crate::registration::ClaimRegistrar;
use crate::telemetry;
use crate::verification::VerificationCoordinator;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    store: Arc<dyn DomainClaimStore>,
    coordinator: VerificationCoordinator,
    registrar: ClaimRegistrar,
    policy: RetryPolicy,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        store: Arc<dyn DomainClaimStore>,
        coordinator: VerificationCoordinator,
        registrar: ClaimRegistrar,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            metrics,
            store,
            coordinator,
            registrar,
            policy,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    fn view(&self, claim: &DomainClaim) -> ClaimView {
        ClaimView::new(claim, &self.policy)
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/organizations/:org_id/domains",
            post(register_claim).get(list_claims),
        )
        .route("/domains/:claim_id", get(get_claim))
        .route("/domains/:claim_id/verify", post(verify_claim))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
}

/// Public projection of a claim, including the record the owner must publish.
#[derive(Debug, Serialize)]
struct ClaimView {
    id: Uuid,
    organization_id: Uuid,
    domain_name: String,
    txt_record: TxtRecordView,
    state: ClaimState,
    verified_at: Option<DateTime<Utc>>,
    last_checked_at: Option<DateTime<Utc>>,
    attempt_count: u32,
    created_at: DateTime<Utc>,
    next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct TxtRecordView {
    name: String,
    value: String,
}

impl ClaimView {
    fn new(claim: &DomainClaim, policy: &RetryPolicy) -> Self {
        Self {
            id: claim.id,
            organization_id: claim.organization_id,
            domain_name: claim.domain_name.clone(),
            txt_record: TxtRecordView {
                name: claim.domain_name.clone(),
                value: claim.token.clone(),
            },
            state: policy.state(claim),
            verified_at: claim.verified_at,
            last_checked_at: claim.last_checked_at,
            attempt_count: claim.attempt_count,
            created_at: claim.created_at,
            next_attempt_at: policy.next_attempt_at(claim),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    domain_name: String,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    outcome: VerificationOutcome,
    claim: ClaimView,
}

async fn register_claim(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ClaimView>), ProblemResponse> {
    let claim = state
        .registrar
        .register(org_id, &request.domain_name)
        .await
        .map_err(|err| {
            warn!(stage = "app", organization_id = %org_id, error = %err, "claim registration rejected");
            ProblemResponse::from(err)
        })?;
    Ok((StatusCode::CREATED, Json(state.view(&claim))))
}

async fn list_claims(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<ClaimView>>, ProblemResponse> {
    let claims = state
        .store
        .list_by_organization(org_id)
        .await
        .map_err(|err| load_failure(org_id, err))?;
    Ok(Json(claims.iter().map(|claim| state.view(claim)).collect()))
}

async fn get_claim(
    State(state): State<AppState>,
    Path(claim_id): Path<Uuid>,
) -> Result<Json<ClaimView>, ProblemResponse> {
    let claim = state
        .store
        .get_by_id(claim_id)
        .await
        .map_err(|err| load_failure(claim_id, err))?;
    Ok(Json(state.view(&claim)))
}

async fn verify_claim(
    State(state): State<AppState>,
    Path(claim_id): Path<Uuid>,
) -> Result<Json<VerifyResponse>, ProblemResponse> {
    let outcome = state.coordinator.verify(claim_id).await?;
    let claim = state
        .store
        .get_by_id(claim_id)
        .await
        .map_err(|err| load_failure(claim_id, err))?;
    Ok(Json(VerifyResponse {
        outcome,
        claim: state.view(&claim),
    }))
}

fn load_failure(id: Uuid, err: StoreError) -> ProblemResponse {
    match err {
        StoreError::NotFound => ProblemResponse::not_found("domain claim not found"),
        other => {
            error!(stage = "storage", id = %id, error = %other, "failed to load domain claims");
            ProblemResponse::internal("failed to load domain claims")
        }
    }
}
