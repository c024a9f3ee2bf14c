//! # Cron Handlers
//!
//! Externally scheduled entry points for one publisher or verification pass. Both sit behind
//! [`crate::auth::cron_auth_middleware`].

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::CronAuth;
use crate::error::ApiError;
use crate::publisher::PublishRunSummary;
use crate::server::AppState;
use crate::verification::VerificationRunSummary;

#[derive(Debug, Default, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct VerifyQuery {
    /// Check every completed item regardless of `next_check_at`
    #[serde(default)]
    pub force: bool,
}

/// Run one publisher pass
#[utoipa::path(
    post,
    path = "/cron/publish",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Pass finished; `success` is false when it aborted", body = PublishRunSummary),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    tag = "cron"
)]
pub async fn cron_publish(
    State(state): State<AppState>,
    _auth: CronAuth,
) -> Result<Json<PublishRunSummary>, ApiError> {
    Ok(Json(state.publisher.run_once().await))
}

/// Run one verification pass
#[utoipa::path(
    post,
    path = "/cron/verify",
    security(("bearer_auth" = [])),
    params(VerifyQuery),
    responses(
        (status = 200, description = "Pass finished", body = VerificationRunSummary),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    tag = "cron"
)]
pub async fn cron_verify(
    State(state): State<AppState>,
    _auth: CronAuth,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerificationRunSummary>, ApiError> {
    Ok(Json(state.verification.run_once(query.force).await))
}
