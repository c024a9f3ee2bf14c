//! # Pipeline Trigger Handlers
//!
//! Owner-facing endpoints that force-advance or retry a single article job.

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::authenticate_owner;
use crate::error::ApiError;
use crate::publisher::PublishRunSummary;
use crate::server::AppState;

/// Body shared by the trigger and retry endpoints
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobTriggerRequest {
    /// Signed owner token (`ownerId.signature`)
    pub owner_token: String,
    pub job_id: Uuid,
}

/// Force-advance one of the owner's jobs
#[utoipa::path(
    post,
    path = "/pipeline/trigger",
    request_body = JobTriggerRequest,
    responses(
        (status = 200, description = "Job advanced; failures are reported in the summary", body = PublishRunSummary),
        (status = 400, description = "Malformed request body", body = ApiError),
        (status = 401, description = "Invalid owner token", body = ApiError),
        (status = 404, description = "Job not found for this owner", body = ApiError)
    ),
    tag = "pipeline"
)]
pub async fn trigger_job(
    State(state): State<AppState>,
    payload: Result<Json<JobTriggerRequest>, JsonRejection>,
) -> Result<Json<PublishRunSummary>, ApiError> {
    let Json(request) = payload?;
    let owner = authenticate_owner(&state.config, &request.owner_token)?;
    let outcome = state.pipeline.trigger(request.job_id, owner.0).await?;

    info!(job_id = %request.job_id, outcome = outcome.label(), "Job triggered");
    Ok(Json(PublishRunSummary::for_job(request.job_id, &outcome)))
}

/// Retry a job in `generation_failed` or `publishing_failed`
#[utoipa::path(
    post,
    path = "/pipeline/retry",
    request_body = JobTriggerRequest,
    responses(
        (status = 200, description = "Retry attempted", body = PublishRunSummary),
        (status = 401, description = "Invalid owner token", body = ApiError),
        (status = 404, description = "Job not found for this owner", body = ApiError),
        (status = 409, description = "Job is not in a failed state", body = ApiError)
    ),
    tag = "pipeline"
)]
pub async fn retry_job(
    State(state): State<AppState>,
    payload: Result<Json<JobTriggerRequest>, JsonRejection>,
) -> Result<Json<PublishRunSummary>, ApiError> {
    let Json(request) = payload?;
    let owner = authenticate_owner(&state.config, &request.owner_token)?;
    let outcome = state.pipeline.retry(request.job_id, owner.0).await?;

    info!(job_id = %request.job_id, outcome = outcome.label(), "Job retried");
    Ok(Json(PublishRunSummary::for_job(request.job_id, &outcome)))
}
