//! # Connect Handlers
//!
//! Start and finish the OAuth-style handshake that links a site to a CMS account.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::authenticate_owner;
use crate::error::ApiError;
use crate::handshake::StartHandshake;
use crate::models::cms_connection::ConnectionSummary;
use crate::providers::{ProviderContext, ProviderKind};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartConnectRequest {
    /// Signed owner token (`ownerId.signature`)
    pub owner_token: String,
    pub site_id: Uuid,
    /// Where the provider sends the user back; https, or http on loopback
    pub redirect_uri: String,
    /// Site URL for self-hosted platforms, shop domain for Shopify
    #[serde(default)]
    pub context: ProviderContext,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartConnectResponse {
    /// Authorization URL to redirect the user to
    pub auth_url: String,
    /// Single-use state token echoed back on the callback
    pub state: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectCallbackRequest {
    pub code: String,
    pub state: String,
    /// When present, the state must have been issued to this owner
    #[serde(default)]
    pub owner_token: Option<String>,
}

pub(crate) fn parse_provider(raw: &str) -> Result<ProviderKind, ApiError> {
    raw.parse::<ProviderKind>().map_err(|_| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("provider '{}' not found", raw),
        )
    })
}

/// Start a handshake with a CMS provider
#[utoipa::path(
    post,
    path = "/connect/{provider}",
    params(
        ("provider" = String, Path, description = "Provider slug: wordpress, webflow, shopify or ghost")
    ),
    request_body = StartConnectRequest,
    responses(
        (status = 200, description = "Authorization URL generated", body = StartConnectResponse),
        (status = 400, description = "Invalid redirect URI, context or unconfigured provider", body = ApiError),
        (status = 401, description = "Invalid owner token", body = ApiError),
        (status = 404, description = "Unknown provider", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn start_connect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<StartConnectRequest>, JsonRejection>,
) -> Result<Json<StartConnectResponse>, ApiError> {
    let Json(request) = payload?;
    let provider = parse_provider(&provider)?;
    let owner = authenticate_owner(&state.config, &request.owner_token)?;

    let started = state
        .handshake
        .start(StartHandshake {
            provider,
            owner_id: owner.0,
            site_id: request.site_id,
            redirect_uri: request.redirect_uri,
            context: request.context,
        })
        .await?;

    info!(
        provider = %provider,
        site_id = %request.site_id,
        expires_at = %started.expires_at,
        "Handshake started"
    );

    Ok(Json(StartConnectResponse {
        auth_url: started.auth_url.to_string(),
        state: started.state,
    }))
}

/// Complete a handshake and store the connection
#[utoipa::path(
    post,
    path = "/connect/{provider}/callback",
    params(
        ("provider" = String, Path, description = "Provider slug the handshake was started for")
    ),
    request_body = ConnectCallbackRequest,
    responses(
        (status = 200, description = "Connection stored", body = ConnectionSummary),
        (status = 400, description = "invalid_state, expired_state or missing_code", body = ApiError),
        (status = 401, description = "Invalid owner token", body = ApiError),
        (status = 502, description = "provider_rejected", body = ApiError),
        (status = 503, description = "provider_unavailable", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn connect_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<ConnectCallbackRequest>, JsonRejection>,
) -> Result<Json<ConnectionSummary>, ApiError> {
    let Json(request) = payload?;
    let provider = parse_provider(&provider)?;
    let owner_id = match request.owner_token.as_deref() {
        Some(token) => Some(authenticate_owner(&state.config, token)?.0),
        None => None,
    };

    let connection = state
        .handshake
        .complete(provider, &request.code, &request.state, owner_id)
        .await?;

    Ok(Json(ConnectionSummary::from(&connection)))
}
