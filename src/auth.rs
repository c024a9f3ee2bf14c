//! # Authentication
//!
//! Two credentials guard the API:
//! - cron endpoints take `Authorization: Bearer <secret>` compared in constant time against the
//!   configured cron secrets;
//! - owner-scoped endpoints take an owner token `owner_id.hex(hmac_sha256(secret, owner_id))`,
//!   either in the request body or in the `X-Owner-Token` header.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, unauthorized_with_trace_id};
use crate::server::AppState;
use crate::telemetry::TraceContext;

type HmacSha256 = Hmac<Sha256>;

pub const OWNER_TOKEN_HEADER: &str = "X-Owner-Token";

/// Marker inserted into request extensions once the cron bearer is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronAuth;

/// Owner identity proven by a valid owner token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerAuth(pub Uuid);

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

fn signature(secret: &str, owner_id: Uuid) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(owner_id.to_string().as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}

/// Issues the token an owner presents to owner-scoped endpoints.
pub fn issue_owner_token(secret: &str, owner_id: Uuid) -> Option<String> {
    signature(secret, owner_id).map(|sig| format!("{owner_id}.{}", hex::encode(sig)))
}

/// Returns the owner a token was issued for, or `None` if it is malformed or forged.
pub fn verify_owner_token(secret: &str, token: &str) -> Option<Uuid> {
    let (owner, provided) = token.trim().split_once('.')?;
    let owner_id = owner.parse::<Uuid>().ok()?;
    let provided = hex::decode(provided).ok()?;
    let expected = signature(secret, owner_id)?;

    if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        Some(owner_id)
    } else {
        None
    }
}

/// Verifies an owner token against the configured secret, as an API error on failure.
pub fn authenticate_owner(config: &AppConfig, token: &str) -> Result<OwnerAuth, ApiError> {
    let secret = config
        .owner_token_secret
        .as_deref()
        .ok_or_else(|| unauthorized(Some("Owner tokens are not enabled")))?;

    verify_owner_token(secret, token)
        .map(OwnerAuth)
        .ok_or_else(|| unauthorized(Some("Invalid owner token")))
}

/// Middleware guarding the cron endpoints.
pub async fn cron_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone());

    let token = extract_bearer_token(request.headers(), trace_id)?;
    validate_cron_secret(&config, token)?;

    request.extensions_mut().insert(CronAuth);
    Ok(next.run(request).await)
}

fn reject(message: &str, trace_id: &Option<String>) -> ApiError {
    match trace_id {
        Some(trace_id) => unauthorized_with_trace_id(Some(message), trace_id.clone()),
        None => unauthorized(Some(message)),
    }
}

fn extract_bearer_token(headers: &HeaderMap, trace_id: Option<String>) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| reject("Missing Authorization header", &trace_id))?
        .to_str()
        .map_err(|_| reject("Invalid Authorization header", &trace_id))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| reject("Authorization header must use Bearer scheme", &trace_id))
}

fn validate_cron_secret(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .cron_secrets
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

/// OpenAPI header parameter for owner-scoped endpoints
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct OwnerTokenHeader {
    /// Signed owner token (`ownerId.signature`)
    #[serde(rename = "X-Owner-Token")]
    #[param(rename = "X-Owner-Token", value_type = String)]
    pub owner_token: String,
}

impl<S> FromRequestParts<S> for OwnerAuth
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<AppConfig>::from_ref(state);
        let token = parts
            .headers
            .get(OWNER_TOKEN_HEADER)
            .ok_or_else(|| unauthorized(Some("Missing X-Owner-Token header")))?
            .to_str()
            .map_err(|_| unauthorized(Some("Invalid X-Owner-Token header")))?;

        authenticate_owner(&config, token)
    }
}

impl<S> FromRequestParts<S> for CronAuth
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CronAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Cron authentication required")))
    }
}
