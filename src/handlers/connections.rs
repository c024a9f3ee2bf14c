//! # Connection Handlers
//!
//! Owner-scoped endpoints that finish configuring a connection after the handshake: list the
//! destinations the account can publish into, then pin one along with publish mode and field
//! mapping.

use std::sync::Arc;

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OwnerAuth, OwnerTokenHeader};
use crate::error::{ApiError, provider_error, validation_error};
use crate::models::cms_connection::{ConnectionSummary, Model as CmsConnectionModel};
use crate::providers::{
    CmsAdapter, CredentialBundle, FieldMappingOverrides, ProviderKind, PublishMode, PublishTarget,
};
use crate::server::AppState;
use crate::token_refresh::RefreshError;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetsResponse {
    pub targets: Vec<PublishTarget>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    /// Destination id from the targets listing
    pub target_id: String,
    #[serde(default)]
    pub target_name: Option<String>,
    /// Keeps the current mode when omitted
    #[serde(default)]
    pub publish_mode: Option<PublishMode>,
    /// Corrections applied on top of the inferred field mapping
    #[serde(default)]
    pub field_mapping: Option<FieldMappingOverrides>,
}

struct OwnedConnection {
    connection: CmsConnectionModel,
    provider: ProviderKind,
    adapter: Arc<dyn CmsAdapter>,
    credentials: CredentialBundle,
}

fn connection_not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", "Connection not found")
}

/// Loads a connection owned by `owner_id` and returns usable credentials for it.
async fn load_owned_connection(
    state: &AppState,
    connection_id: Uuid,
    owner_id: Uuid,
) -> Result<OwnedConnection, ApiError> {
    let connection = state
        .connections
        .find_by_id(connection_id)
        .await?
        .filter(|connection| connection.owner_id == owner_id)
        .ok_or_else(connection_not_found)?;

    let provider = connection.provider_kind().map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "provider_not_configured",
            &err.to_string(),
        )
    })?;
    let adapter = state.registry.get(provider)?;

    let credentials = state
        .refresher
        .ensure_fresh(adapter.as_ref(), &connection)
        .await
        .map_err(|err| match err {
            RefreshError::Adapter(err) => provider_error(provider, &err),
            RefreshError::Storage(err) => ApiError::from(err),
        })?;

    Ok(OwnedConnection {
        connection,
        provider,
        adapter,
        credentials,
    })
}

/// List publish targets for a connection
#[utoipa::path(
    get,
    path = "/connections/{id}/targets",
    params(
        ("id" = Uuid, Path, description = "Connection id"),
        OwnerTokenHeader
    ),
    responses(
        (status = 200, description = "Available publish targets", body = TargetsResponse),
        (status = 401, description = "Invalid owner token", body = ApiError),
        (status = 404, description = "Connection not found for this owner", body = ApiError),
        (status = 502, description = "Provider refused the request", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_targets(
    State(state): State<AppState>,
    OwnerAuth(owner_id): OwnerAuth,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<TargetsResponse>, ApiError> {
    let owned = load_owned_connection(&state, connection_id, owner_id).await?;
    let context = owned.connection.settings().context;

    let targets = owned
        .adapter
        .list_publish_targets(&owned.credentials, &context)
        .await
        .map_err(|err| provider_error(owned.provider, &err))?;

    Ok(Json(TargetsResponse { targets }))
}

/// Pin the publish target, mode and field mapping of a connection
#[utoipa::path(
    put,
    path = "/connections/{id}/settings",
    params(
        ("id" = Uuid, Path, description = "Connection id"),
        OwnerTokenHeader
    ),
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Settings saved", body = ConnectionSummary),
        (status = 400, description = "Invalid target or incomplete field mapping", body = ApiError),
        (status = 401, description = "Invalid owner token", body = ApiError),
        (status = 404, description = "Connection not found for this owner", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn update_settings(
    State(state): State<AppState>,
    OwnerAuth(owner_id): OwnerAuth,
    Path(connection_id): Path<Uuid>,
    payload: Result<Json<UpdateSettingsRequest>, JsonRejection>,
) -> Result<Json<ConnectionSummary>, ApiError> {
    let Json(request) = payload?;
    let target_id = request.target_id.trim().to_string();
    if target_id.is_empty() {
        return Err(validation_error(
            "targetId is required",
            serde_json::json!({ "targetId": "must not be empty" }),
        ));
    }

    let owned = load_owned_connection(&state, connection_id, owner_id).await?;
    let mut settings = owned.connection.settings();
    let overrides = request.field_mapping.unwrap_or_default();

    let field_mapping = if owned.adapter.requires_field_mapping() {
        match owned
            .adapter
            .infer_field_mapping(&owned.credentials, &settings.context, &target_id)
            .await
        {
            Ok(inferred) => Some(overrides.apply(inferred)),
            Err(err) => match overrides.into_mapping() {
                Some(mapping) => {
                    warn!(error = %err, "Field mapping inference failed; using caller mapping");
                    Some(mapping)
                }
                None => return Err(provider_error(owned.provider, &err)),
            },
        }
    } else {
        None
    };

    settings.target_id = Some(target_id);
    settings.target_name = request.target_name;
    settings.field_mapping = field_mapping;
    if let Some(mode) = request.publish_mode {
        settings.publish_mode = mode;
    }

    let updated = state
        .connections
        .update_settings(owned.connection.id, &settings)
        .await?;

    info!(
        connection_id = %updated.id,
        provider = %owned.provider,
        target_id = settings.target_id.as_deref().unwrap_or_default(),
        "Connection settings updated"
    );
    Ok(Json(ConnectionSummary::from(&updated)))
}
