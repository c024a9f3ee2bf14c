//! CMS connection entity model
//!
//! Stores one authorized link between a site and an external CMS account. Credentials are
//! kept as AES-GCM ciphertext and only decrypted by the connection repository.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use super::article_job::UnknownStatus;
use crate::providers::{FieldMapping, ProviderContext, ProviderKind, PublishMode, UnknownProvider};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cms_connections")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,

    pub owner_id: Uuid,

    pub site_id: Uuid,

    /// Provider slug, see [`ProviderKind`]
    pub provider: String,

    pub display_name: Option<String>,

    /// `active` or `error`
    pub status: String,

    pub access_token_ciphertext: Vec<u8>,

    pub refresh_token_ciphertext: Option<Vec<u8>>,

    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Granted scopes (JSON array)
    #[sea_orm(column_type = "JsonBinary")]
    pub scopes: Option<JsonValue>,

    /// Incremented on every credential write; compare value for conditional refresh
    pub token_version: i32,

    /// Serialized [`ConnectionSettings`]
    #[sea_orm(column_type = "JsonBinary")]
    pub config: Option<JsonValue>,

    pub last_error: Option<String>,

    pub last_sync_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn provider_kind(&self) -> Result<ProviderKind, UnknownProvider> {
        self.provider.parse()
    }

    pub fn connection_status(&self) -> Result<ConnectionStatus, UnknownStatus> {
        self.status.parse()
    }

    /// Provider configuration; a missing or malformed document yields defaults.
    pub fn settings(&self) -> ConnectionSettings {
        self.config
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(ConnectionStatus::Active),
            "error" => Ok(ConnectionStatus::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Provider-specific configuration persisted alongside a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectionSettings {
    /// Context captured during the handshake (site URL, shop domain)
    #[serde(default)]
    pub context: ProviderContext,
    /// Publish destination id as returned by `list_publish_targets`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_mapping: Option<FieldMapping>,
    #[serde(default)]
    pub publish_mode: PublishMode,
}

impl ConnectionSettings {
    pub fn from_context(context: ProviderContext) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Connection summary returned by the API; never carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub site_id: Uuid,
    pub provider: String,
    pub display_name: Option<String>,
    pub status: String,
    pub target_id: Option<String>,
    pub publish_mode: PublishMode,
    pub expires_at: Option<String>,
    pub created_at: String,
}

impl From<&Model> for ConnectionSummary {
    fn from(model: &Model) -> Self {
        let settings = model.settings();
        Self {
            id: model.id,
            owner_id: model.owner_id,
            site_id: model.site_id,
            provider: model.provider.clone(),
            display_name: model.display_name.clone(),
            status: model.status.clone(),
            target_id: settings.target_id,
            publish_mode: settings.publish_mode,
            expires_at: model.expires_at.map(|ts| ts.to_rfc3339()),
            created_at: model.created_at.to_rfc3339(),
        }
    }
}
