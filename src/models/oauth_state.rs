//! # OAuth State Model
//!
//! Ephemeral CSRF tokens for in-flight CMS handshakes. Rows are deleted when consumed.

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::providers::{ProviderContext, ProviderKind, UnknownProvider};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_states")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Opaque state value echoed back by the provider
    pub state: String,

    /// Provider slug the handshake was started for
    pub provider: String,

    pub owner_id: Uuid,

    pub site_id: Uuid,

    pub redirect_uri: String,

    /// Serialized provider context (site URL, shop domain)
    #[sea_orm(column_type = "JsonBinary")]
    pub context: Option<JsonValue>,

    /// Issued-at
    pub created_at: DateTimeWithTimeZone,

    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn provider_kind(&self) -> Result<ProviderKind, UnknownProvider> {
        self.provider.parse()
    }

    pub fn provider_context(&self) -> ProviderContext {
        self.context
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.fixed_offset()
    }
}
