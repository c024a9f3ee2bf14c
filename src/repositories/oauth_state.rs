//! # OAuth State Repository
//!
//! Persistence for in-flight handshake states. Consumption is a conditional delete so that two
//! callbacks racing on one state cannot both succeed.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
};
use uuid::Uuid;

use crate::models::oauth_state::{self, Entity, Model};
use crate::providers::{ProviderContext, ProviderKind};

/// Input for [`OAuthStateRepository::create`]
#[derive(Debug, Clone)]
pub struct NewOAuthState {
    pub state: String,
    pub provider: ProviderKind,
    pub owner_id: Uuid,
    pub site_id: Uuid,
    pub redirect_uri: String,
    pub context: ProviderContext,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct OAuthStateRepository {
    db: Arc<DatabaseConnection>,
}

impl OAuthStateRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewOAuthState) -> Result<Model> {
        let now = Utc::now();
        let model = Model {
            id: Uuid::new_v4(),
            state: new.state,
            provider: new.provider.as_str().to_string(),
            owner_id: new.owner_id,
            site_id: new.site_id,
            redirect_uri: new.redirect_uri,
            context: Some(serde_json::to_value(&new.context)?),
            created_at: now.fixed_offset(),
            expires_at: (now + new.ttl).fixed_offset(),
        };

        Entity::insert(model.clone().into_active_model())
            .exec_without_returning(&*self.db)
            .await?;

        Ok(model)
    }

    /// Looks a state up regardless of expiry; callers distinguish expired from unknown.
    pub async fn find_by_state(&self, state: &str) -> Result<Option<Model>> {
        Ok(Entity::find()
            .filter(oauth_state::Column::State.eq(state))
            .one(&*self.db)
            .await?)
    }

    /// Deletes the state only while it is still unexpired. `false` means another caller
    /// consumed it first or it expired in between.
    pub async fn consume(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = Entity::delete_many()
            .filter(oauth_state::Column::Id.eq(id))
            .filter(oauth_state::Column::ExpiresAt.gt(now.fixed_offset()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = Entity::delete_by_id(id).exec(&*self.db).await?;
        Ok(result.rows_affected > 0)
    }

    /// Removes every state that expired at or before `now`.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = Entity::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lte(now.fixed_offset()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
