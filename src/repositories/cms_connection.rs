//! CMS connection repository
//!
//! Owns every write to `cms_connections`, including credential encryption. Plaintext
//! credentials only leave this module as a [`CredentialBundle`], whose `Debug` output is redacted.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use tracing::debug;
use uuid::Uuid;

use crate::crypto::{
    CryptoKey, connection_aad, decrypt_connection_credentials, encrypt_credentials,
};
use crate::error::is_unique_violation;
use crate::models::cms_connection::{
    self, ActiveModel, ConnectionSettings, ConnectionStatus, Entity as CmsConnection, Model,
};
use crate::providers::{CredentialBundle, ProviderContext, ProviderKind};

/// A freshly authorized account, as produced by a completed handshake.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub owner_id: Uuid,
    pub site_id: Uuid,
    pub provider: ProviderKind,
    pub context: ProviderContext,
    pub display_name: Option<String>,
    pub credentials: CredentialBundle,
}

#[derive(Debug, Clone)]
pub struct CmsConnectionRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl CmsConnectionRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Stores `new` as the single active connection for its (site, provider).
    ///
    /// An existing active row is updated in place; otherwise the most recent `error` row is
    /// reactivated so that jobs pointing at it keep working; otherwise a row is inserted. Losing
    /// an insert race against the partial unique index retries once as an update.
    pub async fn upsert_active(&self, new: &NewConnection) -> Result<Model> {
        match self.try_upsert_active(new).await {
            Err(err) if err.downcast_ref::<DbErr>().is_some_and(is_unique_violation) => {
                debug!(
                    site_id = %new.site_id,
                    provider = %new.provider,
                    "Concurrent connection insert detected, retrying as update"
                );
                self.try_upsert_active(new).await
            }
            other => other,
        }
    }

    async fn try_upsert_active(&self, new: &NewConnection) -> Result<Model> {
        let now = Utc::now().fixed_offset();
        let aad = connection_aad(new.owner_id, new.site_id, new.provider);
        let encrypted = encrypt_credentials(&self.crypto_key, &aad, &new.credentials)
            .context("failed to encrypt connection credentials")?;
        let scopes = serde_json::to_value(&new.credentials.scopes)?;

        let existing = match self
            .find_for_site_provider(new.site_id, new.provider, ConnectionStatus::Active)
            .await?
        {
            Some(model) => Some(model),
            None => {
                self.find_for_site_provider(new.site_id, new.provider, ConnectionStatus::Error)
                    .await?
            }
        };

        if let Some(model) = existing {
            let mut settings = model.settings();
            settings.context = new.context.clone();
            let display_name = new.display_name.clone().or_else(|| model.display_name.clone());
            let token_version = model.token_version + 1;

            let mut active: ActiveModel = model.into();
            active.owner_id = Set(new.owner_id);
            active.status = Set(ConnectionStatus::Active.as_str().to_string());
            active.display_name = Set(display_name);
            active.access_token_ciphertext = Set(encrypted.access_token);
            active.refresh_token_ciphertext = Set(encrypted.refresh_token);
            active.expires_at = Set(new.credentials.expires_at.map(|ts| ts.fixed_offset()));
            active.scopes = Set(Some(scopes));
            active.token_version = Set(token_version);
            active.config = Set(Some(settings.to_json()));
            active.last_error = Set(None);
            active.updated_at = Set(now);

            return Ok(active.update(&*self.db).await?);
        }

        let model = Model {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            site_id: new.site_id,
            provider: new.provider.as_str().to_string(),
            display_name: new.display_name.clone(),
            status: ConnectionStatus::Active.as_str().to_string(),
            access_token_ciphertext: encrypted.access_token,
            refresh_token_ciphertext: encrypted.refresh_token,
            expires_at: new.credentials.expires_at.map(|ts| ts.fixed_offset()),
            scopes: Some(scopes),
            token_version: 1,
            config: Some(ConnectionSettings::from_context(new.context.clone()).to_json()),
            last_error: None,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        };

        CmsConnection::insert(model.clone().into_active_model())
            .exec_without_returning(&*self.db)
            .await?;

        Ok(model)
    }

    async fn find_for_site_provider(
        &self,
        site_id: Uuid,
        provider: ProviderKind,
        status: ConnectionStatus,
    ) -> Result<Option<Model>> {
        Ok(CmsConnection::find()
            .filter(cms_connection::Column::SiteId.eq(site_id))
            .filter(cms_connection::Column::Provider.eq(provider.as_str()))
            .filter(cms_connection::Column::Status.eq(status.as_str()))
            .order_by_desc(cms_connection::Column::CreatedAt)
            .one(&*self.db)
            .await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>> {
        Ok(CmsConnection::find_by_id(id).one(&*self.db).await?)
    }

    /// The most recently created active connection for a site, across providers.
    pub async fn find_active_for_site(&self, site_id: Uuid) -> Result<Option<Model>> {
        Ok(CmsConnection::find()
            .filter(cms_connection::Column::SiteId.eq(site_id))
            .filter(cms_connection::Column::Status.eq(ConnectionStatus::Active.as_str()))
            .order_by_desc(cms_connection::Column::CreatedAt)
            .one(&*self.db)
            .await?)
    }

    pub fn decrypt_credentials(&self, connection: &Model) -> Result<CredentialBundle> {
        decrypt_connection_credentials(&self.crypto_key, connection).map_err(|err| {
            anyhow!(
                "failed to decrypt credentials for connection {}: {}",
                connection.id,
                err
            )
        })
    }

    /// Writes refreshed credentials only if nobody else rotated them since `connection` was
    /// read. Returns `false` when the compare on `token_version` lost.
    pub async fn store_refreshed_credentials(
        &self,
        connection: &Model,
        credentials: &CredentialBundle,
    ) -> Result<bool> {
        let provider = connection
            .provider_kind()
            .map_err(|err| anyhow!("connection {}: {}", connection.id, err))?;
        let aad = connection_aad(connection.owner_id, connection.site_id, provider);
        let encrypted = encrypt_credentials(&self.crypto_key, &aad, credentials)
            .context("failed to encrypt refreshed credentials")?;

        let result = CmsConnection::update_many()
            .col_expr(
                cms_connection::Column::AccessTokenCiphertext,
                Expr::value(encrypted.access_token),
            )
            .col_expr(
                cms_connection::Column::RefreshTokenCiphertext,
                Expr::value(encrypted.refresh_token),
            )
            .col_expr(
                cms_connection::Column::ExpiresAt,
                Expr::value(credentials.expires_at.map(|ts| ts.fixed_offset())),
            )
            .col_expr(
                cms_connection::Column::Scopes,
                Expr::value(serde_json::to_value(&credentials.scopes)?),
            )
            .col_expr(
                cms_connection::Column::TokenVersion,
                Expr::col(cms_connection::Column::TokenVersion).add(1),
            )
            .col_expr(
                cms_connection::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(cms_connection::Column::Id.eq(connection.id))
            .filter(cms_connection::Column::TokenVersion.eq(connection.token_version))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Flags a connection whose credentials the provider refuses. The row is kept.
    pub async fn mark_error(&self, id: Uuid, message: &str) -> Result<()> {
        CmsConnection::update_many()
            .col_expr(
                cms_connection::Column::Status,
                Expr::value(ConnectionStatus::Error.as_str()),
            )
            .col_expr(cms_connection::Column::LastError, Expr::value(message))
            .col_expr(
                cms_connection::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(cms_connection::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn touch_last_sync(&self, id: Uuid) -> Result<()> {
        let now = Utc::now().fixed_offset();
        CmsConnection::update_many()
            .col_expr(cms_connection::Column::LastSyncAt, Expr::value(now))
            .col_expr(cms_connection::Column::UpdatedAt, Expr::value(now))
            .filter(cms_connection::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn update_settings(&self, id: Uuid, settings: &ConnectionSettings) -> Result<Model> {
        let model = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("connection {} not found", id))?;

        let mut active: ActiveModel = model.into();
        active.config = Set(Some(settings.to_json()));
        active.updated_at = Set(Utc::now().fixed_offset());
        Ok(active.update(&*self.db).await?)
    }
}
