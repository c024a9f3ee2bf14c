//! # Credential Refresh
//!
//! Ensures a connection's credentials are usable before a provider call. Refresh is
//! conditional on `token_version`: the worker that loses the race discards its own refresh
//! result and re-reads the credentials the winner stored.

use chrono::{Duration, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::models::cms_connection::Model as CmsConnectionModel;
use crate::providers::{AdapterError, CmsAdapter, CredentialBundle};
use crate::repositories::CmsConnectionRepository;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct TokenRefresher {
    connections: CmsConnectionRepository,
    lead: Duration,
}

impl TokenRefresher {
    /// `lead` is how far ahead of expiry credentials are rotated.
    pub fn new(connections: CmsConnectionRepository, lead: Duration) -> Self {
        Self { connections, lead }
    }

    /// Returns credentials that are valid for at least the lead window, refreshing if needed.
    #[instrument(skip_all, fields(connection_id = %connection.id, provider = %connection.provider))]
    pub async fn ensure_fresh(
        &self,
        adapter: &dyn CmsAdapter,
        connection: &CmsConnectionModel,
    ) -> Result<CredentialBundle, RefreshError> {
        let bundle = self.connections.decrypt_credentials(connection)?;

        if !adapter.kind().auth_flow().supports_refresh()
            || bundle.refresh_token.is_none()
            || !bundle.expires_within(Utc::now(), self.lead)
        {
            return Ok(bundle);
        }

        let context = connection.settings().context;
        let refreshed = match adapter.refresh_token(&bundle, &context).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                warn!(reason = err.reason_code(), error = %err, "Credential refresh failed");
                counter!("token_refresh_total", "outcome" => "failed").increment(1);
                return Err(err.into());
            }
        };

        if self
            .connections
            .store_refreshed_credentials(connection, &refreshed)
            .await?
        {
            info!(expires_at = ?refreshed.expires_at, "Refreshed connection credentials");
            counter!("token_refresh_total", "outcome" => "refreshed").increment(1);
            return Ok(refreshed);
        }

        debug!("Credential refresh lost the race, using the stored credentials");
        counter!("token_refresh_total", "outcome" => "lost_race").increment(1);
        let current = self
            .connections
            .find_by_id(connection.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection {} disappeared", connection.id))?;
        Ok(self.connections.decrypt_credentials(&current)?)
    }
}
