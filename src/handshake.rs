//! # OAuth Handshake Manager
//!
//! Drives authorize → callback → token exchange for CMS accounts. State tokens are single-use:
//! every validation failure is decided before any provider call, and consumption is a
//! conditional delete so concurrent callbacks on one state yield exactly one connection.

use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rand::Rng;
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::models::cms_connection::Model as CmsConnectionModel;
use crate::providers::{AdapterError, AdapterRegistry, ProviderContext, ProviderKind, RegistryError};
use crate::repositories::{
    CmsConnectionRepository, NewConnection, NewOAuthState, OAuthStateRepository,
};

const STATE_BYTES: usize = 32;
const MAX_AUTHORIZATION_URL_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("unknown or already used state")]
    InvalidState,
    #[error("state has expired")]
    ExpiredState,
    #[error("authorization code is missing")]
    MissingCode,
    #[error("provider '{0}' is not configured")]
    ProviderNotConfigured(ProviderKind),
    #[error("invalid redirect URI: {0}")]
    InvalidRedirectUri(String),
    #[error("invalid authorization URL: {0}")]
    InvalidAuthorizationUrl(String),
    #[error("provider rejected the authorization: {0}")]
    ProviderRejected(String),
    #[error("provider temporarily unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("{0}")]
    Configuration(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl HandshakeError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            HandshakeError::InvalidState => "invalid_state",
            HandshakeError::ExpiredState => "expired_state",
            HandshakeError::MissingCode => "missing_code",
            HandshakeError::ProviderNotConfigured(_) => "provider_not_configured",
            HandshakeError::InvalidRedirectUri(_) => "invalid_redirect_uri",
            HandshakeError::InvalidAuthorizationUrl(_) => "invalid_authorization_url",
            HandshakeError::ProviderRejected(_) => "provider_rejected",
            HandshakeError::ProviderUnavailable(_) => "provider_unavailable",
            HandshakeError::Configuration(_) => "configuration",
            HandshakeError::Storage(_) => "internal_error",
        }
    }

    fn from_adapter(error: AdapterError) -> Self {
        match error {
            AdapterError::ProviderRejected { .. }
            | AdapterError::Unauthorized { .. }
            | AdapterError::MalformedResponse { .. } => {
                HandshakeError::ProviderRejected(error.to_string())
            }
            AdapterError::Transient { .. } | AdapterError::RateLimited { .. } => {
                HandshakeError::ProviderUnavailable(error.to_string())
            }
            AdapterError::Configuration { message } => HandshakeError::Configuration(message),
            AdapterError::Unsupported { .. } => HandshakeError::Configuration(error.to_string()),
        }
    }
}

impl From<RegistryError> for HandshakeError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::ProviderNotRegistered { provider } => {
                HandshakeError::ProviderNotConfigured(provider)
            }
        }
    }
}

/// Input for [`HandshakeManager::start`]
#[derive(Debug, Clone)]
pub struct StartHandshake {
    pub provider: ProviderKind,
    pub owner_id: Uuid,
    pub site_id: Uuid,
    pub redirect_uri: String,
    pub context: ProviderContext,
}

#[derive(Debug, Clone)]
pub struct HandshakeStarted {
    pub auth_url: Url,
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HandshakeManager {
    registry: AdapterRegistry,
    states: OAuthStateRepository,
    connections: CmsConnectionRepository,
    state_ttl: Duration,
}

impl HandshakeManager {
    pub fn new(
        registry: AdapterRegistry,
        states: OAuthStateRepository,
        connections: CmsConnectionRepository,
        state_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            states,
            connections,
            state_ttl,
        }
    }

    #[instrument(skip_all, fields(provider = %request.provider, site_id = %request.site_id))]
    pub async fn start(&self, request: StartHandshake) -> Result<HandshakeStarted, HandshakeError> {
        let adapter = self.registry.get(request.provider)?;
        let redirect_uri = validate_redirect_uri(&request.redirect_uri)?;

        let state = generate_state();
        let record = self
            .states
            .create(NewOAuthState {
                state: state.clone(),
                provider: request.provider,
                owner_id: request.owner_id,
                site_id: request.site_id,
                redirect_uri: redirect_uri.to_string(),
                context: request.context.clone(),
                ttl: self.state_ttl,
            })
            .await?;

        let auth_url = adapter
            .build_authorization_url(&redirect_uri, &state, &request.context)
            .map_err(HandshakeError::from_adapter)
            .and_then(|url| validate_authorization_url(&url).map(|()| url));

        let auth_url = match auth_url {
            Ok(url) => url,
            Err(err) => {
                if let Err(cleanup) = self.states.delete(record.id).await {
                    warn!(error = ?cleanup, "Failed to delete state after URL construction error");
                }
                counter!("handshake_total", "outcome" => err.reason_code()).increment(1);
                return Err(err);
            }
        };

        counter!("handshake_total", "outcome" => "started").increment(1);
        Ok(HandshakeStarted {
            auth_url,
            state,
            expires_at: record.expires_at.with_timezone(&Utc),
        })
    }

    /// Validates and consumes `state`, then exchanges `code` and stores the connection.
    #[instrument(skip_all, fields(provider = %provider))]
    pub async fn complete(
        &self,
        provider: ProviderKind,
        code: &str,
        state: &str,
        owner_id: Option<Uuid>,
    ) -> Result<CmsConnectionModel, HandshakeError> {
        let result = self.try_complete(provider, code, state, owner_id).await;
        let outcome = match &result {
            Ok(_) => "completed",
            Err(err) => err.reason_code(),
        };
        counter!("handshake_total", "outcome" => outcome).increment(1);
        result
    }

    async fn try_complete(
        &self,
        provider: ProviderKind,
        code: &str,
        state: &str,
        owner_id: Option<Uuid>,
    ) -> Result<CmsConnectionModel, HandshakeError> {
        let record = self
            .states
            .find_by_state(state)
            .await?
            .ok_or(HandshakeError::InvalidState)?;

        if record.provider != provider.as_str()
            || owner_id.is_some_and(|owner| owner != record.owner_id)
        {
            return Err(HandshakeError::InvalidState);
        }

        let now = Utc::now();
        if record.is_expired(now) {
            self.states.delete(record.id).await?;
            return Err(HandshakeError::ExpiredState);
        }

        let code = code.trim();
        if code.is_empty() {
            return Err(HandshakeError::MissingCode);
        }
        let adapter = self.registry.get(provider)?;
        let redirect_uri = Url::parse(&record.redirect_uri)
            .map_err(|e| HandshakeError::InvalidRedirectUri(e.to_string()))?;

        if !self.states.consume(record.id, now).await? {
            return Err(HandshakeError::InvalidState);
        }

        let context = record.provider_context();
        let credentials = adapter
            .exchange_code(code, &redirect_uri, &context)
            .await
            .map_err(HandshakeError::from_adapter)?;

        let connection = self
            .connections
            .upsert_active(&NewConnection {
                owner_id: record.owner_id,
                site_id: record.site_id,
                provider,
                display_name: context.label(),
                context,
                credentials,
            })
            .await?;

        info!(connection_id = %connection.id, site_id = %connection.site_id, "CMS account connected");
        Ok(connection)
    }

    /// Deletes states that expired without being used.
    pub async fn sweep_expired(&self) -> Result<u64, HandshakeError> {
        let removed = self.states.cleanup_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "Removed expired handshake states");
        }
        Ok(removed)
    }
}

fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

fn secure_or_loopback(url: &Url) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => is_loopback(url),
        _ => false,
    }
}

/// https anywhere, plain http only on loopback.
pub fn validate_redirect_uri(raw: &str) -> Result<Url, HandshakeError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| HandshakeError::InvalidRedirectUri(e.to_string()))?;
    if !secure_or_loopback(&url) {
        return Err(HandshakeError::InvalidRedirectUri(
            "redirect URI must use https (http is allowed on loopback only)".to_string(),
        ));
    }
    Ok(url)
}

pub fn validate_authorization_url(url: &Url) -> Result<(), HandshakeError> {
    if !secure_or_loopback(url) {
        return Err(HandshakeError::InvalidAuthorizationUrl(
            "authorization URL must use https".to_string(),
        ));
    }
    if url.fragment().is_some() {
        return Err(HandshakeError::InvalidAuthorizationUrl(
            "authorization URL must not carry a fragment".to_string(),
        ));
    }
    if url.as_str().len() > MAX_AUTHORIZATION_URL_LEN {
        return Err(HandshakeError::InvalidAuthorizationUrl(format!(
            "authorization URL exceeds {MAX_AUTHORIZATION_URL_LEN} characters"
        )));
    }
    Ok(())
}
