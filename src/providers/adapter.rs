//! Adapter trait definition
//!
//! Defines the capability interface every CMS platform implements, plus the value types that
//! cross it. Everything a caller sees here is already normalized: raw provider status strings
//! and payload shapes never leave an adapter.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

use super::field_mapping::FieldMapping;

/// Supported CMS platforms. The set is closed; adding one means adding an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "wordpress")]
    WordPress,
    Webflow,
    Shopify,
    Ghost,
}

/// How a platform authorizes the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    /// Username plus application password over HTTP Basic
    FormAuth,
    /// OAuth2 with a site → collection hierarchy of publish targets
    OAuthCollections,
    /// OAuth2 where the shop domain is part of every URL
    OAuthShopDomain,
    /// A long-lived API key pasted by the user
    TokenOnly,
}

impl AuthFlow {
    pub fn supports_refresh(&self) -> bool {
        matches!(self, AuthFlow::OAuthCollections | AuthFlow::OAuthShopDomain)
    }
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::WordPress,
        ProviderKind::Webflow,
        ProviderKind::Shopify,
        ProviderKind::Ghost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::WordPress => "wordpress",
            ProviderKind::Webflow => "webflow",
            ProviderKind::Shopify => "shopify",
            ProviderKind::Ghost => "ghost",
        }
    }

    pub fn auth_flow(&self) -> AuthFlow {
        match self {
            ProviderKind::WordPress => AuthFlow::FormAuth,
            ProviderKind::Webflow => AuthFlow::OAuthCollections,
            ProviderKind::Shopify => AuthFlow::OAuthShopDomain,
            ProviderKind::Ghost => AuthFlow::TokenOnly,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownProvider(value.to_string()))
    }
}

/// Provider-specific context captured when a handshake starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderContext {
    /// Base URL of a self-hosted site (WordPress, Ghost)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    /// `<shop>.myshopify.com` domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_domain: Option<String>,
}

impl ProviderContext {
    /// Site base URL with a trailing slash so relative joins keep the full path.
    pub fn site_url(&self) -> Result<Url, AdapterError> {
        let raw = self
            .site_url
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| AdapterError::configuration("site URL is required"))?;
        let mut url = Url::parse(raw.trim())
            .map_err(|e| AdapterError::configuration(format!("invalid site URL: {e}")))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn shop_domain(&self) -> Result<&str, AdapterError> {
        self.shop_domain
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AdapterError::configuration("shop domain is required"))
    }

    /// Human label for a connection made with this context.
    pub fn label(&self) -> Option<String> {
        self.shop_domain.clone().or_else(|| self.site_url.clone())
    }
}

/// Credentials returned by a token exchange or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl CredentialBundle {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scopes: Vec::new(),
        }
    }

    /// True when the token expires within `lead` of `now`. Bundles without expiry never do.
    pub fn expires_within(&self, now: DateTime<Utc>, lead: Duration) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now + lead)
    }
}

/// One destination a connection can publish into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishTarget {
    /// Opaque id; two-level hierarchies use `parentId:childId`
    pub id: String,
    pub name: String,
    /// `site`, `blog` or `collection`
    pub kind: String,
}

/// Whether new entries go live immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    Draft,
    #[default]
    Publish,
}

/// Where and how an article is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishDestination {
    pub target_id: String,
    pub mode: PublishMode,
    pub field_mapping: Option<FieldMapping>,
}

/// Article content handed to an adapter.
///
/// When `remote_id` is set an earlier attempt already created the entry, and the adapter
/// updates it in place instead of creating another one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleDraft {
    pub remote_id: Option<String>,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    /// Absolute image URL
    pub featured_image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Draft,
    Published,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Draft => "draft",
            RemoteStatus::Published => "published",
        }
    }
}

/// Canonical shape of a remote entry after publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedArticle {
    pub id: String,
    pub title: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub slug: String,
    pub status: RemoteStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

/// Errors surfaced by adapters, already classified for the pipeline's failure policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The platform refused the request itself (bad code, invalid payload)
    #[error("provider rejected the request: {message}")]
    ProviderRejected { message: String },
    /// Stored credentials are no longer accepted
    #[error("provider authorization failed: {message}")]
    Unauthorized { message: String },
    #[error("provider rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },
    /// Timeouts, connection failures and 5xx responses
    #[error("provider temporarily unavailable: {message}")]
    Transient { message: String },
    #[error("malformed provider response: {message}")]
    MalformedResponse { message: String },
    /// Missing context, target or mapping; retrying without a config change cannot help
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("operation '{operation}' is not supported by this provider")]
    Unsupported { operation: &'static str },
}

impl AdapterError {
    pub fn configuration(message: impl Into<String>) -> Self {
        AdapterError::Configuration {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        AdapterError::ProviderRejected {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        AdapterError::MalformedResponse {
            message: message.into(),
        }
    }

    /// Machine-readable reason code recorded on jobs and returned to API clients.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AdapterError::ProviderRejected { .. } => "provider_rejected",
            AdapterError::Unauthorized { .. } => "reconnect_required",
            AdapterError::RateLimited { .. } => "rate_limited",
            AdapterError::Transient { .. } => "transient",
            AdapterError::MalformedResponse { .. } => "provider_error",
            AdapterError::Configuration { .. } => "configuration",
            AdapterError::Unsupported { .. } => "unsupported",
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, AdapterError::Unauthorized { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::Transient { .. } | AdapterError::RateLimited { .. }
        )
    }

    /// During a code exchange an authorization failure means the code itself was refused.
    pub fn into_exchange_error(self) -> Self {
        match self {
            AdapterError::Unauthorized { message } => AdapterError::ProviderRejected { message },
            other => other,
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AdapterError::malformed(err.to_string())
        } else {
            AdapterError::Transient {
                message: err.to_string(),
            }
        }
    }
}

/// Capability interface implemented once per CMS platform.
#[async_trait]
pub trait CmsAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Builds the URL the user is sent to. Pure; no network access.
    fn build_authorization_url(
        &self,
        redirect_uri: &Url,
        state: &str,
        context: &ProviderContext,
    ) -> Result<Url, AdapterError>;

    /// Trades the callback code for credentials. A refused code is `ProviderRejected`.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &Url,
        context: &ProviderContext,
    ) -> Result<CredentialBundle, AdapterError>;

    /// Rotates credentials. Platforms without refresh tokens return the bundle unchanged.
    async fn refresh_token(
        &self,
        bundle: &CredentialBundle,
        context: &ProviderContext,
    ) -> Result<CredentialBundle, AdapterError>;

    /// Cheap authenticated call. `Ok(false)` when the credentials are refused.
    async fn validate_credentials(
        &self,
        bundle: &CredentialBundle,
        context: &ProviderContext,
    ) -> Result<bool, AdapterError>;

    async fn list_publish_targets(
        &self,
        bundle: &CredentialBundle,
        context: &ProviderContext,
    ) -> Result<Vec<PublishTarget>, AdapterError>;

    /// Creates the remote entry, or updates `article.remote_id` when present.
    async fn publish_article(
        &self,
        bundle: &CredentialBundle,
        context: &ProviderContext,
        destination: &PublishDestination,
        article: &ArticleDraft,
    ) -> Result<NormalizedArticle, AdapterError>;

    /// Target used when a connection never selected one. Only single-target platforms have it.
    fn default_target_id(&self) -> Option<&'static str> {
        None
    }

    /// Whether publishing needs a field mapping for the chosen target.
    fn requires_field_mapping(&self) -> bool {
        false
    }

    async fn infer_field_mapping(
        &self,
        _bundle: &CredentialBundle,
        _context: &ProviderContext,
        _target_id: &str,
    ) -> Result<FieldMapping, AdapterError> {
        Err(AdapterError::Unsupported {
            operation: "infer_field_mapping",
        })
    }
}
