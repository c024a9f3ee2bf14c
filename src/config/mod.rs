//! Configuration loading for the publisher service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `POBLYSH_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `POBLYSH_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    /// Bearer secrets accepted on the `/cron/*` routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cron_secrets: Vec<String>,
    /// HMAC key for owner tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_token_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cors_allowed_origins: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_generator_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_verifier_url: Option<String>,
    /// Bearer token sent to the generator and verifier services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaborator_token: Option<String>,
    #[serde(default = "default_collaborator_timeout_seconds")]
    pub collaborator_timeout_seconds: u64,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub providers: ProviderClientConfig,
}

/// Scheduled publisher parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PublisherConfig {
    /// Run the background loop in `serve`
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_publisher_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// Random extra delay per tick as a fraction of the interval
    #[serde(default = "default_publisher_jitter_pct")]
    pub jitter_pct: f64,
    #[serde(default = "default_publisher_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_publisher_inter_job_delay_ms")]
    pub inter_job_delay_ms: u64,
    /// Overall deadline for one run
    #[serde(default = "default_publisher_run_timeout_seconds")]
    pub run_timeout_seconds: u64,
    /// Claims older than this are swept back to their failure state
    #[serde(default = "default_publisher_stale_claim_seconds")]
    pub stale_claim_seconds: u64,
}

/// Remediation verification loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct VerificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_verification_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    #[serde(default = "default_verification_batch_size")]
    pub batch_size: u64,
    /// Unresolved checks allowed before an item is marked failed
    #[serde(default = "default_verification_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_verification_base_delay_seconds")]
    pub base_delay_seconds: u64,
    #[serde(default = "default_verification_max_delay_seconds")]
    pub max_delay_seconds: u64,
}

/// OAuth handshake parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HandshakeConfig {
    #[serde(default = "default_handshake_state_ttl_seconds")]
    pub state_ttl_seconds: u64,
}

/// Outbound CMS client settings and OAuth client credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ProviderClientConfig {
    #[serde(default = "default_provider_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    /// Credentials expiring within this window are refreshed before publishing
    #[serde(default = "default_provider_token_refresh_lead_seconds")]
    pub token_refresh_lead_seconds: u64,
    #[serde(default = "default_wordpress_app_name")]
    pub wordpress_app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webflow_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webflow_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webflow_auth_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webflow_api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shopify_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shopify_client_secret: Option<String>,
    /// Replaces `https://<shop>` for API calls (sandboxes, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shopify_origin_override: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            cron_secrets: Vec::new(),
            owner_token_secret: None,
            cors_allowed_origins: Vec::new(),
            content_generator_url: None,
            issue_verifier_url: None,
            collaborator_token: None,
            collaborator_timeout_seconds: default_collaborator_timeout_seconds(),
            publisher: PublisherConfig::default(),
            verification: VerificationConfig::default(),
            handshake: HandshakeConfig::default(),
            providers: ProviderClientConfig::default(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: default_publisher_tick_interval_seconds(),
            jitter_pct: default_publisher_jitter_pct(),
            batch_size: default_publisher_batch_size(),
            inter_job_delay_ms: default_publisher_inter_job_delay_ms(),
            run_timeout_seconds: default_publisher_run_timeout_seconds(),
            stale_claim_seconds: default_publisher_stale_claim_seconds(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: default_verification_tick_interval_seconds(),
            batch_size: default_verification_batch_size(),
            max_attempts: default_verification_max_attempts(),
            base_delay_seconds: default_verification_base_delay_seconds(),
            max_delay_seconds: default_verification_max_delay_seconds(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_handshake_state_ttl_seconds(),
        }
    }
}

impl Default for ProviderClientConfig {
    fn default() -> Self {
        Self {
            http_timeout_seconds: default_provider_http_timeout_seconds(),
            token_refresh_lead_seconds: default_provider_token_refresh_lead_seconds(),
            wordpress_app_name: default_wordpress_app_name(),
            webflow_client_id: None,
            webflow_client_secret: None,
            webflow_auth_base: None,
            webflow_api_base: None,
            shopify_client_id: None,
            shopify_client_secret: None,
            shopify_origin_override: None,
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 10 || self.tick_interval_seconds > 86400 {
            return Err(ConfigError::InvalidPublisherTickInterval {
                value: self.tick_interval_seconds,
            });
        }
        if self.batch_size == 0 || self.batch_size > 500 {
            return Err(ConfigError::InvalidBatchSize {
                section: "publisher",
                value: self.batch_size,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_pct) {
            return Err(ConfigError::InvalidPublisherJitter {
                value: self.jitter_pct,
            });
        }
        if self.run_timeout_seconds == 0 {
            return Err(ConfigError::InvalidPublisherRunTimeout {
                value: self.run_timeout_seconds,
            });
        }
        // A claim younger than one run may still be in flight
        if self.stale_claim_seconds < self.run_timeout_seconds {
            return Err(ConfigError::InvalidStaleClaimWindow {
                stale: self.stale_claim_seconds,
                run_timeout: self.run_timeout_seconds,
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn inter_job_delay(&self) -> Duration {
        Duration::from_millis(self.inter_job_delay_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    pub fn stale_claim_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_claim_seconds as i64)
    }
}

impl VerificationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 10 {
            return Err(ConfigError::InvalidVerificationTickInterval {
                value: self.tick_interval_seconds,
            });
        }
        if self.batch_size == 0 || self.batch_size > 500 {
            return Err(ConfigError::InvalidBatchSize {
                section: "verification",
                value: self.batch_size,
            });
        }
        if self.max_attempts < 1 {
            return Err(ConfigError::InvalidVerificationAttempts {
                value: self.max_attempts,
            });
        }
        if self.base_delay_seconds == 0 || self.base_delay_seconds > self.max_delay_seconds {
            return Err(ConfigError::InvalidVerificationBackoff {
                base: self.base_delay_seconds,
                max: self.max_delay_seconds,
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }
}

impl HandshakeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_ttl_seconds < 60 || self.state_ttl_seconds > 3600 {
            return Err(ConfigError::InvalidStateTtl {
                value: self.state_ttl_seconds,
            });
        }
        Ok(())
    }

    pub fn state_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.state_ttl_seconds as i64)
    }
}

impl ProviderClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_timeout_seconds == 0 || self.http_timeout_seconds > 300 {
            return Err(ConfigError::InvalidProviderTimeout {
                value: self.http_timeout_seconds,
            });
        }
        if self.webflow_client_id.is_some() != self.webflow_client_secret.is_some() {
            return Err(ConfigError::IncompleteProviderCredentials { provider: "webflow" });
        }
        if self.shopify_client_id.is_some() != self.shopify_client_secret.is_some() {
            return Err(ConfigError::IncompleteProviderCredentials { provider: "shopify" });
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn token_refresh_lead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_refresh_lead_seconds as i64)
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_seconds)
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let redacted = || "[REDACTED]".to_string();
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        if !config.cron_secrets.is_empty() {
            config.cron_secrets = vec![redacted()];
        }
        if config.owner_token_secret.is_some() {
            config.owner_token_secret = Some(redacted());
        }
        if config.collaborator_token.is_some() {
            config.collaborator_token = Some(redacted());
        }
        if config.providers.webflow_client_secret.is_some() {
            config.providers.webflow_client_secret = Some(redacted());
        }
        if config.providers.shopify_client_secret.is_some() {
            config.providers.shopify_client_secret = Some(redacted());
        }
        // Connection strings carry credentials
        config.database_url = redacted();
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if self.cron_secrets.is_empty() {
            return Err(ConfigError::MissingCronSecrets);
        }

        match self.owner_token_secret.as_deref() {
            None | Some("") => return Err(ConfigError::MissingOwnerTokenSecret),
            Some(secret) if secret.len() < 16 => {
                return Err(ConfigError::WeakOwnerTokenSecret {
                    length: secret.len(),
                });
            }
            Some(_) => {}
        }

        // Outside local/test the collaborators must be reachable
        if !matches!(self.profile.as_str(), "local" | "test") {
            if self.content_generator_url.is_none() {
                return Err(ConfigError::MissingCollaboratorUrl {
                    name: "CONTENT_GENERATOR_URL",
                });
            }
            if self.issue_verifier_url.is_none() {
                return Err(ConfigError::MissingCollaboratorUrl {
                    name: "ISSUE_VERIFIER_URL",
                });
            }
        }

        self.publisher.validate()?;
        self.verification.validate()?;
        self.handshake.validate()?;
        self.providers.validate()?;

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/publisher".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_collaborator_timeout_seconds() -> u64 {
    120 // generation is slow
}

fn default_publisher_tick_interval_seconds() -> u64 {
    300 // 5 minutes
}

fn default_publisher_jitter_pct() -> f64 {
    0.1
}

fn default_publisher_batch_size() -> u64 {
    10
}

fn default_publisher_inter_job_delay_ms() -> u64 {
    1000
}

fn default_publisher_run_timeout_seconds() -> u64 {
    240 // 4 minutes
}

fn default_publisher_stale_claim_seconds() -> u64 {
    900 // 15 minutes
}

fn default_verification_tick_interval_seconds() -> u64 {
    900 // 15 minutes
}

fn default_verification_batch_size() -> u64 {
    25
}

fn default_verification_max_attempts() -> i32 {
    5
}

fn default_verification_base_delay_seconds() -> u64 {
    3600 // 1 hour
}

fn default_verification_max_delay_seconds() -> u64 {
    172_800 // 48 hours
}

fn default_handshake_state_ttl_seconds() -> u64 {
    900 // 15 minutes
}

fn default_provider_http_timeout_seconds() -> u64 {
    20
}

fn default_provider_token_refresh_lead_seconds() -> u64 {
    300
}

fn default_wordpress_app_name() -> String {
    "Poblysh".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("crypto key is missing; set POBLYSH_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("no cron secrets configured; set POBLYSH_CRON_SECRET or POBLYSH_CRON_SECRETS")]
    MissingCronSecrets,
    #[error("owner token secret is missing; set POBLYSH_OWNER_TOKEN_SECRET")]
    MissingOwnerTokenSecret,
    #[error("owner token secret must be at least 16 bytes, got {length}")]
    WeakOwnerTokenSecret { length: usize },
    #[error("collaborator endpoint is missing; set POBLYSH_{name}")]
    MissingCollaboratorUrl { name: &'static str },
    #[error("publisher tick interval must be between 10 and 86400 seconds, got {value}")]
    InvalidPublisherTickInterval { value: u64 },
    #[error("publisher jitter percentage must be between 0.0 and 1.0, got {value}")]
    InvalidPublisherJitter { value: f64 },
    #[error("publisher run timeout must be positive, got {value}")]
    InvalidPublisherRunTimeout { value: u64 },
    #[error("stale claim window ({stale}s) must not be shorter than the run timeout ({run_timeout}s)")]
    InvalidStaleClaimWindow { stale: u64, run_timeout: u64 },
    #[error("{section} batch size must be between 1 and 500, got {value}")]
    InvalidBatchSize { section: &'static str, value: u64 },
    #[error("verification tick interval must be at least 10 seconds, got {value}")]
    InvalidVerificationTickInterval { value: u64 },
    #[error("verification max attempts must be at least 1, got {value}")]
    InvalidVerificationAttempts { value: i32 },
    #[error("verification base delay ({base}s) must be positive and not exceed max delay ({max}s)")]
    InvalidVerificationBackoff { base: u64, max: u64 },
    #[error("OAuth state TTL must be between 60 and 3600 seconds, got {value}")]
    InvalidStateTtl { value: u64 },
    #[error("provider HTTP timeout must be between 1 and 300 seconds, got {value}")]
    InvalidProviderTimeout { value: u64 },
    #[error("{provider} client id and secret must be configured together")]
    IncompleteProviderCredentials { provider: &'static str },
}

/// Loads configuration using layered `.env` files and `POBLYSH_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

fn take_non_empty(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: FromStr>(layered: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    layered.remove(key).and_then(|v| v.trim().parse().ok())
}

fn take_list(layered: &mut BTreeMap<String, String>, key: &str) -> Option<Vec<String>> {
    layered.remove(key).map(|list| {
        list.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("POBLYSH_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_non_empty(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_non_empty(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_non_empty(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_non_empty(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_non_empty(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let crypto_key = match take_non_empty(&mut layered, "CRYPTO_KEY") {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(&key_str).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        // Support both a comma-separated list and a single secret
        let cron_secrets = take_list(&mut layered, "CRON_SECRETS")
            .or_else(|| take_non_empty(&mut layered, "CRON_SECRET").map(|s| vec![s]))
            .unwrap_or_default();
        let owner_token_secret = take_non_empty(&mut layered, "OWNER_TOKEN_SECRET");
        let cors_allowed_origins =
            take_list(&mut layered, "CORS_ALLOWED_ORIGINS").unwrap_or_default();

        let content_generator_url = take_non_empty(&mut layered, "CONTENT_GENERATOR_URL");
        let issue_verifier_url = take_non_empty(&mut layered, "ISSUE_VERIFIER_URL");
        let collaborator_token = take_non_empty(&mut layered, "COLLABORATOR_TOKEN");
        let collaborator_timeout_seconds = take_parsed(&mut layered, "COLLABORATOR_TIMEOUT_SECONDS")
            .unwrap_or_else(default_collaborator_timeout_seconds);

        let publisher = PublisherConfig {
            enabled: take_parsed(&mut layered, "PUBLISHER_ENABLED").unwrap_or(true),
            tick_interval_seconds: take_parsed(&mut layered, "PUBLISHER_TICK_INTERVAL_SECONDS")
                .unwrap_or_else(default_publisher_tick_interval_seconds),
            jitter_pct: take_parsed(&mut layered, "PUBLISHER_JITTER_PCT")
                .unwrap_or_else(default_publisher_jitter_pct),
            batch_size: take_parsed(&mut layered, "PUBLISHER_BATCH_SIZE")
                .unwrap_or_else(default_publisher_batch_size),
            inter_job_delay_ms: take_parsed(&mut layered, "PUBLISHER_INTER_JOB_DELAY_MS")
                .unwrap_or_else(default_publisher_inter_job_delay_ms),
            run_timeout_seconds: take_parsed(&mut layered, "PUBLISHER_RUN_TIMEOUT_SECONDS")
                .unwrap_or_else(default_publisher_run_timeout_seconds),
            stale_claim_seconds: take_parsed(&mut layered, "PUBLISHER_STALE_CLAIM_SECONDS")
                .unwrap_or_else(default_publisher_stale_claim_seconds),
        };

        let verification = VerificationConfig {
            enabled: take_parsed(&mut layered, "VERIFICATION_ENABLED").unwrap_or(true),
            tick_interval_seconds: take_parsed(&mut layered, "VERIFICATION_TICK_INTERVAL_SECONDS")
                .unwrap_or_else(default_verification_tick_interval_seconds),
            batch_size: take_parsed(&mut layered, "VERIFICATION_BATCH_SIZE")
                .unwrap_or_else(default_verification_batch_size),
            max_attempts: take_parsed(&mut layered, "VERIFICATION_MAX_ATTEMPTS")
                .unwrap_or_else(default_verification_max_attempts),
            base_delay_seconds: take_parsed(&mut layered, "VERIFICATION_BASE_DELAY_SECONDS")
                .unwrap_or_else(default_verification_base_delay_seconds),
            max_delay_seconds: take_parsed(&mut layered, "VERIFICATION_MAX_DELAY_SECONDS")
                .unwrap_or_else(default_verification_max_delay_seconds),
        };

        let handshake = HandshakeConfig {
            state_ttl_seconds: take_parsed(&mut layered, "HANDSHAKE_STATE_TTL_SECONDS")
                .unwrap_or_else(default_handshake_state_ttl_seconds),
        };

        let providers = ProviderClientConfig {
            http_timeout_seconds: take_parsed(&mut layered, "PROVIDER_HTTP_TIMEOUT_SECONDS")
                .unwrap_or_else(default_provider_http_timeout_seconds),
            token_refresh_lead_seconds: take_parsed(
                &mut layered,
                "PROVIDER_TOKEN_REFRESH_LEAD_SECONDS",
            )
            .unwrap_or_else(default_provider_token_refresh_lead_seconds),
            wordpress_app_name: take_non_empty(&mut layered, "WORDPRESS_APP_NAME")
                .unwrap_or_else(default_wordpress_app_name),
            webflow_client_id: take_non_empty(&mut layered, "WEBFLOW_CLIENT_ID"),
            webflow_client_secret: take_non_empty(&mut layered, "WEBFLOW_CLIENT_SECRET"),
            webflow_auth_base: take_non_empty(&mut layered, "WEBFLOW_AUTH_BASE"),
            webflow_api_base: take_non_empty(&mut layered, "WEBFLOW_API_BASE"),
            shopify_client_id: take_non_empty(&mut layered, "SHOPIFY_CLIENT_ID"),
            shopify_client_secret: take_non_empty(&mut layered, "SHOPIFY_CLIENT_SECRET"),
            shopify_origin_override: take_non_empty(&mut layered, "SHOPIFY_ORIGIN_OVERRIDE"),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            crypto_key,
            cron_secrets,
            owner_token_secret,
            cors_allowed_origins,
            content_generator_url,
            issue_verifier_url,
            collaborator_token,
            collaborator_timeout_seconds,
            publisher,
            verification,
            handshake,
            providers,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("POBLYSH_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("POBLYSH_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            crypto_key: Some(vec![7u8; 32]),
            cron_secrets: vec!["cron-secret".to_string()],
            owner_token_secret: Some("owner-token-secret-0123".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_validate_once_secrets_are_present() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_secrets_are_reported() {
        let config = AppConfig {
            cron_secrets: Vec::new(),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCronSecrets)
        ));

        let config = AppConfig {
            owner_token_secret: Some("short".to_string()),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeakOwnerTokenSecret { length: 5 })
        ));
    }

    #[test]
    fn production_profile_requires_collaborators() {
        let config = AppConfig {
            profile: "production".to_string(),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCollaboratorUrl { .. })
        ));
    }

    #[test]
    fn verification_backoff_bounds() {
        let config = VerificationConfig {
            base_delay_seconds: 7200,
            max_delay_seconds: 3600,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VerificationConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(VerificationConfig::default().validate().is_ok());
    }

    #[test]
    fn stale_claim_window_must_cover_a_run() {
        let config = PublisherConfig {
            run_timeout_seconds: 600,
            stale_claim_seconds: 300,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidStaleClaimWindow { .. })
        ));
    }

    #[test]
    fn half_configured_oauth_client_is_rejected() {
        let config = ProviderClientConfig {
            shopify_client_id: Some("id".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompleteProviderCredentials { provider: "shopify" })
        ));
    }

    #[test]
    fn redacted_json_hides_secrets() {
        let config = AppConfig {
            providers: ProviderClientConfig {
                webflow_client_id: Some("wf-id".to_string()),
                webflow_client_secret: Some("wf-super-secret".to_string()),
                ..Default::default()
            },
            ..valid_config()
        };
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("wf-super-secret"));
        assert!(!json.contains("owner-token-secret-0123"));
        assert!(!json.contains("cron-secret"));
        assert!(json.contains("wf-id"));
    }
}
