//! External collaborators: the content generator and the issue verifier.
//!
//! Both are opaque services reached over HTTP; the pipeline and verification loop only see the
//! traits, so tests substitute in-process fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::providers::http::{build_client, snippet};

#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{0} endpoint is not configured")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("collaborator returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid collaborator response: {0}")]
    InvalidResponse(String),
}

impl CollaboratorError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            CollaboratorError::NotConfigured(_) => "configuration",
            CollaboratorError::Transport(_) => "transient",
            CollaboratorError::Status { status, .. } if *status >= 500 => "transient",
            CollaboratorError::Status { .. } => "collaborator_rejected",
            CollaboratorError::InvalidResponse(_) => "collaborator_error",
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollaboratorError::InvalidResponse(err.to_string())
        } else {
            CollaboratorError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub title: String,
    pub keywords: Vec<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub content: String,
    #[serde(default, alias = "meta_title")]
    pub meta_title: Option<String>,
    #[serde(default, alias = "meta_description")]
    pub meta_description: Option<String>,
    #[serde(default, alias = "content_outline")]
    pub content_outline: Option<JsonValue>,
    #[serde(default, alias = "word_count")]
    pub word_count: Option<i32>,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub item_id: Uuid,
    pub site_id: Uuid,
    pub issue_category: String,
    pub analysis: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VerificationOutcome {
    pub resolved: bool,
    #[serde(default)]
    pub details: Option<JsonValue>,
}

#[async_trait]
pub trait IssueVerifier: Send + Sync {
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationOutcome, CollaboratorError>;
}

/// JSON-over-HTTP client shared by both collaborator implementations.
#[derive(Debug, Clone)]
struct JsonEndpoint {
    client: reqwest::Client,
    url: Url,
    token: Option<String>,
}

impl JsonEndpoint {
    fn new(url: Url, token: Option<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            url,
            token,
        }
    }

    async fn post<B, T>(&self, body: &B) -> Result<T, CollaboratorError>
    where
        B: Serialize + Sync,
        T: for<'de> Deserialize<'de>,
    {
        let mut request = self.client.post(self.url.clone()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[derive(Debug, Clone)]
pub struct HttpContentGenerator {
    endpoint: JsonEndpoint,
}

impl HttpContentGenerator {
    pub fn new(url: Url, token: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: JsonEndpoint::new(url, token, timeout),
        }
    }
}

#[async_trait]
impl ContentGenerator for HttpContentGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, CollaboratorError> {
        let generated: GeneratedContent = self.endpoint.post(request).await?;
        if generated.content.trim().is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "generator returned empty content".to_string(),
            ));
        }
        Ok(generated)
    }
}

#[derive(Debug, Clone)]
pub struct HttpIssueVerifier {
    endpoint: JsonEndpoint,
}

impl HttpIssueVerifier {
    pub fn new(url: Url, token: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: JsonEndpoint::new(url, token, timeout),
        }
    }
}

#[async_trait]
impl IssueVerifier for HttpIssueVerifier {
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationOutcome, CollaboratorError> {
        self.endpoint.post(request).await
    }
}

/// Stand-in used when an endpoint is not configured (local profiles only).
#[derive(Debug, Clone, Copy)]
struct Unconfigured(&'static str);

#[async_trait]
impl ContentGenerator for Unconfigured {
    async fn generate(&self, _: &GenerationRequest) -> Result<GeneratedContent, CollaboratorError> {
        Err(CollaboratorError::NotConfigured(self.0))
    }
}

#[async_trait]
impl IssueVerifier for Unconfigured {
    async fn verify(
        &self,
        _: &VerificationRequest,
    ) -> Result<VerificationOutcome, CollaboratorError> {
        Err(CollaboratorError::NotConfigured(self.0))
    }
}

/// The collaborator handles shared through application state.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn ContentGenerator>,
    pub verifier: Arc<dyn IssueVerifier>,
}

impl Collaborators {
    pub fn new(generator: Arc<dyn ContentGenerator>, verifier: Arc<dyn IssueVerifier>) -> Self {
        Self {
            generator,
            verifier,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = config.collaborator_timeout();
        let token = config.collaborator_token.clone();

        let generator: Arc<dyn ContentGenerator> =
            match parse_endpoint("content generator", config.content_generator_url.as_deref()) {
                Some(url) => Arc::new(HttpContentGenerator::new(url, token.clone(), timeout)),
                None => Arc::new(Unconfigured("content generator")),
            };
        let verifier: Arc<dyn IssueVerifier> =
            match parse_endpoint("issue verifier", config.issue_verifier_url.as_deref()) {
                Some(url) => Arc::new(HttpIssueVerifier::new(url, token, timeout)),
                None => Arc::new(Unconfigured("issue verifier")),
            };

        Self::new(generator, verifier)
    }
}

fn parse_endpoint(name: &'static str, raw: Option<&str>) -> Option<Url> {
    let raw = raw?;
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(err) => {
            warn!(collaborator = name, error = %err, "Ignoring invalid collaborator URL");
            None
        }
    }
}
