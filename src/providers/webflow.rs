//! Webflow adapter
//!
//! OAuth2 platform with a two-level target hierarchy (site → CMS collection). Collections carry
//! user-defined schemas, so publishing goes through a field mapping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::adapter::{
    AdapterError, ArticleDraft, CmsAdapter, CredentialBundle, NormalizedArticle,
    ProviderContext, ProviderKind, PublishDestination, PublishMode, PublishTarget, RemoteStatus,
};
use super::field_mapping::{CollectionField, FieldMapping, infer_field_mapping};
use super::http::{build_client, read_json};

const DEFAULT_AUTH_BASE: &str = "https://webflow.com";
const DEFAULT_API_BASE: &str = "https://api.webflow.com";
const SCOPES: &str = "sites:read cms:read cms:write";

#[derive(Clone)]
pub struct WebflowAdapter {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_base: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Site {
    id: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct SitesResponse {
    #[serde(default)]
    sites: Vec<Site>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Collection {
    id: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct CollectionsResponse {
    #[serde(default)]
    collections: Vec<Collection>,
}

#[derive(Debug, Deserialize)]
struct CollectionSchema {
    #[serde(default)]
    fields: Vec<CollectionField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionItem {
    id: String,
    #[serde(default)]
    is_draft: bool,
    #[serde(default)]
    last_published: Option<DateTime<Utc>>,
    #[serde(default)]
    field_data: Map<String, Value>,
}

impl WebflowAdapter {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(timeout),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Points the adapter at alternative hosts (sandbox or mock servers).
    pub fn with_base_urls(mut self, auth_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.auth_base = auth_base.into().trim_end_matches('/').to_string();
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn join(base: &str, path: &str) -> Result<Url, AdapterError> {
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| AdapterError::configuration(format!("invalid Webflow URL: {e}")))
    }

    fn api_url(&self, path: &str) -> Result<Url, AdapterError> {
        Self::join(&self.api_base, path)
    }

    /// Collection part of a `site:collection` target id.
    fn collection_id(target_id: &str) -> Result<&str, AdapterError> {
        let collection = target_id
            .rsplit_once(':')
            .map_or(target_id, |(_, collection)| collection);
        if collection.is_empty() {
            return Err(AdapterError::configuration("publish target is missing a collection id"));
        }
        Ok(collection)
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<CredentialBundle, AdapterError> {
        let response = self
            .client
            .post(self.api_url("oauth/access_token")?)
            .form(form)
            .send()
            .await?;
        let token: TokenResponse = read_json(ProviderKind::Webflow, response).await?;

        Ok(CredentialBundle {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            scopes: token
                .scope
                .as_deref()
                .unwrap_or(SCOPES)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        })
    }

    fn field_data(mapping: &FieldMapping, article: &ArticleDraft) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(mapping.title.clone(), json!(article.title));
        data.insert(mapping.slug.clone(), json!(article.slug));
        data.insert(mapping.body.clone(), json!(article.content));
        if let (Some(field), Some(value)) = (&mapping.meta_title, &article.meta_title) {
            data.insert(field.clone(), json!(value));
        }
        if let (Some(field), Some(value)) = (&mapping.meta_description, &article.meta_description) {
            data.insert(field.clone(), json!(value));
        }
        if let (Some(field), Some(url)) = (&mapping.featured_image, &article.featured_image) {
            data.insert(field.clone(), json!({ "url": url }));
        }
        data
    }

    fn normalize(item: CollectionItem, mapping: &FieldMapping) -> NormalizedArticle {
        let text = |field: &str| {
            item.field_data
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let published = !item.is_draft && item.last_published.is_some();

        NormalizedArticle {
            title: text(&mapping.title).unwrap_or_default(),
            slug: text(&mapping.slug).unwrap_or_default(),
            content: text(&mapping.body).unwrap_or_default(),
            excerpt: mapping
                .meta_description
                .as_deref()
                .and_then(text)
                .filter(|e| !e.trim().is_empty()),
            status: if published {
                RemoteStatus::Published
            } else {
                RemoteStatus::Draft
            },
            published_at: if published { item.last_published } else { None },
            url: None,
            id: item.id,
        }
    }
}

#[async_trait]
impl CmsAdapter for WebflowAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Webflow
    }

    fn build_authorization_url(
        &self,
        redirect_uri: &Url,
        state: &str,
        _context: &ProviderContext,
    ) -> Result<Url, AdapterError> {
        let mut url = Self::join(&self.auth_base, "oauth/authorize")?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("scope", SCOPES)
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &Url,
        _context: &ProviderContext,
    ) -> Result<CredentialBundle, AdapterError> {
        let bundle = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("code", code),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .await
            .map_err(AdapterError::into_exchange_error)?;
        info!(provider = "webflow", "Authorization code exchanged");
        Ok(bundle)
    }

    async fn refresh_token(
        &self,
        bundle: &CredentialBundle,
        _context: &ProviderContext,
    ) -> Result<CredentialBundle, AdapterError> {
        let Some(refresh_token) = bundle.refresh_token.as_deref() else {
            return Ok(bundle.clone());
        };

        let mut refreshed = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("refresh_token", refresh_token),
            ])
            .await?;
        // Rotation is optional; keep the old refresh token when none is returned
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token.to_string());
        }
        Ok(refreshed)
    }

    async fn validate_credentials(
        &self,
        bundle: &CredentialBundle,
        _context: &ProviderContext,
    ) -> Result<bool, AdapterError> {
        let response = self
            .client
            .get(self.api_url("v2/token/authorized_by")?)
            .bearer_auth(&bundle.access_token)
            .send()
            .await?;
        match read_json::<Value>(ProviderKind::Webflow, response).await {
            Ok(_) => Ok(true),
            Err(AdapterError::Unauthorized { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn list_publish_targets(
        &self,
        bundle: &CredentialBundle,
        _context: &ProviderContext,
    ) -> Result<Vec<PublishTarget>, AdapterError> {
        let response = self
            .client
            .get(self.api_url("v2/sites")?)
            .bearer_auth(&bundle.access_token)
            .send()
            .await?;
        let sites: SitesResponse = read_json(ProviderKind::Webflow, response).await?;

        let mut targets = Vec::new();
        for site in sites.sites {
            let response = self
                .client
                .get(self.api_url(&format!("v2/sites/{}/collections", site.id))?)
                .bearer_auth(&bundle.access_token)
                .send()
                .await?;
            let collections: CollectionsResponse =
                read_json(ProviderKind::Webflow, response).await?;

            for collection in collections.collections {
                targets.push(PublishTarget {
                    id: format!("{}:{}", site.id, collection.id),
                    name: format!("{} / {}", site.display_name, collection.display_name),
                    kind: "collection".to_string(),
                });
            }
        }

        debug!(provider = "webflow", count = targets.len(), "Listed collections");
        Ok(targets)
    }

    async fn publish_article(
        &self,
        bundle: &CredentialBundle,
        _context: &ProviderContext,
        destination: &PublishDestination,
        article: &ArticleDraft,
    ) -> Result<NormalizedArticle, AdapterError> {
        let mapping = destination.field_mapping.as_ref().ok_or_else(|| {
            AdapterError::configuration("Webflow collections need a field mapping before publishing")
        })?;
        let collection_id = Self::collection_id(&destination.target_id)?;

        let items = match article.remote_id.as_deref() {
            Some(item_id) => format!("v2/collections/{collection_id}/items/{item_id}"),
            None => format!("v2/collections/{collection_id}/items"),
        };
        let (path, is_draft) = match destination.mode {
            PublishMode::Publish => (format!("{items}/live"), false),
            PublishMode::Draft => (items, true),
        };
        let payload = json!({
            "isArchived": false,
            "isDraft": is_draft,
            "fieldData": Self::field_data(mapping, article),
        });

        let request = match article.remote_id {
            Some(_) => self.client.patch(self.api_url(&path)?),
            None => self.client.post(self.api_url(&path)?),
        };
        let response = request
            .bearer_auth(&bundle.access_token)
            .json(&payload)
            .send()
            .await?;
        let item: CollectionItem = read_json(ProviderKind::Webflow, response).await?;
        if destination.mode == PublishMode::Publish && item.last_published.is_none() {
            warn!(provider = "webflow", item_id = %item.id, "Live item returned without publish time");
        }
        Ok(Self::normalize(item, mapping))
    }

    fn requires_field_mapping(&self) -> bool {
        true
    }

    async fn infer_field_mapping(
        &self,
        bundle: &CredentialBundle,
        _context: &ProviderContext,
        target_id: &str,
    ) -> Result<FieldMapping, AdapterError> {
        let collection_id = Self::collection_id(target_id)?;
        let response = self
            .client
            .get(self.api_url(&format!("v2/collections/{collection_id}"))?)
            .bearer_auth(&bundle.access_token)
            .send()
            .await?;
        let schema: CollectionSchema = read_json(ProviderKind::Webflow, response).await?;
        infer_field_mapping(&schema.fields)
    }
}
