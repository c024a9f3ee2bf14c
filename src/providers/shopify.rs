//! Shopify adapter
//!
//! OAuth2 per shop: every URL is rooted at the merchant's `<shop>.myshopify.com` domain, which
//! the handshake captures in the provider context. Offline access tokens do not expire.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::adapter::{
    AdapterError, ArticleDraft, CmsAdapter, CredentialBundle, NormalizedArticle,
    ProviderContext, ProviderKind, PublishDestination, PublishMode, PublishTarget, RemoteStatus,
};
use super::http::{build_client, read_json};

const API_VERSION: &str = "2024-10";
const SCOPES: &str = "read_content,write_content";
const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

#[derive(Clone)]
pub struct ShopifyAdapter {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    /// Replaces `https://<shop>` for API calls when set
    origin_override: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Blog {
    id: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct BlogsResponse {
    #[serde(default)]
    blogs: Vec<Blog>,
}

#[derive(Debug, Serialize)]
struct ArticleImage<'a> {
    src: &'a str,
}

#[derive(Debug, Serialize)]
struct ArticlePayload<'a> {
    title: &'a str,
    handle: &'a str,
    body_html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary_html: Option<&'a str>,
    published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<ArticleImage<'a>>,
}

#[derive(Debug, Serialize)]
struct ArticleEnvelope<'a> {
    article: ArticlePayload<'a>,
}

#[derive(Debug, Deserialize)]
struct ShopifyArticle {
    id: u64,
    title: String,
    handle: String,
    #[serde(default)]
    body_html: Option<String>,
    #[serde(default)]
    summary_html: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ArticleResponse {
    article: ShopifyArticle,
}

fn shop_domain_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]*\.myshopify\.com$").ok())
        .as_ref()
}

/// Validates and lowercases a `<shop>.myshopify.com` domain.
pub fn normalize_shop_domain(raw: &str) -> Result<String, AdapterError> {
    let domain = raw
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_ascii_lowercase();
    match shop_domain_pattern() {
        Some(pattern) if pattern.is_match(&domain) => Ok(domain),
        _ => Err(AdapterError::configuration(format!(
            "'{raw}' is not a valid myshopify.com domain"
        ))),
    }
}

impl ShopifyAdapter {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(timeout),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            origin_override: None,
        }
    }

    pub fn with_origin_override(mut self, origin: impl Into<String>) -> Self {
        self.origin_override = Some(origin.into().trim_end_matches('/').to_string());
        self
    }

    fn shop(context: &ProviderContext) -> Result<String, AdapterError> {
        normalize_shop_domain(context.shop_domain()?)
    }

    fn url(&self, context: &ProviderContext, path: &str) -> Result<Url, AdapterError> {
        let shop = Self::shop(context)?;
        let origin = self
            .origin_override
            .clone()
            .unwrap_or_else(|| format!("https://{shop}"));
        Url::parse(&format!("{origin}/{path}"))
            .map_err(|e| AdapterError::configuration(format!("invalid Shopify URL: {e}")))
    }

    fn api_url(&self, context: &ProviderContext, resource: &str) -> Result<Url, AdapterError> {
        self.url(context, &format!("admin/api/{API_VERSION}/{resource}"))
    }

    fn normalize(article: ShopifyArticle) -> NormalizedArticle {
        NormalizedArticle {
            id: article.id.to_string(),
            title: article.title,
            content: article.body_html.unwrap_or_default(),
            excerpt: article.summary_html.filter(|s| !s.trim().is_empty()),
            slug: article.handle,
            status: if article.published_at.is_some() {
                RemoteStatus::Published
            } else {
                RemoteStatus::Draft
            },
            published_at: article.published_at,
            url: None,
        }
    }
}

#[async_trait]
impl CmsAdapter for ShopifyAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Shopify
    }

    fn build_authorization_url(
        &self,
        redirect_uri: &Url,
        state: &str,
        context: &ProviderContext,
    ) -> Result<Url, AdapterError> {
        let shop = Self::shop(context)?;
        let mut url = Url::parse(&format!("https://{shop}/admin/oauth/authorize"))
            .map_err(|e| AdapterError::configuration(format!("invalid Shopify URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", SCOPES)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &Url,
        context: &ProviderContext,
    ) -> Result<CredentialBundle, AdapterError> {
        let response = self
            .client
            .post(self.url(context, "admin/oauth/access_token")?)
            .json(&TokenRequest {
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                code,
            })
            .send()
            .await?;
        let token: TokenResponse = read_json(ProviderKind::Shopify, response)
            .await
            .map_err(AdapterError::into_exchange_error)?;

        info!(provider = "shopify", "Authorization code exchanged");
        Ok(CredentialBundle {
            access_token: token.access_token,
            refresh_token: None,
            expires_at: None,
            scopes: token
                .scope
                .as_deref()
                .unwrap_or(SCOPES)
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    async fn refresh_token(
        &self,
        bundle: &CredentialBundle,
        _context: &ProviderContext,
    ) -> Result<CredentialBundle, AdapterError> {
        Ok(bundle.clone())
    }

    async fn validate_credentials(
        &self,
        bundle: &CredentialBundle,
        context: &ProviderContext,
    ) -> Result<bool, AdapterError> {
        let response = self
            .client
            .get(self.api_url(context, "shop.json")?)
            .header(ACCESS_TOKEN_HEADER, &bundle.access_token)
            .send()
            .await?;
        match read_json::<Value>(ProviderKind::Shopify, response).await {
            Ok(_) => Ok(true),
            Err(AdapterError::Unauthorized { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn list_publish_targets(
        &self,
        bundle: &CredentialBundle,
        context: &ProviderContext,
    ) -> Result<Vec<PublishTarget>, AdapterError> {
        let response = self
            .client
            .get(self.api_url(context, "blogs.json")?)
            .header(ACCESS_TOKEN_HEADER, &bundle.access_token)
            .send()
            .await?;
        let blogs: BlogsResponse = read_json(ProviderKind::Shopify, response).await?;

        Ok(blogs
            .blogs
            .into_iter()
            .map(|blog| PublishTarget {
                id: blog.id.to_string(),
                name: blog.title,
                kind: "blog".to_string(),
            })
            .collect())
    }

    async fn publish_article(
        &self,
        bundle: &CredentialBundle,
        context: &ProviderContext,
        destination: &PublishDestination,
        article: &ArticleDraft,
    ) -> Result<NormalizedArticle, AdapterError> {
        let blog_id = destination.target_id.trim();
        if blog_id.is_empty() || !blog_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(AdapterError::configuration(format!(
                "'{blog_id}' is not a Shopify blog id"
            )));
        }

        let payload = ArticleEnvelope {
            article: ArticlePayload {
                title: &article.title,
                handle: &article.slug,
                body_html: &article.content,
                summary_html: article
                    .excerpt
                    .as_deref()
                    .or(article.meta_description.as_deref()),
                published: destination.mode == PublishMode::Publish,
                image: article
                    .featured_image
                    .as_deref()
                    .map(|src| ArticleImage { src }),
            },
        };

        let request = match article.remote_id.as_deref() {
            Some(article_id) => {
                debug!(provider = "shopify", blog_id, article_id, "Updating article");
                self.client.put(
                    self.api_url(context, &format!("blogs/{blog_id}/articles/{article_id}.json"))?,
                )
            }
            None => {
                debug!(provider = "shopify", blog_id, "Creating article");
                self.client
                    .post(self.api_url(context, &format!("blogs/{blog_id}/articles.json"))?)
            }
        };
        let response = request
            .header(ACCESS_TOKEN_HEADER, &bundle.access_token)
            .json(&payload)
            .send()
            .await?;
        let created: ArticleResponse = read_json(ProviderKind::Shopify, response).await?;
        Ok(Self::normalize(created.article))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context() -> ProviderContext {
        ProviderContext {
            site_url: None,
            shop_domain: Some("acme.myshopify.com".to_string()),
        }
    }

    fn adapter(server: &MockServer) -> ShopifyAdapter {
        ShopifyAdapter::new("cid", "csecret", Duration::from_secs(5))
            .with_origin_override(server.uri())
    }

    fn draft() -> ArticleDraft {
        ArticleDraft {
            title: "Hello".to_string(),
            slug: "hello".to_string(),
            content: "<p>Hi</p>".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn shop_domains_are_validated() {
        assert_eq!(
            normalize_shop_domain("https://Acme.myshopify.com/").unwrap(),
            "acme.myshopify.com"
        );
        assert!(normalize_shop_domain("acme.example.com").is_err());
        assert!(normalize_shop_domain("evil.com/.myshopify.com").is_err());
    }

    #[test]
    fn authorization_url_is_rooted_at_the_shop() {
        let adapter = ShopifyAdapter::new("cid", "csecret", Duration::from_secs(5));
        let redirect = Url::parse("https://app.example.com/cb").unwrap();
        let url = adapter
            .build_authorization_url(&redirect, "s1", &context())
            .unwrap();
        assert_eq!(url.host_str(), Some("acme.myshopify.com"));
        assert_eq!(url.path(), "/admin/oauth/authorize");
    }

    #[test]
    fn missing_shop_domain_is_a_configuration_error() {
        let adapter = ShopifyAdapter::new("cid", "csecret", Duration::from_secs(5));
        let redirect = Url::parse("https://app.example.com/cb").unwrap();
        let err = adapter
            .build_authorization_url(&redirect, "s1", &ProviderContext::default())
            .unwrap_err();
        assert!(matches!(err, AdapterError::Configuration { .. }));
    }

    #[tokio::test]
    async fn exchange_posts_json_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/oauth/access_token"))
            .and(body_partial_json(json!({"client_id": "cid", "code": "abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "shpat_1",
                "scope": "read_content,write_content"
            })))
            .mount(&server)
            .await;

        let redirect = Url::parse("https://app.example.com/cb").unwrap();
        let bundle = adapter(&server)
            .exchange_code("abc", &redirect, &context())
            .await
            .unwrap();
        assert_eq!(bundle.access_token, "shpat_1");
        assert_eq!(bundle.scopes, vec!["read_content", "write_content"]);
    }

    #[tokio::test]
    async fn blogs_become_targets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/api/2024-10/blogs.json"))
            .and(header("X-Shopify-Access-Token", "shpat_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "blogs": [{"id": 101, "title": "News", "handle": "news"}]
            })))
            .mount(&server)
            .await;

        let targets = adapter(&server)
            .list_publish_targets(&CredentialBundle::bearer("shpat_1"), &context())
            .await
            .unwrap();
        assert_eq!(targets[0].id, "101");
        assert_eq!(targets[0].kind, "blog");
    }

    #[tokio::test]
    async fn unpublished_article_normalizes_to_draft() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/api/2024-10/blogs/101/articles.json"))
            .and(body_partial_json(json!({"article": {"published": false}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "article": {
                    "id": 9,
                    "title": "Hello",
                    "handle": "hello",
                    "body_html": "<p>Hi</p>",
                    "summary_html": null,
                    "published_at": null
                }
            })))
            .mount(&server)
            .await;

        let destination = PublishDestination {
            target_id: "101".to_string(),
            mode: PublishMode::Draft,
            field_mapping: None,
        };
        let article = adapter(&server)
            .publish_article(&CredentialBundle::bearer("shpat_1"), &context(), &destination, &draft())
            .await
            .unwrap();
        assert_eq!(article.status, RemoteStatus::Draft);
        assert_eq!(article.published_at, None);
        assert_eq!(article.slug, "hello");
    }

    #[tokio::test]
    async fn published_article_normalizes_to_published() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/api/2024-10/blogs/101/articles.json"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "article": {
                    "id": 10,
                    "title": "Hello",
                    "handle": "hello",
                    "body_html": "<p>Hi</p>",
                    "published_at": "2026-03-01T12:00:00-05:00"
                }
            })))
            .mount(&server)
            .await;

        let destination = PublishDestination {
            target_id: "101".to_string(),
            mode: PublishMode::Publish,
            field_mapping: None,
        };
        let article = adapter(&server)
            .publish_article(&CredentialBundle::bearer("shpat_1"), &context(), &destination, &draft())
            .await
            .unwrap();
        assert_eq!(article.status, RemoteStatus::Published);
        assert_eq!(
            article.published_at.map(|t| t.to_rfc3339()),
            Some("2026-03-01T17:00:00+00:00".to_string())
        );
    }

    #[tokio::test]
    async fn existing_article_is_updated_with_its_image() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/admin/api/2024-10/blogs/101/articles/10.json"))
            .and(body_partial_json(json!({
                "article": {"published": true, "image": {"src": "https://cdn.example.com/hero.png"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "article": {
                    "id": 10,
                    "title": "Hello",
                    "handle": "hello",
                    "body_html": "<p>Hi</p>",
                    "published_at": "2026-03-01T12:00:00Z"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let destination = PublishDestination {
            target_id: "101".to_string(),
            mode: PublishMode::Publish,
            field_mapping: None,
        };
        let draft = ArticleDraft {
            remote_id: Some("10".to_string()),
            featured_image: Some("https://cdn.example.com/hero.png".to_string()),
            ..draft()
        };
        let article = adapter(&server)
            .publish_article(&CredentialBundle::bearer("shpat_1"), &context(), &destination, &draft)
            .await
            .unwrap();
        assert_eq!(article.id, "10");
        assert_eq!(article.status, RemoteStatus::Published);
    }

    #[tokio::test]
    async fn revoked_token_fails_validation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/api/2024-10/shop.json"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let valid = adapter(&server)
            .validate_credentials(&CredentialBundle::bearer("old"), &context())
            .await
            .unwrap();
        assert!(!valid);
    }
}
