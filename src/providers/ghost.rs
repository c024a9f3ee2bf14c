//! Ghost adapter
//!
//! Token-only platform. The user pastes an Admin API key (`<id>:<hex secret>`); each request is
//! signed with a short-lived HS256 JWT derived from it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::adapter::{
    AdapterError, ArticleDraft, CmsAdapter, CredentialBundle, NormalizedArticle,
    ProviderContext, ProviderKind, PublishDestination, PublishMode, PublishTarget, RemoteStatus,
};
use super::http::{build_client, read_json};

const ADMIN_AUDIENCE: &str = "/admin/";
const TOKEN_TTL_SECS: i64 = 300;

/// Single publish target: the site's posts.
pub const POSTS_TARGET_ID: &str = "posts";

#[derive(Clone)]
pub struct GhostAdapter {
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct AdminClaims {
    iat: i64,
    exp: i64,
    aud: &'static str,
}

#[derive(Debug, Deserialize)]
struct GhostPost {
    id: String,
    title: String,
    slug: String,
    status: String,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    custom_excerpt: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    url: Option<String>,
    /// Echoed back on update; Ghost rejects edits based on a stale copy
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostsResponse {
    #[serde(default)]
    posts: Vec<GhostPost>,
}

#[derive(Debug, Deserialize)]
struct SiteInfo {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct SiteResponse {
    site: SiteInfo,
}

/// Signs a short-lived admin token from an `<id>:<hex secret>` key.
pub fn admin_token(api_key: &str, now: DateTime<Utc>) -> Result<String, AdapterError> {
    let (key_id, secret_hex) = api_key
        .trim()
        .split_once(':')
        .filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
        .ok_or_else(|| AdapterError::rejected("Admin API key must look like <id>:<secret>"))?;
    let secret = hex::decode(secret_hex)
        .map_err(|_| AdapterError::rejected("Admin API key secret is not valid hex"))?;

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(key_id.to_string());
    let claims = AdminClaims {
        iat: now.timestamp(),
        exp: now.timestamp() + TOKEN_TTL_SECS,
        aud: ADMIN_AUDIENCE,
    };

    encode(&header, &claims, &EncodingKey::from_secret(&secret))
        .map_err(|e| AdapterError::configuration(format!("failed to sign Ghost token: {e}")))
}

impl GhostAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
        }
    }

    fn admin_url(context: &ProviderContext, resource: &str) -> Result<Url, AdapterError> {
        context
            .site_url()?
            .join(&format!("ghost/api/admin/{resource}"))
            .map_err(|e| AdapterError::configuration(format!("invalid Ghost URL: {e}")))
    }

    fn authorization(api_key: &str) -> Result<String, AdapterError> {
        Ok(format!("Ghost {}", admin_token(api_key, Utc::now())?))
    }

    /// Stored keys that no longer parse are an authorization problem, not a rejected request.
    fn stored_authorization(bundle: &CredentialBundle) -> Result<String, AdapterError> {
        Self::authorization(&bundle.access_token).map_err(|e| match e {
            AdapterError::ProviderRejected { message } => AdapterError::Unauthorized { message },
            other => other,
        })
    }

    async fn fetch_site(
        &self,
        authorization: &str,
        context: &ProviderContext,
    ) -> Result<Value, AdapterError> {
        let response = self
            .client
            .get(Self::admin_url(context, "site/")?)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await?;
        read_json(ProviderKind::Ghost, response).await
    }

    async fn fetch_post(
        &self,
        authorization: &str,
        context: &ProviderContext,
        post_id: &str,
    ) -> Result<GhostPost, AdapterError> {
        let response = self
            .client
            .get(Self::admin_url(context, &format!("posts/{post_id}/"))?)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await?;
        let found: PostsResponse = read_json(ProviderKind::Ghost, response).await?;
        found
            .posts
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::malformed("Ghost returned no post"))
    }

    fn normalize(post: GhostPost) -> NormalizedArticle {
        let published = post.status == "published";
        let published_at = if published {
            post.published_at.or_else(|| Some(Utc::now()))
        } else {
            None
        };
        NormalizedArticle {
            id: post.id,
            title: post.title,
            content: post.html.unwrap_or_default(),
            excerpt: post.custom_excerpt.filter(|e| !e.trim().is_empty()),
            slug: post.slug,
            status: if published {
                RemoteStatus::Published
            } else {
                RemoteStatus::Draft
            },
            published_at,
            url: post.url,
        }
    }
}

#[async_trait]
impl CmsAdapter for GhostAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ghost
    }

    /// Ghost has no consent screen: the client collects the key and returns straight to the
    /// callback with it as the code.
    fn build_authorization_url(
        &self,
        redirect_uri: &Url,
        state: &str,
        context: &ProviderContext,
    ) -> Result<Url, AdapterError> {
        context.site_url()?;
        let mut url = redirect_uri.clone();
        url.query_pairs_mut().append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &Url,
        context: &ProviderContext,
    ) -> Result<CredentialBundle, AdapterError> {
        let authorization = Self::authorization(code)?;
        self.fetch_site(&authorization, context)
            .await
            .map_err(AdapterError::into_exchange_error)?;
        info!(provider = "ghost", "Admin API key accepted");
        Ok(CredentialBundle::bearer(code.trim()))
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
        let authorization = match Self::stored_authorization(bundle) {
            Ok(value) => value,
            Err(AdapterError::Unauthorized { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };
        match self.fetch_site(&authorization, context).await {
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
            .get(Self::admin_url(context, "site/")?)
            .header(
                reqwest::header::AUTHORIZATION,
                Self::stored_authorization(bundle)?,
            )
            .send()
            .await?;
        let site: SiteResponse = read_json(ProviderKind::Ghost, response).await?;

        Ok(vec![PublishTarget {
            id: POSTS_TARGET_ID.to_string(),
            name: site.site.title,
            kind: "site".to_string(),
        }])
    }

    fn default_target_id(&self) -> Option<&'static str> {
        Some(POSTS_TARGET_ID)
    }

    async fn publish_article(
        &self,
        bundle: &CredentialBundle,
        context: &ProviderContext,
        destination: &PublishDestination,
        article: &ArticleDraft,
    ) -> Result<NormalizedArticle, AdapterError> {
        let authorization = Self::stored_authorization(bundle)?;
        let mut post = json!({
            "title": article.title,
            "slug": article.slug,
            "html": article.content,
            "status": match destination.mode {
                PublishMode::Publish => "published",
                PublishMode::Draft => "draft",
            },
            "custom_excerpt": article.excerpt,
            "meta_title": article.meta_title,
            "meta_description": article.meta_description,
            "feature_image": article.featured_image,
        });

        let request = match article.remote_id.as_deref() {
            Some(post_id) => {
                let current = self.fetch_post(&authorization, context, post_id).await?;
                post["updated_at"] = json!(current.updated_at);
                debug!(provider = "ghost", post_id, "Updating post");
                let mut url = Self::admin_url(context, &format!("posts/{post_id}/"))?;
                url.query_pairs_mut().append_pair("source", "html");
                self.client.put(url)
            }
            None => {
                debug!(provider = "ghost", slug = %article.slug, "Creating post");
                let mut url = Self::admin_url(context, "posts/")?;
                url.query_pairs_mut().append_pair("source", "html");
                self.client.post(url)
            }
        };

        let response = request
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(&json!({ "posts": [post] }))
            .send()
            .await?;
        let saved: PostsResponse = read_json(ProviderKind::Ghost, response).await?;
        saved
            .posts
            .into_iter()
            .next()
            .map(Self::normalize)
            .ok_or_else(|| AdapterError::malformed("Ghost returned no post"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
    use wiremock::matchers::{body_partial_json, header_regex, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "65f0c0ffee:a1b2c3d4e5f60718293a4b5c6d7e8f90";

    fn context(server: &MockServer) -> ProviderContext {
        ProviderContext {
            site_url: Some(server.uri()),
            shop_domain: None,
        }
    }

    fn draft() -> ArticleDraft {
        ArticleDraft {
            title: "Hello".to_string(),
            slug: "hello".to_string(),
            content: "<p>Hi</p>".to_string(),
            excerpt: Some("Short".to_string()),
            ..Default::default()
        }
    }

    #[derive(Debug, Deserialize)]
    struct Decoded {
        aud: String,
        exp: i64,
        iat: i64,
    }

    #[test]
    fn admin_token_is_signed_with_the_key_secret() {
        let now = Utc::now();
        let token = admin_token(KEY, now).unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("65f0c0ffee"));

        let secret = hex::decode("a1b2c3d4e5f60718293a4b5c6d7e8f90").unwrap();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["/admin/"]);
        let decoded = decode::<Decoded>(&token, &DecodingKey::from_secret(&secret), &validation)
            .unwrap()
            .claims;
        assert_eq!(decoded.aud, "/admin/");
        assert_eq!(decoded.exp - decoded.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(matches!(
            admin_token("no-colon", Utc::now()),
            Err(AdapterError::ProviderRejected { .. })
        ));
        assert!(matches!(
            admin_token("id:not-hex", Utc::now()),
            Err(AdapterError::ProviderRejected { .. })
        ));
    }

    #[tokio::test]
    async fn exchange_verifies_the_key_against_the_site_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ghost/api/admin/site/"))
            .and(header_regex("authorization", "^Ghost "))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"site": {"title": "Blog"}})))
            .expect(1)
            .mount(&server)
            .await;

        let redirect = Url::parse("https://app.example.com/cb").unwrap();
        let bundle = GhostAdapter::new(Duration::from_secs(5))
            .exchange_code(KEY, &redirect, &context(&server))
            .await
            .unwrap();
        assert_eq!(bundle.access_token, KEY);
    }

    #[tokio::test]
    async fn published_post_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ghost/api/admin/posts/"))
            .and(query_param("source", "html"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "posts": [{
                    "id": "abc123",
                    "title": "Hello",
                    "slug": "hello",
                    "status": "published",
                    "html": "<p>Hi</p>",
                    "custom_excerpt": "Short",
                    "published_at": "2026-04-01T08:30:00.000Z",
                    "url": "https://blog.example.com/hello/"
                }]
            })))
            .mount(&server)
            .await;

        let destination = PublishDestination {
            target_id: POSTS_TARGET_ID.to_string(),
            mode: PublishMode::Publish,
            field_mapping: None,
        };
        let article = GhostAdapter::new(Duration::from_secs(5))
            .publish_article(&CredentialBundle::bearer(KEY), &context(&server), &destination, &draft())
            .await
            .unwrap();

        assert_eq!(article.status, RemoteStatus::Published);
        assert!(article.published_at.is_some());
        assert_eq!(article.url.as_deref(), Some("https://blog.example.com/hello/"));
        assert_eq!(article.excerpt.as_deref(), Some("Short"));
    }

    #[tokio::test]
    async fn scheduled_post_is_not_reported_as_published() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ghost/api/admin/posts/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "posts": [{
                    "id": "abc124",
                    "title": "Hello",
                    "slug": "hello",
                    "status": "scheduled",
                    "published_at": "2026-05-01T08:30:00.000Z"
                }]
            })))
            .mount(&server)
            .await;

        let destination = PublishDestination {
            target_id: POSTS_TARGET_ID.to_string(),
            mode: PublishMode::Publish,
            field_mapping: None,
        };
        let article = GhostAdapter::new(Duration::from_secs(5))
            .publish_article(&CredentialBundle::bearer(KEY), &context(&server), &destination, &draft())
            .await
            .unwrap();
        assert_eq!(article.status, RemoteStatus::Draft);
        assert_eq!(article.published_at, None);
    }

    #[test]
    fn published_post_without_timestamp_still_has_a_publish_time() {
        let post: GhostPost = serde_json::from_value(json!({
            "id": "abc125",
            "title": "Hello",
            "slug": "hello",
            "status": "published",
            "published_at": null
        }))
        .unwrap();

        let article = GhostAdapter::normalize(post);
        assert_eq!(article.status, RemoteStatus::Published);
        assert!(article.published_at.is_some());
    }

    #[tokio::test]
    async fn existing_post_is_updated_against_its_current_revision() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ghost/api/admin/posts/abc123/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [{
                    "id": "abc123",
                    "title": "Old",
                    "slug": "hello",
                    "status": "draft",
                    "updated_at": "2026-04-01T08:00:00.000Z"
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/ghost/api/admin/posts/abc123/"))
            .and(query_param("source", "html"))
            .and(body_partial_json(json!({
                "posts": [{
                    "updated_at": "2026-04-01T08:00:00.000Z",
                    "feature_image": "https://cdn.example.com/hero.png"
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [{
                    "id": "abc123",
                    "title": "Hello",
                    "slug": "hello",
                    "status": "published",
                    "published_at": "2026-04-01T08:30:00.000Z"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let destination = PublishDestination {
            target_id: POSTS_TARGET_ID.to_string(),
            mode: PublishMode::Publish,
            field_mapping: None,
        };
        let draft = ArticleDraft {
            remote_id: Some("abc123".to_string()),
            featured_image: Some("https://cdn.example.com/hero.png".to_string()),
            ..draft()
        };
        let article = GhostAdapter::new(Duration::from_secs(5))
            .publish_article(&CredentialBundle::bearer(KEY), &context(&server), &destination, &draft)
            .await
            .unwrap();
        assert_eq!(article.id, "abc123");
        assert_eq!(article.status, RemoteStatus::Published);
    }

    #[tokio::test]
    async fn corrupted_stored_key_fails_validation() {
        let server = MockServer::start().await;
        let valid = GhostAdapter::new(Duration::from_secs(5))
            .validate_credentials(&CredentialBundle::bearer("garbage"), &context(&server))
            .await
            .unwrap();
        assert!(!valid);
    }
}
