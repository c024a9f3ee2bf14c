//! WordPress adapter
//!
//! Form-auth platform: the user approves an application password on their own site and the
//! service talks to the REST API with HTTP Basic. There is no token refresh.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::adapter::{
    AdapterError, ArticleDraft, CmsAdapter, CredentialBundle, NormalizedArticle,
    ProviderContext, ProviderKind, PublishDestination, PublishMode, PublishTarget, RemoteStatus,
};
use super::http::{build_client, read_json};

/// Single publish target: the site's posts endpoint.
pub const POSTS_TARGET_ID: &str = "posts";

#[derive(Clone)]
pub struct WordPressAdapter {
    client: reqwest::Client,
    app_name: String,
}

#[derive(Debug, Serialize)]
struct PostPayload<'a> {
    title: &'a str,
    content: &'a str,
    slug: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    excerpt: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct WpPost {
    id: u64,
    #[serde(default)]
    link: Option<String>,
    slug: String,
    status: String,
    #[serde(default)]
    date_gmt: Option<String>,
    title: Rendered,
    content: Rendered,
    #[serde(default)]
    excerpt: Option<Rendered>,
}

#[derive(Debug, Deserialize)]
struct WpSiteIndex {
    #[serde(default)]
    name: String,
}

impl WordPressAdapter {
    pub fn new(app_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            app_name: app_name.into(),
        }
    }

    /// Application passwords arrive as `user_login:password`.
    fn split_credentials(token: &str) -> Result<(&str, &str), AdapterError> {
        token
            .split_once(':')
            .filter(|(user, password)| !user.is_empty() && !password.is_empty())
            .ok_or_else(|| AdapterError::rejected("expected user_login:application_password"))
    }

    fn api_url(context: &ProviderContext, path: &str) -> Result<Url, AdapterError> {
        context
            .site_url()?
            .join(path)
            .map_err(|e| AdapterError::configuration(format!("invalid WordPress URL: {e}")))
    }

    async fn current_user(
        &self,
        token: &str,
        context: &ProviderContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let (user, password) = Self::split_credentials(token)?;
        let response = self
            .client
            .get(Self::api_url(context, "wp-json/wp/v2/users/me")?)
            .basic_auth(user, Some(password))
            .send()
            .await?;
        read_json(ProviderKind::WordPress, response).await
    }

    fn normalize(post: WpPost) -> NormalizedArticle {
        // `future` and `pending` posts are not live yet
        let published = post.status == "publish";
        let published_at = if published {
            post.date_gmt
                .as_deref()
                .and_then(parse_gmt)
                .or_else(|| Some(Utc::now()))
        } else {
            None
        };

        NormalizedArticle {
            id: post.id.to_string(),
            title: post.title.rendered,
            content: post.content.rendered,
            excerpt: post
                .excerpt
                .map(|e| e.rendered)
                .filter(|e| !e.trim().is_empty()),
            slug: post.slug,
            status: if published {
                RemoteStatus::Published
            } else {
                RemoteStatus::Draft
            },
            published_at,
            url: post.link,
        }
    }
}

fn parse_gmt(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl CmsAdapter for WordPressAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WordPress
    }

    fn build_authorization_url(
        &self,
        redirect_uri: &Url,
        state: &str,
        context: &ProviderContext,
    ) -> Result<Url, AdapterError> {
        let mut success_url = redirect_uri.clone();
        success_url.query_pairs_mut().append_pair("state", state);
        let mut reject_url = success_url.clone();
        reject_url.query_pairs_mut().append_pair("error", "rejected");

        let mut url = Self::api_url(context, "wp-admin/authorize-application.php")?;
        url.query_pairs_mut()
            .append_pair("app_name", &self.app_name)
            .append_pair("success_url", success_url.as_str())
            .append_pair("reject_url", reject_url.as_str());
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &Url,
        context: &ProviderContext,
    ) -> Result<CredentialBundle, AdapterError> {
        self.current_user(code, context)
            .await
            .map_err(AdapterError::into_exchange_error)?;
        info!(provider = "wordpress", "Application password accepted");
        Ok(CredentialBundle::bearer(code))
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
        match self.current_user(&bundle.access_token, context).await {
            Ok(_) => Ok(true),
            Err(AdapterError::Unauthorized { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn list_publish_targets(
        &self,
        _bundle: &CredentialBundle,
        context: &ProviderContext,
    ) -> Result<Vec<PublishTarget>, AdapterError> {
        let response = self
            .client
            .get(Self::api_url(context, "wp-json/")?)
            .send()
            .await?;
        let index: WpSiteIndex = read_json(ProviderKind::WordPress, response).await?;
        let name = if index.name.is_empty() {
            context.label().unwrap_or_else(|| "WordPress".to_string())
        } else {
            index.name
        };

        Ok(vec![PublishTarget {
            id: POSTS_TARGET_ID.to_string(),
            name,
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
        let (user, password) = Self::split_credentials(&bundle.access_token)
            .map_err(|_| AdapterError::Unauthorized {
                message: "stored WordPress credentials are malformed".to_string(),
            })?;

        let payload = PostPayload {
            title: &article.title,
            content: &article.content,
            slug: &article.slug,
            status: match destination.mode {
                PublishMode::Publish => "publish",
                PublishMode::Draft => "draft",
            },
            excerpt: article.excerpt.as_deref(),
        };

        // Featured images need an uploaded media id, so `featured_image` is not sent
        let request = match article.remote_id.as_deref() {
            Some(post_id) => {
                debug!(provider = "wordpress", post_id, "Updating post");
                self.client
                    .put(Self::api_url(context, &format!("wp-json/wp/v2/posts/{post_id}"))?)
            }
            None => {
                debug!(provider = "wordpress", slug = %article.slug, "Creating post");
                self.client
                    .post(Self::api_url(context, "wp-json/wp/v2/posts")?)
            }
        };
        let response = request
            .basic_auth(user, Some(password))
            .json(&payload)
            .send()
            .await?;
        let post: WpPost = read_json(ProviderKind::WordPress, response).await?;
        Ok(Self::normalize(post))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> WordPressAdapter {
        WordPressAdapter::new("Poblysh", Duration::from_secs(5))
    }

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
            ..Default::default()
        }
    }

    fn destination(mode: PublishMode) -> PublishDestination {
        PublishDestination {
            target_id: POSTS_TARGET_ID.to_string(),
            mode,
            field_mapping: None,
        }
    }

    #[test]
    fn authorization_url_targets_the_site() {
        let context = ProviderContext {
            site_url: Some("https://blog.example.com".to_string()),
            shop_domain: None,
        };
        let redirect = Url::parse("https://app.example.com/connect/callback").unwrap();
        let url = adapter()
            .build_authorization_url(&redirect, "abc", &context)
            .unwrap();

        assert_eq!(url.host_str(), Some("blog.example.com"));
        assert_eq!(url.path(), "/wp-admin/authorize-application.php");
        let success = url
            .query_pairs()
            .find(|(k, _)| k == "success_url")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(success.contains("state=abc"));
    }

    #[tokio::test]
    async fn rejected_application_password_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wp-json/wp/v2/users/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let redirect = Url::parse("https://app.example.com/cb").unwrap();
        let err = adapter()
            .exchange_code("admin:wrong", &redirect, &context(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::ProviderRejected { .. }));
    }

    #[tokio::test]
    async fn published_post_normalizes_to_published() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
            .and(body_partial_json(serde_json::json!({"status": "publish"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 42,
                "link": "https://blog.example.com/hello",
                "slug": "hello",
                "status": "publish",
                "date_gmt": "2026-01-02T03:04:05",
                "title": {"rendered": "Hello"},
                "content": {"rendered": "<p>Hi</p>"},
                "excerpt": {"rendered": ""}
            })))
            .mount(&server)
            .await;

        let article = adapter()
            .publish_article(
                &CredentialBundle::bearer("admin:secret"),
                &context(&server),
                &destination(PublishMode::Publish),
                &draft(),
            )
            .await
            .unwrap();

        assert_eq!(article.id, "42");
        assert_eq!(article.status, RemoteStatus::Published);
        assert_eq!(
            article.published_at.map(|t| t.to_rfc3339()),
            Some("2026-01-02T03:04:05+00:00".to_string())
        );
        assert_eq!(article.excerpt, None);
    }

    #[tokio::test]
    async fn draft_post_has_no_publish_time() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 43,
                "slug": "hello",
                "status": "draft",
                "date_gmt": "2026-01-02T03:04:05",
                "title": {"rendered": "Hello"},
                "content": {"rendered": "<p>Hi</p>"}
            })))
            .mount(&server)
            .await;

        let article = adapter()
            .publish_article(
                &CredentialBundle::bearer("admin:secret"),
                &context(&server),
                &destination(PublishMode::Draft),
                &draft(),
            )
            .await
            .unwrap();

        assert_eq!(article.status, RemoteStatus::Draft);
        assert_eq!(article.published_at, None);
    }

    #[tokio::test]
    async fn existing_post_is_updated_in_place() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/wp-json/wp/v2/posts/42"))
            .and(body_partial_json(serde_json::json!({"slug": "hello", "status": "publish"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 42,
                "slug": "hello",
                "status": "publish",
                "date_gmt": "2026-01-02T03:04:05",
                "title": {"rendered": "Hello"},
                "content": {"rendered": "<p>Hi</p>"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let article = adapter()
            .publish_article(
                &CredentialBundle::bearer("admin:secret"),
                &context(&server),
                &destination(PublishMode::Publish),
                &ArticleDraft {
                    remote_id: Some("42".to_string()),
                    ..draft()
                },
            )
            .await
            .unwrap();
        assert_eq!(article.id, "42");
        assert_eq!(article.status, RemoteStatus::Published);
    }

    #[tokio::test]
    async fn refresh_is_a_no_op() {
        let bundle = CredentialBundle::bearer("admin:secret");
        let refreshed = adapter()
            .refresh_token(&bundle, &ProviderContext::default())
            .await
            .unwrap();
        assert_eq!(refreshed, bundle);
    }
}
