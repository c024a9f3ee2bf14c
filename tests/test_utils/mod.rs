//! Test utilities shared by the integration tests.
//!
//! In-memory SQLite with migrations applied, in-process fakes for the collaborators and a
//! scriptable CMS adapter that counts provider calls.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::DatabaseConnection;
use url::Url;
use uuid::Uuid;

use publisher::collaborators::{
    CollaboratorError, ContentGenerator, GeneratedContent, GenerationRequest, IssueVerifier,
    VerificationOutcome, VerificationRequest,
};
use publisher::config::AppConfig;
use publisher::crypto::CryptoKey;
use publisher::db::{init_pool, run_migrations};
use publisher::models::article_job::Model as ArticleJobModel;
use publisher::models::cms_connection::Model as CmsConnectionModel;
use publisher::pipeline::Pipeline;
use publisher::providers::{
    AdapterError, AdapterRegistry, ArticleDraft, CmsAdapter, CredentialBundle, NormalizedArticle,
    ProviderContext, ProviderKind, PublishDestination, PublishTarget, RemoteStatus,
};
use publisher::repositories::{
    ArticleJobRepository, CmsConnectionRepository, NewArticleJob, NewConnection,
    PublishRecordRepository,
};
use publisher::token_refresh::TokenRefresher;

pub const OWNER_TOKEN_SECRET: &str = "integration-owner-secret";
pub const CRON_SECRET: &str = "integration-cron-secret";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    let db = init_pool(&config).await?;
    run_migrations(&db).await?;
    Ok(Arc::new(db))
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).unwrap()
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        crypto_key: Some(vec![42u8; 32]),
        cron_secrets: vec![CRON_SECRET.to_string()],
        owner_token_secret: Some(OWNER_TOKEN_SECRET.to_string()),
        ..Default::default()
    }
}

/// Content generator that returns a fixed article, or fails when told to.
#[derive(Debug, Default)]
pub struct FakeGenerator {
    pub calls: AtomicUsize,
    pub fail_with: Mutex<Option<CollaboratorError>>,
}

impl FakeGenerator {
    pub fn failing(error: CollaboratorError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: Mutex::new(Some(error)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(GeneratedContent {
            content: format!("<p>All about {}</p>", request.title),
            meta_title: Some(request.title.clone()),
            meta_description: Some(format!("Read about {}", request.title)),
            content_outline: None,
            word_count: Some(4),
        })
    }
}

/// Issue verifier that answers the same way for every item, except items told to fail.
#[derive(Debug, Default)]
pub struct FakeVerifier {
    pub resolved: bool,
    pub fail: bool,
    pub failing_items: Mutex<HashSet<Uuid>>,
    pub calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn resolving() -> Self {
        Self {
            resolved: true,
            ..Default::default()
        }
    }

    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn erroring() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn fail_item(&self, item_id: Uuid) {
        self.failing_items.lock().unwrap().insert(item_id);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssueVerifier for FakeVerifier {
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationOutcome, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail || self.failing_items.lock().unwrap().contains(&request.item_id) {
            return Err(CollaboratorError::Transport("connection refused".to_string()));
        }
        Ok(VerificationOutcome {
            resolved: self.resolved,
            details: None,
        })
    }
}

/// Scriptable adapter registered under the WordPress kind.
///
/// New entries get ids `remote-<call>`; drafts carrying a remote id update that entry.
#[derive(Debug)]
pub struct FakeAdapter {
    pub publish_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub publish_error: Mutex<Option<AdapterError>>,
    pub exchange_error: Mutex<Option<AdapterError>>,
    pub publish_delay: Mutex<Option<std::time::Duration>>,
    /// Entries are created as unpublished drafts
    pub keep_as_draft: AtomicBool,
    /// Every draft handed to `publish_article`, in call order
    pub drafts: Mutex<Vec<ArticleDraft>>,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self {
            publish_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            publish_error: Mutex::new(None),
            exchange_error: Mutex::new(None),
            publish_delay: Mutex::new(None),
            keep_as_draft: AtomicBool::new(false),
            drafts: Mutex::new(Vec::new()),
        }
    }
}

impl FakeAdapter {
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn fail_publishing_with(&self, error: AdapterError) {
        *self.publish_error.lock().unwrap() = Some(error);
    }

    pub fn fail_exchange_with(&self, error: AdapterError) {
        *self.exchange_error.lock().unwrap() = Some(error);
    }

    pub fn delay_publishing(&self, delay: std::time::Duration) {
        *self.publish_delay.lock().unwrap() = Some(delay);
    }

    pub fn drafts(&self) -> Vec<ArticleDraft> {
        self.drafts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CmsAdapter for FakeAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WordPress
    }

    fn build_authorization_url(
        &self,
        redirect_uri: &Url,
        state: &str,
        _context: &ProviderContext,
    ) -> Result<Url, AdapterError> {
        let mut url = Url::parse("https://cms.example.com/authorize")
            .map_err(|e| AdapterError::configuration(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &Url,
        _context: &ProviderContext,
    ) -> Result<CredentialBundle, AdapterError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.exchange_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(CredentialBundle::bearer(format!("token-for-{code}")))
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
        _bundle: &CredentialBundle,
        _context: &ProviderContext,
    ) -> Result<bool, AdapterError> {
        Ok(true)
    }

    async fn list_publish_targets(
        &self,
        _bundle: &CredentialBundle,
        _context: &ProviderContext,
    ) -> Result<Vec<PublishTarget>, AdapterError> {
        Ok(vec![PublishTarget {
            id: "posts".to_string(),
            name: "Posts".to_string(),
            kind: "site".to_string(),
        }])
    }

    async fn publish_article(
        &self,
        _bundle: &CredentialBundle,
        _context: &ProviderContext,
        _destination: &PublishDestination,
        article: &ArticleDraft,
    ) -> Result<NormalizedArticle, AdapterError> {
        let call = self.publish_calls.fetch_add(1, Ordering::SeqCst);
        self.drafts.lock().unwrap().push(article.clone());
        let delay = *self.publish_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.publish_error.lock().unwrap().clone() {
            return Err(error);
        }
        let as_draft = self.keep_as_draft.load(Ordering::SeqCst);
        Ok(NormalizedArticle {
            id: article
                .remote_id
                .clone()
                .unwrap_or_else(|| format!("remote-{call}")),
            title: article.title.clone(),
            content: article.content.clone(),
            excerpt: article.excerpt.clone(),
            slug: article.slug.clone(),
            status: if as_draft {
                RemoteStatus::Draft
            } else {
                RemoteStatus::Published
            },
            published_at: (!as_draft).then(Utc::now),
            url: Some(format!("https://blog.example.com/{}", article.slug)),
        })
    }

    fn default_target_id(&self) -> Option<&'static str> {
        Some("posts")
    }
}

pub fn registry_with(adapter: Arc<FakeAdapter>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    registry
}

/// Everything a pipeline test needs, wired around one database.
pub struct PipelineHarness {
    pub db: Arc<DatabaseConnection>,
    pub jobs: ArticleJobRepository,
    pub connections: CmsConnectionRepository,
    pub records: PublishRecordRepository,
    pub adapter: Arc<FakeAdapter>,
    pub generator: Arc<FakeGenerator>,
    pub pipeline: Pipeline,
}

impl PipelineHarness {
    pub async fn new() -> Self {
        Self::with_generator(FakeGenerator::default()).await
    }

    pub async fn with_generator(generator: FakeGenerator) -> Self {
        let db = setup_test_db().await.unwrap();
        let adapter = Arc::new(FakeAdapter::default());
        let generator = Arc::new(generator);

        let jobs = ArticleJobRepository::new(Arc::clone(&db));
        let connections = CmsConnectionRepository::new(Arc::clone(&db), test_crypto_key());
        let records = PublishRecordRepository::new(Arc::clone(&db));
        let refresher = TokenRefresher::new(connections.clone(), Duration::minutes(5));

        let pipeline = Pipeline::new(
            jobs.clone(),
            connections.clone(),
            records.clone(),
            registry_with(Arc::clone(&adapter)),
            refresher,
            generator.clone(),
        );

        Self {
            db,
            jobs,
            connections,
            records,
            adapter,
            generator,
            pipeline,
        }
    }

    /// A job scheduled an hour ago on a fresh site.
    pub async fn create_job(&self, owner_id: Uuid, site_id: Uuid) -> ArticleJobModel {
        self.create_job_at(
            owner_id,
            site_id,
            "Rust for content teams",
            Utc::now() - Duration::hours(1),
        )
        .await
    }

    pub async fn create_job_at(
        &self,
        owner_id: Uuid,
        site_id: Uuid,
        title: &str,
        scheduled_at: DateTime<Utc>,
    ) -> ArticleJobModel {
        let slug = title.to_lowercase().replace(' ', "-");
        self.jobs
            .create(NewArticleJob {
                owner_id,
                site_id,
                site_domain: Some("blog.example.com".to_string()),
                title: title.to_string(),
                slug,
                keywords: vec!["rust".to_string(), "cms".to_string()],
                scheduled_at: Some(scheduled_at),
                connection_id: None,
                featured_image_url: None,
            })
            .await
            .unwrap()
    }

    pub async fn connect_site(&self, owner_id: Uuid, site_id: Uuid) -> CmsConnectionModel {
        self.connections
            .upsert_active(&NewConnection {
                owner_id,
                site_id,
                provider: ProviderKind::WordPress,
                context: ProviderContext {
                    site_url: Some("https://blog.example.com".to_string()),
                    shop_domain: None,
                },
                display_name: Some("blog.example.com".to_string()),
                credentials: CredentialBundle::bearer("user:app-password"),
            })
            .await
            .unwrap()
    }

    pub async fn reload(&self, job_id: Uuid) -> ArticleJobModel {
        self.jobs.find_by_id(job_id).await.unwrap().unwrap()
    }
}
