//! # Server Configuration
//!
//! Application state, router and the long-running server with its background loops.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::cron_auth_middleware;
use crate::collaborators::Collaborators;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::handshake::HandshakeManager;
use crate::pipeline::Pipeline;
use crate::providers::AdapterRegistry;
use crate::publisher::ScheduledPublisher;
use crate::repositories::{
    ArticleJobRepository, CmsConnectionRepository, OAuthStateRepository, PublishRecordRepository,
    RemediationItemRepository,
};
use crate::telemetry::trace_context_middleware;
use crate::token_refresh::TokenRefresher;
use crate::verification::VerificationLoop;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub registry: AdapterRegistry,
    pub connections: CmsConnectionRepository,
    pub refresher: TokenRefresher,
    pub pipeline: Pipeline,
    pub handshake: HandshakeManager,
    pub publisher: ScheduledPublisher,
    pub verification: VerificationLoop,
}

impl AppState {
    /// Wires repositories and services around one database handle.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        crypto_key: CryptoKey,
        registry: AdapterRegistry,
        collaborators: Collaborators,
    ) -> Self {
        let shared = Arc::new(db.clone());
        let connections = CmsConnectionRepository::new(Arc::clone(&shared), crypto_key);
        let refresher = TokenRefresher::new(
            connections.clone(),
            config.providers.token_refresh_lead(),
        );

        let pipeline = Pipeline::new(
            ArticleJobRepository::new(Arc::clone(&shared)),
            connections.clone(),
            PublishRecordRepository::new(Arc::clone(&shared)),
            registry.clone(),
            refresher.clone(),
            Arc::clone(&collaborators.generator),
        );
        let handshake = HandshakeManager::new(
            registry.clone(),
            OAuthStateRepository::new(Arc::clone(&shared)),
            connections.clone(),
            config.handshake.state_ttl(),
        );
        let publisher = ScheduledPublisher::new(pipeline.clone(), config.publisher.clone());
        let verification = VerificationLoop::new(
            RemediationItemRepository::new(shared),
            Arc::clone(&collaborators.verifier),
            config.verification.clone(),
        );

        Self {
            config,
            db,
            registry,
            connections,
            refresher,
            pipeline,
            handshake,
            publisher,
            verification,
        }
    }

    /// Builds the production state: adapters and collaborators come from configuration.
    pub fn from_config(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .ok_or_else(|| anyhow!("POBLYSH_CRYPTO_KEY is required"))?;
        let crypto_key = CryptoKey::new(key_bytes).context("Invalid POBLYSH_CRYPTO_KEY")?;
        let registry = AdapterRegistry::from_config(&config.providers);
        let collaborators = Collaborators::from_config(&config);

        info!(providers = ?registry.registered(), "Provider adapters registered");
        Ok(Self::new(
            Arc::new(config),
            db,
            crypto_key,
            registry,
            collaborators,
        ))
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any)
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let cron_routes = Router::new()
        .route("/cron/publish", post(handlers::cron::cron_publish))
        .route("/cron/verify", post(handlers::cron::cron_verify))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            cron_auth_middleware,
        ));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/pipeline/trigger", post(handlers::pipeline::trigger_job))
        .route("/pipeline/retry", post(handlers::pipeline::retry_job))
        .route("/connect/{provider}", post(handlers::connect::start_connect))
        .route(
            "/connect/{provider}/callback",
            post(handlers::connect::connect_callback),
        )
        .route(
            "/connections/{id}/targets",
            get(handlers::connections::list_targets),
        )
        .route(
            "/connections/{id}/settings",
            put(handlers::connections::update_settings),
        )
        .merge(cron_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(cors)
}

fn spawn_state_sweeper(handshake: HandshakeManager, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = handshake.sweep_expired().await {
                        warn!(error = %err, "Handshake state sweep failed");
                    }
                }
            }
        }
    })
}

/// Serves HTTP and runs the publisher and verification loops until Ctrl+C.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let config = Arc::clone(&state.config);
    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", config.api_bind_addr))?;

    let shutdown = CancellationToken::new();
    let mut tasks = vec![spawn_state_sweeper(state.handshake.clone(), shutdown.clone())];
    if config.publisher.enabled {
        tasks.push(tokio::spawn(state.publisher.clone().run(shutdown.clone())));
    }
    if config.verification.enabled {
        tasks.push(tokio::spawn(state.verification.clone().run(shutdown.clone())));
    }

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "Background task ended abnormally");
        }
    }
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::pipeline::trigger_job,
        crate::handlers::pipeline::retry_job,
        crate::handlers::cron::cron_publish,
        crate::handlers::cron::cron_verify,
        crate::handlers::connect::start_connect,
        crate::handlers::connect::connect_callback,
        crate::handlers::connections::list_targets,
        crate::handlers::connections::update_settings,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::pipeline::JobTriggerRequest,
            crate::handlers::cron::VerifyQuery,
            crate::handlers::connect::StartConnectRequest,
            crate::handlers::connect::StartConnectResponse,
            crate::handlers::connect::ConnectCallbackRequest,
            crate::handlers::connections::TargetsResponse,
            crate::handlers::connections::UpdateSettingsRequest,
            crate::models::cms_connection::ConnectionSummary,
            crate::publisher::PublishRunSummary,
            crate::verification::VerificationRunSummary,
            crate::providers::ProviderContext,
            crate::providers::PublishTarget,
            crate::providers::PublishMode,
            crate::providers::FieldMappingOverrides,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "pipeline", description = "Owner-triggered article job actions"),
        (name = "cron", description = "Externally scheduled publisher and verification passes"),
        (name = "connections", description = "CMS handshakes and connection settings"),
    ),
    info(
        title = "Poblysh Publisher API",
        description = "Article publishing pipeline and remediation verification",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
