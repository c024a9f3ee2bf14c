//! # Article Job Pipeline
//!
//! Moves jobs through `pending → generating → generated → publishing → published`. Every step
//! starts with a claim (a conditional status update) and ends with a write conditional on the
//! claimed status, so a job is only ever advanced by the worker holding it. Failure writes go
//! to `generation_failed` / `publishing_failed` and never touch the generated body.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::{ContentGenerator, GenerationRequest};
use crate::models::article_job::{JobStatus, Model as ArticleJobModel};
use crate::models::cms_connection::{ConnectionStatus, Model as CmsConnectionModel};
use crate::providers::{AdapterRegistry, ArticleDraft, CmsAdapter, PublishDestination};
use crate::repositories::{
    ArticleJobRepository, CmsConnectionRepository, GeneratedFields, PublishRecordRepository,
};
use crate::token_refresh::{RefreshError, TokenRefresher};

pub const NO_CONNECTION_MESSAGE: &str = "no CMS connection configured for this site";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error("job belongs to another owner")]
    NotOwner,
    #[error("job in status '{0}' cannot be retried")]
    NotRetryable(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Acquired,
    AlreadyClaimed,
}

/// What a single pipeline step did to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Generated,
    Published {
        remote_id: String,
        remote_url: Option<String>,
    },
    Failed {
        status: JobStatus,
        reason_code: String,
        message: String,
    },
    /// Nothing was written; another worker holds the job or it is not in a usable state
    Skipped { reason: String },
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Generated => "generated",
            JobOutcome::Published { .. } => "published",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::Skipped { .. } => "skipped",
        }
    }

    fn failed(status: JobStatus, reason_code: &str, message: impl Into<String>) -> Self {
        JobOutcome::Failed {
            status,
            reason_code: reason_code.to_string(),
            message: message.into(),
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        JobOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// Counts a finished job under `publisher_jobs_total{outcome}`.
pub fn record_job_metric(outcome: &JobOutcome) {
    counter!("publisher_jobs_total", "outcome" => outcome.label()).increment(1);
}

/// A publish failure decided before any provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Precheck {
    reason_code: &'static str,
    message: String,
}

impl Precheck {
    fn new(reason_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            reason_code,
            message: message.into(),
        }
    }
}

/// Everything needed to publish one job.
struct ResolvedDestination {
    connection: CmsConnectionModel,
    adapter: Arc<dyn CmsAdapter>,
    destination: PublishDestination,
}

#[derive(Clone)]
pub struct Pipeline {
    jobs: ArticleJobRepository,
    connections: CmsConnectionRepository,
    records: PublishRecordRepository,
    registry: AdapterRegistry,
    refresher: TokenRefresher,
    generator: Arc<dyn ContentGenerator>,
}

impl Pipeline {
    pub fn new(
        jobs: ArticleJobRepository,
        connections: CmsConnectionRepository,
        records: PublishRecordRepository,
        registry: AdapterRegistry,
        refresher: TokenRefresher,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            jobs,
            connections,
            records,
            registry,
            refresher,
            generator,
        }
    }

    pub fn jobs(&self) -> &ArticleJobRepository {
        &self.jobs
    }

    async fn load(&self, job_id: Uuid) -> Result<ArticleJobModel, PipelineError> {
        self.jobs
            .find_by_id(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    async fn load_owned(&self, job_id: Uuid, owner_id: Uuid) -> Result<ArticleJobModel, PipelineError> {
        let job = self.load(job_id).await?;
        if job.owner_id != owner_id {
            return Err(PipelineError::NotOwner);
        }
        Ok(job)
    }

    pub async fn claim_generation(&self, job_id: Uuid) -> Result<Claim, PipelineError> {
        let acquired = self
            .jobs
            .claim(
                job_id,
                &JobStatus::GENERATION_CLAIMABLE,
                JobStatus::Generating,
                false,
            )
            .await?;
        Ok(if acquired {
            Claim::Acquired
        } else {
            Claim::AlreadyClaimed
        })
    }

    pub async fn claim_publishing(&self, job_id: Uuid) -> Result<Claim, PipelineError> {
        let acquired = self
            .jobs
            .claim(
                job_id,
                &JobStatus::PUBLISHING_CLAIMABLE,
                JobStatus::Publishing,
                true,
            )
            .await?;
        Ok(if acquired {
            Claim::Acquired
        } else {
            Claim::AlreadyClaimed
        })
    }

    /// Generates the body for a `pending` or `generation_failed` job.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn generate(&self, job: &ArticleJobModel) -> Result<JobOutcome, PipelineError> {
        if self.claim_generation(job.id).await? == Claim::AlreadyClaimed {
            debug!("Generation claim not acquired");
            return Ok(JobOutcome::skipped("job is not awaiting generation"));
        }

        let request = GenerationRequest {
            title: job.title.clone(),
            keywords: job.keyword_list(),
            domain: job.site_domain.clone(),
        };

        match self.generator.generate(&request).await {
            Ok(generated) => {
                let stored = self
                    .jobs
                    .complete_generation(
                        job.id,
                        GeneratedFields {
                            body: generated.content,
                            meta_title: generated.meta_title,
                            meta_description: generated.meta_description,
                            content_outline: generated.content_outline,
                            word_count: generated.word_count,
                        },
                    )
                    .await?;
                if !stored {
                    warn!("Generation result discarded; claim was released meanwhile");
                    return Ok(JobOutcome::skipped("generation claim was lost"));
                }
                info!("Article generated");
                Ok(JobOutcome::Generated)
            }
            Err(err) => {
                warn!(reason = err.reason_code(), error = %err, "Article generation failed");
                let message = format!("content generation failed: {err}");
                self.jobs
                    .record_failure(
                        job.id,
                        &[JobStatus::Generating],
                        JobStatus::GenerationFailed,
                        &message,
                        err.reason_code(),
                    )
                    .await?;
                Ok(JobOutcome::failed(
                    JobStatus::GenerationFailed,
                    err.reason_code(),
                    message,
                ))
            }
        }
    }

    /// Resolves where a job would be published. `Ok(Err(_))` is a precheck failure that must be
    /// recorded on the job without calling the provider.
    async fn resolve_destination(
        &self,
        job: &ArticleJobModel,
    ) -> Result<Result<ResolvedDestination, Precheck>, PipelineError> {
        let assigned = match job.connection_id {
            Some(connection_id) => self.connections.find_by_id(connection_id).await?,
            None => None,
        };
        let connection = match assigned {
            Some(connection) => connection,
            None => match self.connections.find_active_for_site(job.site_id).await? {
                Some(connection) => connection,
                None => return Ok(Err(Precheck::new("no_connection", NO_CONNECTION_MESSAGE))),
            },
        };

        if connection.connection_status().ok() != Some(ConnectionStatus::Active) {
            let detail = connection
                .last_error
                .clone()
                .unwrap_or_else(|| "credentials were rejected".to_string());
            return Ok(Err(Precheck::new(
                "reconnect_required",
                format!("CMS connection requires reconnection: {detail}"),
            )));
        }

        let provider = match connection.provider_kind() {
            Ok(provider) => provider,
            Err(err) => return Ok(Err(Precheck::new("configuration", err.to_string()))),
        };
        let adapter = match self.registry.get(provider) {
            Ok(adapter) => adapter,
            Err(err) => return Ok(Err(Precheck::new("configuration", err.to_string()))),
        };

        let settings = connection.settings();
        let target_id = match settings
            .target_id
            .clone()
            .or_else(|| adapter.default_target_id().map(str::to_string))
        {
            Some(target_id) => target_id,
            None => {
                return Ok(Err(Precheck::new(
                    "configuration",
                    "no publish target selected for this connection",
                )));
            }
        };
        if adapter.requires_field_mapping() && settings.field_mapping.is_none() {
            return Ok(Err(Precheck::new(
                "configuration",
                "a field mapping is required before publishing to this target",
            )));
        }

        if job.connection_id != Some(connection.id) {
            self.jobs.assign_connection(job.id, connection.id).await?;
        }

        Ok(Ok(ResolvedDestination {
            destination: PublishDestination {
                target_id,
                mode: settings.publish_mode,
                field_mapping: settings.field_mapping,
            },
            connection,
            adapter,
        }))
    }

    /// Records a precheck failure straight from the job's current (claimable) state.
    async fn fail_unclaimed(
        &self,
        job: &ArticleJobModel,
        status: JobStatus,
        precheck: Precheck,
    ) -> Result<JobOutcome, PipelineError> {
        let recorded = self
            .jobs
            .record_failure(
                job.id,
                &[status],
                JobStatus::PublishingFailed,
                &precheck.message,
                precheck.reason_code,
            )
            .await?;
        if !recorded {
            return Ok(JobOutcome::skipped("job changed state concurrently"));
        }

        warn!(job_id = %job.id, reason = precheck.reason_code, "{}", precheck.message);
        Ok(JobOutcome::failed(
            JobStatus::PublishingFailed,
            precheck.reason_code,
            precheck.message,
        ))
    }

    /// Publishes a `generated` or `publishing_failed` job.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn publish(&self, job: &ArticleJobModel) -> Result<JobOutcome, PipelineError> {
        let status = match job.job_status() {
            Ok(status) if JobStatus::PUBLISHING_CLAIMABLE.contains(&status) => status,
            Ok(status) => {
                return Ok(JobOutcome::skipped(format!(
                    "job in status '{status}' is not publishable"
                )));
            }
            Err(err) => return Ok(JobOutcome::skipped(err.to_string())),
        };
        if job.body.is_none() {
            return Ok(JobOutcome::skipped("job has no generated body"));
        }

        let resolved = match self.resolve_destination(job).await? {
            Ok(resolved) => resolved,
            Err(precheck) => return self.fail_unclaimed(job, status, precheck).await,
        };

        if self.claim_publishing(job.id).await? == Claim::AlreadyClaimed {
            debug!("Publishing claim not acquired");
            return Ok(JobOutcome::skipped("job is already being published"));
        }

        self.publish_claimed(job, resolved).await
    }

    async fn publish_claimed(
        &self,
        job: &ArticleJobModel,
        resolved: ResolvedDestination,
    ) -> Result<JobOutcome, PipelineError> {
        let ResolvedDestination {
            connection,
            adapter,
            destination,
        } = resolved;
        let provider = adapter.kind();

        let credentials = match self
            .refresher
            .ensure_fresh(adapter.as_ref(), &connection)
            .await
        {
            Ok(credentials) => credentials,
            Err(RefreshError::Adapter(err)) => {
                return self.record_provider_failure(job, &connection, err).await;
            }
            Err(RefreshError::Storage(err)) => {
                error!(error = ?err, "Failed to load connection credentials");
                self.jobs
                    .record_failure(
                        job.id,
                        &[JobStatus::Publishing],
                        JobStatus::PublishingFailed,
                        "connection credentials could not be loaded",
                        "internal_error",
                    )
                    .await?;
                return Err(PipelineError::Storage(err));
            }
        };

        let remote_id = match self.existing_remote_id(job, &connection).await {
            Ok(remote_id) => remote_id,
            Err(err) => {
                self.jobs
                    .record_failure(
                        job.id,
                        &[JobStatus::Publishing],
                        JobStatus::PublishingFailed,
                        "publish history could not be loaded",
                        "internal_error",
                    )
                    .await?;
                return Err(err);
            }
        };
        let draft = ArticleDraft {
            remote_id,
            title: job.title.clone(),
            slug: job.slug.clone(),
            content: job.body.clone().unwrap_or_default(),
            excerpt: job.meta_description.clone(),
            meta_title: job.meta_title.clone(),
            meta_description: job.meta_description.clone(),
            featured_image: job.featured_image_url.clone(),
        };
        let context = connection.settings().context;

        let article = match adapter
            .publish_article(&credentials, &context, &destination, &draft)
            .await
        {
            Ok(article) => article,
            Err(err) => return self.record_provider_failure(job, &connection, err).await,
        };

        // The remote entry exists either way; keep it so a later attempt updates it
        self.records
            .insert(job.id, connection.id, provider, &article)
            .await?;
        if !self
            .jobs
            .mark_published(job.id, connection.id, &article)
            .await?
        {
            self.jobs
                .record_remote_entry(job.id, connection.id, &article)
                .await?;
            warn!(remote_id = %article.id, "Published remotely but the claim was released meanwhile");
            return Ok(JobOutcome::skipped("publishing claim was lost"));
        }

        self.connections.touch_last_sync(connection.id).await?;

        info!(
            connection_id = %connection.id,
            provider = %provider,
            remote_id = %article.id,
            remote_status = article.status.as_str(),
            "Article published"
        );
        Ok(JobOutcome::Published {
            remote_id: article.id,
            remote_url: article.url,
        })
    }

    /// Entry an earlier attempt created on this connection, if any.
    async fn existing_remote_id(
        &self,
        job: &ArticleJobModel,
        connection: &CmsConnectionModel,
    ) -> Result<Option<String>, PipelineError> {
        if let Some(record) = self.records.latest_for_job(job.id, connection.id).await? {
            return Ok(Some(record.remote_id));
        }
        Ok(job
            .remote_id
            .clone()
            .filter(|_| job.connection_id == Some(connection.id)))
    }

    async fn record_provider_failure(
        &self,
        job: &ArticleJobModel,
        connection: &CmsConnectionModel,
        err: crate::providers::AdapterError,
    ) -> Result<JobOutcome, PipelineError> {
        let reason_code = err.reason_code();
        let message = if err.is_authorization() {
            self.connections
                .mark_error(connection.id, &err.to_string())
                .await?;
            format!("CMS rejected the stored credentials; reconnect required ({err})")
        } else {
            err.to_string()
        };

        warn!(
            connection_id = %connection.id,
            provider = %connection.provider,
            reason = reason_code,
            "Publishing failed: {}",
            message
        );
        self.jobs
            .record_failure(
                job.id,
                &[JobStatus::Publishing],
                JobStatus::PublishingFailed,
                &message,
                reason_code,
            )
            .await?;

        Ok(JobOutcome::failed(
            JobStatus::PublishingFailed,
            reason_code,
            message,
        ))
    }

    /// Takes a job as far as it can go: generate if needed, then publish.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn advance(&self, job_id: Uuid) -> Result<JobOutcome, PipelineError> {
        let job = self.load(job_id).await?;
        self.advance_job(job).await
    }

    pub(crate) async fn advance_job(
        &self,
        job: ArticleJobModel,
    ) -> Result<JobOutcome, PipelineError> {
        let status = match job.job_status() {
            Ok(status) => status,
            Err(err) => return Ok(JobOutcome::skipped(err.to_string())),
        };

        match status {
            JobStatus::Pending | JobStatus::GenerationFailed => {
                // Generation is pointless when there is nowhere to publish.
                if let Err(precheck) = self.resolve_destination(&job).await? {
                    return self.fail_unclaimed(&job, status, precheck).await;
                }
                match self.generate(&job).await? {
                    JobOutcome::Generated => {}
                    other => return Ok(other),
                }
                let job = self.load(job.id).await?;
                self.publish(&job).await
            }
            JobStatus::Generated | JobStatus::PublishingFailed => self.publish(&job).await,
            JobStatus::Published => Ok(JobOutcome::skipped("job is already published")),
            JobStatus::Generating | JobStatus::Publishing => {
                Ok(JobOutcome::skipped("job is held by another worker"))
            }
        }
    }

    /// Operator trigger: force-advances one of the owner's jobs.
    pub async fn trigger(&self, job_id: Uuid, owner_id: Uuid) -> Result<JobOutcome, PipelineError> {
        let job = self.load_owned(job_id, owner_id).await?;
        let outcome = self.advance_job(job).await?;
        record_job_metric(&outcome);
        Ok(outcome)
    }

    /// Retry trigger for failed jobs.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn retry(&self, job_id: Uuid, owner_id: Uuid) -> Result<JobOutcome, PipelineError> {
        let job = self.load_owned(job_id, owner_id).await?;
        let status = job
            .job_status()
            .map_err(|err| PipelineError::NotRetryable(err.0))?;

        let outcome = match status {
            JobStatus::GenerationFailed => self.advance_job(job).await?,
            JobStatus::PublishingFailed if job.body.is_none() => {
                if !self.jobs.reset_to_pending(job.id).await? {
                    return Ok(JobOutcome::skipped("job changed state concurrently"));
                }
                info!("Job without a body reset to pending");
                self.advance(job.id).await?
            }
            JobStatus::PublishingFailed => self.publish(&job).await?,
            other => return Err(PipelineError::NotRetryable(other.to_string())),
        };

        record_job_metric(&outcome);
        Ok(outcome)
    }

    /// Releases claims held longer than `max_age` into the matching failure state.
    pub async fn sweep_stale_claims(&self, max_age: Duration) -> Result<u64, PipelineError> {
        let cutoff = Utc::now() - max_age;
        let stale = self.jobs.find_stale_claims(cutoff).await?;
        let mut released = 0;

        for job in stale {
            let (held, to) = match job.job_status() {
                Ok(JobStatus::Generating) => (JobStatus::Generating, JobStatus::GenerationFailed),
                Ok(JobStatus::Publishing) => (JobStatus::Publishing, JobStatus::PublishingFailed),
                _ => continue,
            };
            let message = format!("worker did not finish {held} within {} seconds", max_age.num_seconds());
            if self.jobs.release_stale_claim(&job, held, to, &message).await? {
                warn!(job_id = %job.id, from = %held, to = %to, "Released stale claim");
                released += 1;
            }
        }

        if released > 0 {
            counter!("publisher_stale_claims_released_total").increment(released);
        }
        Ok(released)
    }
}
