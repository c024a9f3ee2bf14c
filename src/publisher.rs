//! # Scheduled Publisher
//!
//! Periodic sweep that advances due article jobs through the pipeline. Jobs in one run are
//! processed sequentially in scheduled-time order, each inside its own failure boundary, and
//! the whole run is bounded by `run_timeout`.

use std::time::Duration;

use chrono::Utc;
use metrics::histogram;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::PublisherConfig;
use crate::pipeline::{JobOutcome, Pipeline, record_job_metric};

/// Outcome of one publisher pass (also returned by the single-job trigger).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishRunSummary {
    pub success: bool,
    pub processed: u32,
    pub published: u32,
    pub failed: u32,
    /// Due jobs not started before the run deadline
    #[serde(default)]
    pub deferred: u32,
    pub errors: Vec<String>,
}

impl PublishRunSummary {
    fn started() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn record(&mut self, job_id: Uuid, outcome: &JobOutcome) {
        self.processed += 1;
        match outcome {
            JobOutcome::Published { .. } => self.published += 1,
            JobOutcome::Failed { message, .. } => {
                self.failed += 1;
                self.errors.push(format!("job {job_id}: {message}"));
            }
            JobOutcome::Generated | JobOutcome::Skipped { .. } => {}
        }
    }

    /// Summary for a single, explicitly triggered job.
    pub fn for_job(job_id: Uuid, outcome: &JobOutcome) -> Self {
        let mut summary = Self::started();
        summary.record(job_id, outcome);
        summary
    }
}

/// Random extra delay of up to `jitter_pct` of `base`.
fn compute_jitter<R: Rng + ?Sized>(base: Duration, jitter_pct: f64, rng: &mut R) -> Duration {
    if jitter_pct <= 0.0 {
        return Duration::ZERO;
    }
    base.mul_f64(rng.gen_range(0.0..=jitter_pct))
}

#[derive(Clone)]
pub struct ScheduledPublisher {
    pipeline: Pipeline,
    config: PublisherConfig,
}

impl ScheduledPublisher {
    pub fn new(pipeline: Pipeline, config: PublisherConfig) -> Self {
        Self { pipeline, config }
    }

    /// Runs passes until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting scheduled publisher");
        let base = self.config.tick_interval();

        loop {
            let delay = base + compute_jitter(base, self.config.jitter_pct, &mut rand::thread_rng());
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduled publisher shutdown requested");
                    break;
                }
                _ = sleep(delay) => {
                    let summary = self.run_once().await;
                    if !summary.success {
                        error!(errors = ?summary.errors, "Publisher run aborted");
                    }
                }
            }
        }

        info!("Scheduled publisher stopped");
    }

    /// One pass over due jobs. Never returns an error: failures are reported in the summary.
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> PublishRunSummary {
        let started = Instant::now();
        let deadline = started + self.config.run_timeout();
        let mut summary = PublishRunSummary::started();

        if let Err(err) = self
            .pipeline
            .sweep_stale_claims(self.config.stale_claim_age())
            .await
        {
            warn!(error = ?err, "Stale claim sweep failed");
        }

        let due = match self
            .pipeline
            .jobs()
            .select_due(Utc::now(), self.config.batch_size)
            .await
        {
            Ok(due) => due,
            Err(err) => {
                error!(error = ?err, "Failed to select due jobs");
                summary.success = false;
                summary.errors.push(format!("failed to select due jobs: {err}"));
                return summary;
            }
        };
        let total = due.len();
        debug!(due = total, "Selected due jobs");

        for (index, job) in due.into_iter().enumerate() {
            if index > 0 {
                let delay = self.config.inter_job_delay();
                if Instant::now() + delay >= deadline {
                    summary.deferred = (total - index) as u32;
                    break;
                }
                sleep(delay).await;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                summary.deferred = (total - index) as u32;
                break;
            }

            let job_id = job.id;
            match tokio::time::timeout(remaining, self.pipeline.advance_job(job)).await {
                Ok(Ok(outcome)) => {
                    record_job_metric(&outcome);
                    summary.record(job_id, &outcome);
                }
                Ok(Err(err)) => {
                    error!(job_id = %job_id, error = ?err, "Datastore failure, aborting run");
                    summary.processed += 1;
                    summary.failed += 1;
                    summary.success = false;
                    summary.errors.push(format!("job {job_id}: {err}"));
                    summary.deferred = (total - index - 1) as u32;
                    break;
                }
                Err(_) => {
                    warn!(job_id = %job_id, "Run deadline reached while the job was in flight");
                    summary.processed += 1;
                    summary.errors.push(format!(
                        "job {job_id}: interrupted by the run deadline; left for the stale-claim sweep"
                    ));
                    summary.deferred = (total - index - 1) as u32;
                    break;
                }
            }
        }

        histogram!("publisher_run_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(
            processed = summary.processed,
            published = summary.published,
            failed = summary.failed,
            deferred = summary.deferred,
            "Publisher run finished"
        );
        summary
    }
}
