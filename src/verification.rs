//! # Remediation Verification Loop
//!
//! Rechecks completed fixes with bounded, exponentially backed-off attempts. The attempt bound
//! is evaluated against the attempts value read before the check; an item that never verifies
//! ends in `failed` with exactly `max_attempts` recorded attempts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::collaborators::{IssueVerifier, VerificationRequest};
use crate::config::VerificationConfig;
use crate::models::remediation_item::Model as RemediationItemModel;
use crate::repositories::RemediationItemRepository;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRunSummary {
    pub success: bool,
    pub processed: u32,
    pub verified: u32,
    pub rechecks_scheduled: u32,
    pub failed: u32,
    /// Items another run updated first
    pub skipped: u32,
    pub errors: Vec<String>,
}

/// Next recheck delay: `base · 2^attempts`, capped at `max`.
pub fn backoff_delay(attempts: i32, base: Duration, max: Duration) -> Duration {
    let exponent = attempts.clamp(0, 30) as u32;
    let factor = 2_i64.saturating_pow(exponent);
    let seconds = base.num_seconds().saturating_mul(factor);
    Duration::try_seconds(seconds).unwrap_or(max).min(max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Verified,
    RecheckScheduled,
    Failed,
    Skipped,
}

impl ItemOutcome {
    fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Verified => "verified",
            ItemOutcome::RecheckScheduled => "needs_recheck",
            ItemOutcome::Failed => "failed",
            ItemOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Clone)]
pub struct VerificationLoop {
    items: RemediationItemRepository,
    verifier: Arc<dyn IssueVerifier>,
    config: VerificationConfig,
}

impl VerificationLoop {
    pub fn new(
        items: RemediationItemRepository,
        verifier: Arc<dyn IssueVerifier>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            items,
            verifier,
            config,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting verification loop");
        let interval = self.config.tick_interval();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Verification loop shutdown requested");
                    break;
                }
                _ = sleep(interval) => {
                    let summary = self.run_once(false).await;
                    if !summary.success {
                        error!(errors = ?summary.errors, "Verification run aborted");
                    }
                }
            }
        }

        info!("Verification loop stopped");
    }

    /// One pass over due items. `force` ignores `next_check_at`.
    #[instrument(skip_all, fields(force = force))]
    pub async fn run_once(&self, force: bool) -> VerificationRunSummary {
        let started = Instant::now();
        let mut summary = VerificationRunSummary {
            success: true,
            ..Default::default()
        };

        let due = match self
            .items
            .select_due(Utc::now(), self.config.batch_size, force)
            .await
        {
            Ok(due) => due,
            Err(err) => {
                error!(error = ?err, "Failed to select items for verification");
                summary.success = false;
                summary
                    .errors
                    .push(format!("failed to select items for verification: {err}"));
                return summary;
            }
        };
        debug!(due = due.len(), "Selected items for verification");

        for item in due {
            let item_id = item.id;
            match self.verify_item(&item, Utc::now()).await {
                Ok(outcome) => {
                    counter!("verification_items_total", "outcome" => outcome.label()).increment(1);
                    summary.processed += 1;
                    match outcome {
                        ItemOutcome::Verified => summary.verified += 1,
                        ItemOutcome::RecheckScheduled => summary.rechecks_scheduled += 1,
                        ItemOutcome::Failed => summary.failed += 1,
                        ItemOutcome::Skipped => summary.skipped += 1,
                    }
                }
                Err(err) => {
                    error!(item_id = %item_id, error = ?err, "Datastore failure, aborting verification run");
                    summary.success = false;
                    summary.errors.push(format!("item {item_id}: {err}"));
                    break;
                }
            }
        }

        histogram!("verification_run_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(
            processed = summary.processed,
            verified = summary.verified,
            rechecks = summary.rechecks_scheduled,
            failed = summary.failed,
            "Verification run finished"
        );
        summary
    }

    #[instrument(skip_all, fields(item_id = %item.id, attempts = item.verification_attempts))]
    async fn verify_item(
        &self,
        item: &RemediationItemModel,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ItemOutcome> {
        let request = VerificationRequest {
            item_id: item.id,
            site_id: item.site_id,
            issue_category: item.issue_category.clone(),
            analysis: item.analysis.clone(),
        };

        let error = match self.verifier.verify(&request).await {
            Ok(outcome) if outcome.resolved => {
                let written = self.items.mark_verified(item, now).await?;
                return Ok(if written {
                    info!("Fix verified");
                    ItemOutcome::Verified
                } else {
                    ItemOutcome::Skipped
                });
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "Verifier call failed; counting as unresolved");
                Some(err.to_string())
            }
        };

        if item.verification_attempts < self.config.max_attempts {
            let delay = backoff_delay(
                item.verification_attempts,
                Duration::seconds(self.config.base_delay_seconds as i64),
                Duration::seconds(self.config.max_delay_seconds as i64),
            );
            let next_check_at = now + delay;
            let written = self
                .items
                .schedule_recheck(item, next_check_at, error.as_deref())
                .await?;
            if !written {
                return Ok(ItemOutcome::Skipped);
            }
            debug!(%next_check_at, "Recheck scheduled");
            return Ok(ItemOutcome::RecheckScheduled);
        }

        if !self.items.mark_failed(item, error.as_deref()).await? {
            return Ok(ItemOutcome::Skipped);
        }
        warn!("Verification attempts exhausted");
        Ok(ItemOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::hours(1);
        let max = Duration::hours(48);

        assert_eq!(backoff_delay(0, base, max), Duration::hours(1));
        assert_eq!(backoff_delay(1, base, max), Duration::hours(2));
        assert_eq!(backoff_delay(4, base, max), Duration::hours(16));
        assert_eq!(backoff_delay(6, base, max), Duration::hours(48));
        assert_eq!(backoff_delay(200, base, max), Duration::hours(48));
    }

    #[test]
    fn summary_serializes_in_camel_case() {
        let summary = VerificationRunSummary {
            success: true,
            rechecks_scheduled: 2,
            ..Default::default()
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["rechecksScheduled"], 2);
    }
}
