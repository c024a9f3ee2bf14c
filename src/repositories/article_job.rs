//! Article job repository
//!
//! The claim primitive lives here: `UPDATE article_jobs SET status = <to> WHERE id = ? AND
//! status IN (<from>)`, checked through `rows_affected`. No write in this module that records a
//! failure touches the `body` column.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, QuerySelect, UpdateMany,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::article_job::{self, Entity as ArticleJob, JobStatus, Model};
use crate::providers::NormalizedArticle;

/// Input for [`ArticleJobRepository::create`]
#[derive(Debug, Clone)]
pub struct NewArticleJob {
    pub owner_id: Uuid,
    pub site_id: Uuid,
    pub site_domain: Option<String>,
    pub title: String,
    pub slug: String,
    pub keywords: Vec<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub connection_id: Option<Uuid>,
    pub featured_image_url: Option<String>,
}

/// Columns written when generation completes.
#[derive(Debug, Clone, Default)]
pub struct GeneratedFields {
    pub body: String,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub content_outline: Option<JsonValue>,
    pub word_count: Option<i32>,
}

fn status_values(statuses: &[JobStatus]) -> Vec<&'static str> {
    statuses.iter().map(JobStatus::as_str).collect()
}

fn now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}

#[derive(Debug, Clone)]
pub struct ArticleJobRepository {
    db: Arc<DatabaseConnection>,
}

impl ArticleJobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a job in `pending`.
    pub async fn create(&self, new: NewArticleJob) -> Result<Model> {
        let created_at = now();
        let model = Model {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            site_id: new.site_id,
            site_domain: new.site_domain,
            title: new.title,
            slug: new.slug,
            keywords: Some(serde_json::to_value(&new.keywords)?),
            body: None,
            meta_title: None,
            meta_description: None,
            content_outline: None,
            word_count: None,
            featured_image_url: new.featured_image_url,
            status: JobStatus::Pending.as_str().to_string(),
            scheduled_at: new.scheduled_at.map(|ts| ts.fixed_offset()),
            connection_id: new.connection_id,
            remote_id: None,
            remote_url: None,
            published_at: None,
            last_error: None,
            last_error_code: None,
            claimed_at: None,
            created_at,
            updated_at: created_at,
        };

        ArticleJob::insert(model.clone().into_active_model())
            .exec_without_returning(&*self.db)
            .await?;

        Ok(model)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>> {
        Ok(ArticleJob::find_by_id(id).one(&*self.db).await?)
    }

    fn transition(id: Uuid, from: &[JobStatus]) -> UpdateMany<ArticleJob> {
        ArticleJob::update_many()
            .filter(article_job::Column::Id.eq(id))
            .filter(article_job::Column::Status.is_in(status_values(from)))
            .col_expr(article_job::Column::UpdatedAt, Expr::value(now()))
    }

    /// Moves the job into the worker-held state `to`. `false` means another worker got there
    /// first (or the job is not in any of `from`).
    pub async fn claim(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        require_body: bool,
    ) -> Result<bool> {
        let mut update = Self::transition(id, from)
            .col_expr(article_job::Column::Status, Expr::value(to.as_str()))
            .col_expr(article_job::Column::ClaimedAt, Expr::value(now()));
        if require_body {
            update = update.filter(article_job::Column::Body.is_not_null());
        }

        let result = update.exec(&*self.db).await?;
        Ok(result.rows_affected == 1)
    }

    /// Records generation output and moves `generating` → `generated`.
    pub async fn complete_generation(&self, id: Uuid, fields: GeneratedFields) -> Result<bool> {
        let result = Self::transition(id, &[JobStatus::Generating])
            .col_expr(
                article_job::Column::Status,
                Expr::value(JobStatus::Generated.as_str()),
            )
            .col_expr(article_job::Column::Body, Expr::value(fields.body))
            .col_expr(article_job::Column::MetaTitle, Expr::value(fields.meta_title))
            .col_expr(
                article_job::Column::MetaDescription,
                Expr::value(fields.meta_description),
            )
            .col_expr(
                article_job::Column::ContentOutline,
                Expr::value(fields.content_outline),
            )
            .col_expr(article_job::Column::WordCount, Expr::value(fields.word_count))
            .col_expr(article_job::Column::LastError, Expr::value(Option::<String>::None))
            .col_expr(
                article_job::Column::LastErrorCode,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                article_job::Column::ClaimedAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Records a failure, moving any of `from` to the failure state `to`.
    pub async fn record_failure(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        message: &str,
        reason_code: &str,
    ) -> Result<bool> {
        let result = Self::transition(id, from)
            .col_expr(article_job::Column::Status, Expr::value(to.as_str()))
            .col_expr(article_job::Column::LastError, Expr::value(message))
            .col_expr(article_job::Column::LastErrorCode, Expr::value(reason_code))
            .col_expr(
                article_job::Column::ClaimedAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Records the remote entry and moves `publishing` → `published`.
    pub async fn mark_published(
        &self,
        id: Uuid,
        connection_id: Uuid,
        article: &NormalizedArticle,
    ) -> Result<bool> {
        let published_at = article.published_at.map(|ts| ts.fixed_offset());
        let result = Self::transition(id, &[JobStatus::Publishing])
            .col_expr(
                article_job::Column::Status,
                Expr::value(JobStatus::Published.as_str()),
            )
            .col_expr(article_job::Column::ConnectionId, Expr::value(connection_id))
            .col_expr(article_job::Column::RemoteId, Expr::value(article.id.clone()))
            .col_expr(article_job::Column::RemoteUrl, Expr::value(article.url.clone()))
            .col_expr(article_job::Column::PublishedAt, Expr::value(published_at))
            .col_expr(article_job::Column::LastError, Expr::value(Option::<String>::None))
            .col_expr(
                article_job::Column::LastErrorCode,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                article_job::Column::ClaimedAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Remembers a remote entry created after the job's claim was lost, so the next attempt
    /// updates it instead of creating a duplicate. Never overwrites a known entry.
    pub async fn record_remote_entry(
        &self,
        id: Uuid,
        connection_id: Uuid,
        article: &NormalizedArticle,
    ) -> Result<bool> {
        let result = ArticleJob::update_many()
            .col_expr(article_job::Column::ConnectionId, Expr::value(connection_id))
            .col_expr(article_job::Column::RemoteId, Expr::value(article.id.clone()))
            .col_expr(article_job::Column::RemoteUrl, Expr::value(article.url.clone()))
            .col_expr(article_job::Column::UpdatedAt, Expr::value(now()))
            .filter(article_job::Column::Id.eq(id))
            .filter(article_job::Column::RemoteId.is_null())
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Pins the connection resolved for a job so later runs skip the site-level lookup.
    pub async fn assign_connection(&self, id: Uuid, connection_id: Uuid) -> Result<()> {
        ArticleJob::update_many()
            .col_expr(article_job::Column::ConnectionId, Expr::value(connection_id))
            .col_expr(article_job::Column::UpdatedAt, Expr::value(now()))
            .filter(article_job::Column::Id.eq(id))
            .filter(article_job::Column::ConnectionId.is_null())
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// `publishing_failed` → `pending` for jobs that never got a body.
    pub async fn reset_to_pending(&self, id: Uuid) -> Result<bool> {
        let result = Self::transition(id, &[JobStatus::PublishingFailed])
            .filter(article_job::Column::Body.is_null())
            .col_expr(
                article_job::Column::Status,
                Expr::value(JobStatus::Pending.as_str()),
            )
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Jobs the publisher should advance: `generated` or `pending` with
    /// `scheduled_at <= now`, earliest first.
    pub async fn select_due(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<Model>> {
        Ok(ArticleJob::find()
            .filter(
                article_job::Column::Status
                    .is_in(status_values(&[JobStatus::Generated, JobStatus::Pending])),
            )
            .filter(article_job::Column::ScheduledAt.lte(now.fixed_offset()))
            .order_by_asc(article_job::Column::ScheduledAt)
            .order_by_asc(article_job::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    /// Jobs held in `generating`/`publishing` since before `cutoff`.
    pub async fn find_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<Model>> {
        Ok(ArticleJob::find()
            .filter(
                article_job::Column::Status
                    .is_in(status_values(&[JobStatus::Generating, JobStatus::Publishing])),
            )
            .filter(
                Condition::any()
                    .add(article_job::Column::ClaimedAt.lt(cutoff.fixed_offset()))
                    .add(article_job::Column::ClaimedAt.is_null()),
            )
            .all(&*self.db)
            .await?)
    }

    /// Releases a stale claim, but only if the job still carries the claim that was observed.
    pub async fn release_stale_claim(
        &self,
        job: &Model,
        held: JobStatus,
        to: JobStatus,
        message: &str,
    ) -> Result<bool> {
        let claimed_at = match job.claimed_at {
            Some(claimed_at) => article_job::Column::ClaimedAt.eq(claimed_at),
            None => article_job::Column::ClaimedAt.is_null(),
        };
        let result = Self::transition(job.id, &[held])
            .filter(claimed_at)
            .col_expr(article_job::Column::Status, Expr::value(to.as_str()))
            .col_expr(article_job::Column::LastError, Expr::value(message))
            .col_expr(article_job::Column::LastErrorCode, Expr::value("stale_claim"))
            .col_expr(
                article_job::Column::ClaimedAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }
}
