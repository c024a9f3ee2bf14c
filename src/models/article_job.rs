//! Article job entity model
//!
//! One row per unit of content moving through the generate/publish state machine.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "article_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Account that owns the job
    pub owner_id: Uuid,

    /// Site the article is written for
    pub site_id: Uuid,

    /// Public domain of the site, passed to the content generator
    pub site_domain: Option<String>,

    pub title: String,

    pub slug: String,

    /// Target keywords (JSON array of strings)
    #[sea_orm(column_type = "JsonBinary")]
    pub keywords: Option<JsonValue>,

    /// Generated body; null until generation completes and never cleared afterwards
    #[sea_orm(column_type = "Text")]
    pub body: Option<String>,

    pub meta_title: Option<String>,

    pub meta_description: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub content_outline: Option<JsonValue>,

    pub word_count: Option<i32>,

    /// Supplied when the job is planned; sent to platforms that take an image URL
    pub featured_image_url: Option<String>,

    /// Lifecycle state, see [`JobStatus`]
    pub status: String,

    pub scheduled_at: Option<DateTimeWithTimeZone>,

    /// CMS connection used to publish (resolved lazily)
    pub connection_id: Option<Uuid>,

    pub remote_id: Option<String>,

    pub remote_url: Option<String>,

    pub published_at: Option<DateTimeWithTimeZone>,

    pub last_error: Option<String>,

    /// Machine-readable reason for `last_error`
    pub last_error_code: Option<String>,

    /// Set by every successful claim; the stale-claim sweep compares against it
    pub claimed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::publish_record::Entity")]
    PublishRecord,
}

impl Related<super::publish_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PublishRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed lifecycle state. Unknown values are surfaced as an error rather than guessed.
    pub fn job_status(&self) -> Result<JobStatus, UnknownStatus> {
        self.status.parse()
    }

    /// Keywords as plain strings; non-string entries are skipped.
    pub fn keyword_list(&self) -> Vec<String> {
        self.keywords
            .as_ref()
            .and_then(|value| value.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Article job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Generating,
    Generated,
    GenerationFailed,
    Publishing,
    Published,
    PublishingFailed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Generating => "generating",
            JobStatus::Generated => "generated",
            JobStatus::GenerationFailed => "generation_failed",
            JobStatus::Publishing => "publishing",
            JobStatus::Published => "published",
            JobStatus::PublishingFailed => "publishing_failed",
        }
    }

    /// States a generation claim may start from.
    pub const GENERATION_CLAIMABLE: [JobStatus; 2] =
        [JobStatus::Pending, JobStatus::GenerationFailed];

    /// States a publishing claim may start from.
    pub const PUBLISHING_CLAIMABLE: [JobStatus; 2] =
        [JobStatus::Generated, JobStatus::PublishingFailed];

    /// True while a worker holds the job.
    pub fn is_claimed(&self) -> bool {
        matches!(self, JobStatus::Generating | JobStatus::Publishing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status value '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "generating" => Ok(JobStatus::Generating),
            "generated" => Ok(JobStatus::Generated),
            "generation_failed" => Ok(JobStatus::GenerationFailed),
            "publishing" => Ok(JobStatus::Publishing),
            "published" => Ok(JobStatus::Published),
            "publishing_failed" => Ok(JobStatus::PublishingFailed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
