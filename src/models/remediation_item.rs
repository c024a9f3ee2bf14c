//! Remediation item entity model
//!
//! A detected site issue together with the record of its fix and the verification
//! bookkeeping (`verification_attempts`, `next_check_at`) driven by the verification loop.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use super::article_job::UnknownStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "remediation_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub owner_id: Uuid,
    pub site_id: Uuid,
    /// Category reported by the site audit (e.g. `missing_meta_description`)
    pub issue_category: String,
    /// `open`, `in_progress` or `completed`
    pub status: String,
    /// See [`VerificationStatus`]
    pub verification_status: String,
    /// Only meaningful while `status = completed` and verification is pending or rechecking
    pub next_check_at: Option<DateTimeWithTimeZone>,
    pub verification_attempts: i32,
    /// Analysis payload handed to the issue verifier
    #[sea_orm(column_type = "JsonBinary")]
    pub analysis: Option<JsonValue>,
    pub last_verification_error: Option<String>,
    pub verified_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    Open,
    InProgress,
    Completed,
}

impl RemediationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationStatus::Open => "open",
            RemediationStatus::InProgress => "in_progress",
            RemediationStatus::Completed => "completed",
        }
    }
}

impl FromStr for RemediationStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(RemediationStatus::Open),
            "in_progress" => Ok(RemediationStatus::InProgress),
            "completed" => Ok(RemediationStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    NeedsRecheck,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::NeedsRecheck => "needs_recheck",
            VerificationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VerificationStatus::Verified | VerificationStatus::Failed)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            "needs_recheck" => Ok(VerificationStatus::NeedsRecheck),
            "failed" => Ok(VerificationStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
