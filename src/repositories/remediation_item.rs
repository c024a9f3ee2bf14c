//! Remediation item repository
//!
//! Verification outcomes are written conditionally on the `verification_attempts` value the
//! caller read, so two overlapping verification runs cannot both count the same check.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
    QuerySelect, UpdateMany,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::remediation_item::{
    self, Entity as RemediationItem, Model, RemediationStatus, VerificationStatus,
};

const OPEN_VERIFICATION: [VerificationStatus; 2] =
    [VerificationStatus::Pending, VerificationStatus::NeedsRecheck];

fn open_verification_values() -> Vec<&'static str> {
    OPEN_VERIFICATION.iter().map(VerificationStatus::as_str).collect()
}

/// Input for [`RemediationItemRepository::create`]
#[derive(Debug, Clone)]
pub struct NewRemediationItem {
    pub owner_id: Uuid,
    pub site_id: Uuid,
    pub issue_category: String,
    pub analysis: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct RemediationItemRepository {
    db: Arc<DatabaseConnection>,
}

impl RemediationItemRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewRemediationItem) -> Result<Model> {
        let now = Utc::now().fixed_offset();
        let model = Model {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            site_id: new.site_id,
            issue_category: new.issue_category,
            status: RemediationStatus::Open.as_str().to_string(),
            verification_status: VerificationStatus::Pending.as_str().to_string(),
            next_check_at: None,
            verification_attempts: 0,
            analysis: new.analysis,
            last_verification_error: None,
            verified_at: None,
            created_at: now,
            updated_at: now,
        };

        RemediationItem::insert(model.clone().into_active_model())
            .exec_without_returning(&*self.db)
            .await?;

        Ok(model)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>> {
        Ok(RemediationItem::find_by_id(id).one(&*self.db).await?)
    }

    /// Marks the fix applied and queues the first verification check for `now`.
    /// Items already completed are left alone.
    pub async fn complete_fix(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let now = now.fixed_offset();
        let result = RemediationItem::update_many()
            .col_expr(
                remediation_item::Column::Status,
                Expr::value(RemediationStatus::Completed.as_str()),
            )
            .col_expr(
                remediation_item::Column::VerificationStatus,
                Expr::value(VerificationStatus::Pending.as_str()),
            )
            .col_expr(remediation_item::Column::NextCheckAt, Expr::value(now))
            .col_expr(remediation_item::Column::UpdatedAt, Expr::value(now))
            .filter(remediation_item::Column::Id.eq(id))
            .filter(remediation_item::Column::Status.ne(RemediationStatus::Completed.as_str()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Completed items awaiting verification, soonest check first. `force` ignores
    /// `next_check_at`.
    pub async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: u64,
        force: bool,
    ) -> Result<Vec<Model>> {
        let mut query = RemediationItem::find()
            .filter(remediation_item::Column::Status.eq(RemediationStatus::Completed.as_str()))
            .filter(remediation_item::Column::VerificationStatus.is_in(open_verification_values()));
        if !force {
            query = query.filter(remediation_item::Column::NextCheckAt.lte(now.fixed_offset()));
        }

        Ok(query
            .order_by_asc(remediation_item::Column::NextCheckAt)
            .order_by_asc(remediation_item::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    fn outcome(item: &Model, status: VerificationStatus) -> UpdateMany<RemediationItem> {
        RemediationItem::update_many()
            .col_expr(
                remediation_item::Column::VerificationStatus,
                Expr::value(status.as_str()),
            )
            .col_expr(
                remediation_item::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(remediation_item::Column::Id.eq(item.id))
            .filter(remediation_item::Column::Status.eq(RemediationStatus::Completed.as_str()))
            .filter(remediation_item::Column::VerificationStatus.is_in(open_verification_values()))
            .filter(remediation_item::Column::VerificationAttempts.eq(item.verification_attempts))
    }

    pub async fn mark_verified(&self, item: &Model, now: DateTime<Utc>) -> Result<bool> {
        let result = Self::outcome(item, VerificationStatus::Verified)
            .col_expr(
                remediation_item::Column::VerifiedAt,
                Expr::value(now.fixed_offset()),
            )
            .col_expr(
                remediation_item::Column::NextCheckAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(
                remediation_item::Column::LastVerificationError,
                Expr::value(Option::<String>::None),
            )
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Counts one more failed check and schedules the next one.
    pub async fn schedule_recheck(
        &self,
        item: &Model,
        next_check_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = Self::outcome(item, VerificationStatus::NeedsRecheck)
            .col_expr(
                remediation_item::Column::VerificationAttempts,
                Expr::value(item.verification_attempts + 1),
            )
            .col_expr(
                remediation_item::Column::NextCheckAt,
                Expr::value(next_check_at.fixed_offset()),
            )
            .col_expr(
                remediation_item::Column::LastVerificationError,
                Expr::value(error.map(str::to_string)),
            )
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Gives up on the item. `verification_attempts` is left as read.
    pub async fn mark_failed(&self, item: &Model, error: Option<&str>) -> Result<bool> {
        let result = Self::outcome(item, VerificationStatus::Failed)
            .col_expr(
                remediation_item::Column::NextCheckAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(
                remediation_item::Column::LastVerificationError,
                Expr::value(error.map(str::to_string)),
            )
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }
}
