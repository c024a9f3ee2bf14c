//! Publish history entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// One successful publish of an article job to a CMS
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "publish_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub job_id: Uuid,
    pub connection_id: Uuid,
    pub provider: String,
    pub remote_id: String,
    pub remote_url: Option<String>,
    /// Normalized remote status (`draft` or `published`)
    pub remote_status: String,
    pub published_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::article_job::Entity",
        from = "Column::JobId",
        to = "super::article_job::Column::Id"
    )]
    ArticleJob,
}

impl Related<super::article_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ArticleJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
