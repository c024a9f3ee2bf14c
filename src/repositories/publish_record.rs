//! Publish history repository

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::models::publish_record::{self, Entity as PublishRecord, Model};
use crate::providers::{NormalizedArticle, ProviderKind};

#[derive(Debug, Clone)]
pub struct PublishRecordRepository {
    db: Arc<DatabaseConnection>,
}

impl PublishRecordRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        job_id: Uuid,
        connection_id: Uuid,
        provider: ProviderKind,
        article: &NormalizedArticle,
    ) -> Result<Model> {
        let model = Model {
            id: Uuid::new_v4(),
            job_id,
            connection_id,
            provider: provider.as_str().to_string(),
            remote_id: article.id.clone(),
            remote_url: article.url.clone(),
            remote_status: article.status.as_str().to_string(),
            published_at: article.published_at.map(|ts| ts.fixed_offset()),
            created_at: Utc::now().fixed_offset(),
        };

        PublishRecord::insert(model.clone().into_active_model())
            .exec_without_returning(&*self.db)
            .await?;

        Ok(model)
    }

    /// Most recent entry a job has on one connection.
    pub async fn latest_for_job(&self, job_id: Uuid, connection_id: Uuid) -> Result<Option<Model>> {
        Ok(PublishRecord::find()
            .filter(publish_record::Column::JobId.eq(job_id))
            .filter(publish_record::Column::ConnectionId.eq(connection_id))
            .order_by_desc(publish_record::Column::CreatedAt)
            .one(&*self.db)
            .await?)
    }

    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<Model>> {
        Ok(PublishRecord::find()
            .filter(publish_record::Column::JobId.eq(job_id))
            .order_by_asc(publish_record::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}
