//! Creates the `publish_records` history table.
//!
//! Each successful publish leaves one row here. The foreign key restricts deletes so a job
//! with publish history cannot be hard-deleted.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PublishRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PublishRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PublishRecords::JobId).uuid().not_null())
                    .col(ColumnDef::new(PublishRecords::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(PublishRecords::Provider).text().not_null())
                    .col(ColumnDef::new(PublishRecords::RemoteId).text().not_null())
                    .col(ColumnDef::new(PublishRecords::RemoteUrl).text().null())
                    .col(ColumnDef::new(PublishRecords::RemoteStatus).text().not_null())
                    .col(
                        ColumnDef::new(PublishRecords::PublishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PublishRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_publish_records_job_id")
                            .from(PublishRecords::Table, PublishRecords::JobId)
                            .to(ArticleJobs::Table, ArticleJobs::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_publish_records_job_id")
                    .table(PublishRecords::Table)
                    .col(PublishRecords::JobId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_publish_records_job_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PublishRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PublishRecords {
    Table,
    Id,
    JobId,
    ConnectionId,
    Provider,
    RemoteId,
    RemoteUrl,
    RemoteStatus,
    PublishedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ArticleJobs {
    Table,
    Id,
}
