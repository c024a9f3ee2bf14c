//! Creates the `article_jobs` table backing the publishing state machine.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ArticleJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ArticleJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ArticleJobs::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(ArticleJobs::SiteId).uuid().not_null())
                    .col(ColumnDef::new(ArticleJobs::SiteDomain).text().null())
                    .col(ColumnDef::new(ArticleJobs::Title).text().not_null())
                    .col(ColumnDef::new(ArticleJobs::Slug).text().not_null())
                    .col(ColumnDef::new(ArticleJobs::Keywords).json_binary().null())
                    .col(ColumnDef::new(ArticleJobs::Body).text().null())
                    .col(ColumnDef::new(ArticleJobs::MetaTitle).text().null())
                    .col(ColumnDef::new(ArticleJobs::MetaDescription).text().null())
                    .col(
                        ColumnDef::new(ArticleJobs::ContentOutline)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(ArticleJobs::WordCount).integer().null())
                    .col(ColumnDef::new(ArticleJobs::FeaturedImageUrl).text().null())
                    .col(
                        ColumnDef::new(ArticleJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ArticleJobs::ScheduledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ArticleJobs::ConnectionId).uuid().null())
                    .col(ColumnDef::new(ArticleJobs::RemoteId).text().null())
                    .col(ColumnDef::new(ArticleJobs::RemoteUrl).text().null())
                    .col(
                        ColumnDef::new(ArticleJobs::PublishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ArticleJobs::LastError).text().null())
                    .col(ColumnDef::new(ArticleJobs::LastErrorCode).text().null())
                    .col(
                        ColumnDef::new(ArticleJobs::ClaimedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ArticleJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ArticleJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Due-job selection scans (status, scheduled_at)
        manager
            .create_index(
                Index::create()
                    .name("idx_article_jobs_status_scheduled")
                    .table(ArticleJobs::Table)
                    .col(ArticleJobs::Status)
                    .col(ArticleJobs::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_article_jobs_owner")
                    .table(ArticleJobs::Table)
                    .col(ArticleJobs::OwnerId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_article_jobs_owner").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_article_jobs_status_scheduled")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ArticleJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ArticleJobs {
    Table,
    Id,
    OwnerId,
    SiteId,
    SiteDomain,
    Title,
    Slug,
    Keywords,
    Body,
    MetaTitle,
    MetaDescription,
    ContentOutline,
    WordCount,
    FeaturedImageUrl,
    Status,
    ScheduledAt,
    ConnectionId,
    RemoteId,
    RemoteUrl,
    PublishedAt,
    LastError,
    LastErrorCode,
    ClaimedAt,
    CreatedAt,
    UpdatedAt,
}
