//! Creates the `remediation_items` table used by the verification loop.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RemediationItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RemediationItems::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RemediationItems::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(RemediationItems::SiteId).uuid().not_null())
                    .col(
                        ColumnDef::new(RemediationItems::IssueCategory)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RemediationItems::Status)
                            .text()
                            .not_null()
                            .default("open"),
                    )
                    .col(
                        ColumnDef::new(RemediationItems::VerificationStatus)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(RemediationItems::NextCheckAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RemediationItems::VerificationAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RemediationItems::Analysis)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RemediationItems::LastVerificationError)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RemediationItems::VerifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RemediationItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RemediationItems::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_remediation_items_due")
                    .table(RemediationItems::Table)
                    .col(RemediationItems::Status)
                    .col(RemediationItems::VerificationStatus)
                    .col(RemediationItems::NextCheckAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_remediation_items_due").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RemediationItems::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RemediationItems {
    Table,
    Id,
    OwnerId,
    SiteId,
    IssueCategory,
    Status,
    VerificationStatus,
    NextCheckAt,
    VerificationAttempts,
    Analysis,
    LastVerificationError,
    VerifiedAt,
    CreatedAt,
    UpdatedAt,
}
