//! Creates the `cms_connections` table.
//!
//! A connection is one authorized link between a site and a CMS account. At most one
//! connection per (site, provider) may be `active`; that rule lives in a partial unique
//! index because `error` rows are kept around for reconnection prompts.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CmsConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CmsConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CmsConnections::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(CmsConnections::SiteId).uuid().not_null())
                    .col(ColumnDef::new(CmsConnections::Provider).text().not_null())
                    .col(ColumnDef::new(CmsConnections::DisplayName).text().null())
                    .col(
                        ColumnDef::new(CmsConnections::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(CmsConnections::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CmsConnections::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CmsConnections::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(CmsConnections::Scopes).json_binary().null())
                    .col(
                        ColumnDef::new(CmsConnections::TokenVersion)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(CmsConnections::Config).json_binary().null())
                    .col(ColumnDef::new(CmsConnections::LastError).text().null())
                    .col(
                        ColumnDef::new(CmsConnections::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CmsConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CmsConnections::UpdatedAt)
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
                    .name("idx_cms_connections_site_created")
                    .table(CmsConnections::Table)
                    .col(CmsConnections::SiteId)
                    .col(CmsConnections::CreatedAt)
                    .to_owned(),
            )
            .await?;

        let backend = manager.get_database_backend();
        let sql = match backend {
            DatabaseBackend::Postgres => {
                "DO $$\nBEGIN\n    IF NOT EXISTS (\n        SELECT 1 FROM pg_indexes\n        WHERE schemaname = current_schema()\n          AND indexname = 'idx_cms_connections_active_site_provider'\n    ) THEN\n        CREATE UNIQUE INDEX idx_cms_connections_active_site_provider\n            ON cms_connections (site_id, provider)\n            WHERE status = 'active';\n    END IF;\nEND\n$$;"
            }
            _ => {
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_cms_connections_active_site_provider \
                 ON cms_connections (site_id, provider) WHERE status = 'active'"
            }
        };

        manager
            .get_connection()
            .execute(Statement::from_string(backend, sql.to_string()))
            .await
            .map(|_| ())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "DROP INDEX IF EXISTS idx_cms_connections_active_site_provider",
            ))
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_cms_connections_site_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CmsConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CmsConnections {
    Table,
    Id,
    OwnerId,
    SiteId,
    Provider,
    DisplayName,
    Status,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAt,
    Scopes,
    TokenVersion,
    Config,
    LastError,
    LastSyncAt,
    CreatedAt,
    UpdatedAt,
}
