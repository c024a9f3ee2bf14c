//! Database migrations for the publisher service.

pub use sea_orm_migration::prelude::*;

mod m2026_03_02_090000_create_cms_connections;
mod m2026_03_02_090100_create_article_jobs;
mod m2026_03_02_090200_create_publish_records;
mod m2026_03_02_090300_create_oauth_states;
mod m2026_03_02_090400_create_remediation_items;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_03_02_090000_create_cms_connections::Migration),
            Box::new(m2026_03_02_090100_create_article_jobs::Migration),
            Box::new(m2026_03_02_090200_create_publish_records::Migration),
            Box::new(m2026_03_02_090300_create_oauth_states::Migration),
            Box::new(m2026_03_02_090400_create_remediation_items::Migration),
        ]
    }
}
