//! # Data Models
//!
//! SeaORM entities and the API-facing types built from them.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod article_job;
pub mod cms_connection;
pub mod oauth_state;
pub mod publish_record;
pub mod remediation_item;

pub use article_job::Entity as ArticleJob;
pub use cms_connection::Entity as CmsConnection;
pub use oauth_state::Entity as OAuthState;
pub use publish_record::Entity as PublishRecord;
pub use remediation_item::Entity as RemediationItem;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "poblysh-publisher".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
