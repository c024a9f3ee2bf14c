//! # Repository Layer
//!
//! Repositories encapsulate SeaORM operations per table. Every state transition that more than
//! one worker may race on is a single conditional `UPDATE`/`DELETE` whose `rows_affected` decides
//! the winner; repositories report that outcome as a `bool` and never hold in-process locks.

pub mod article_job;
pub mod cms_connection;
pub mod oauth_state;
pub mod publish_record;
pub mod remediation_item;

pub use article_job::{ArticleJobRepository, GeneratedFields, NewArticleJob};
pub use cms_connection::{CmsConnectionRepository, NewConnection};
pub use oauth_state::{NewOAuthState, OAuthStateRepository};
pub use publish_record::PublishRecordRepository;
pub use remediation_item::{NewRemediationItem, RemediationItemRepository};
