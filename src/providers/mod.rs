//! CMS provider adapters
//!
//! This module provides the publishing side of the service:
//! - The `CmsAdapter` trait every platform implementation follows
//! - Shared request/response types and the normalized article shape
//! - An explicit `AdapterRegistry` keyed by the closed `ProviderKind` enum
//! - One adapter per supported platform

pub mod adapter;
pub mod field_mapping;
pub(crate) mod http;
pub mod ghost;
pub mod registry;
pub mod shopify;
pub mod webflow;
pub mod wordpress;

pub use adapter::{
    AdapterError, ArticleDraft, AuthFlow, CmsAdapter, CredentialBundle, NormalizedArticle,
    ProviderContext, ProviderKind, PublishDestination, PublishMode, PublishTarget, RemoteStatus,
    UnknownProvider,
};
pub use field_mapping::{CollectionField, FieldMapping, FieldMappingOverrides, infer_field_mapping};
pub use ghost::GhostAdapter;
pub use registry::{AdapterRegistry, RegistryError};
pub use shopify::ShopifyAdapter;
pub use webflow::WebflowAdapter;
pub use wordpress::WordPressAdapter;
