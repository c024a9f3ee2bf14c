//! Adapter registry
//!
//! Explicit handle mapping each `ProviderKind` to its adapter. Built once at startup from
//! configuration and shared through application state.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::adapter::{CmsAdapter, ProviderKind};
use super::ghost::GhostAdapter;
use super::shopify::ShopifyAdapter;
use super::webflow::WebflowAdapter;
use super::wordpress::WordPressAdapter;
use crate::config::ProviderClientConfig;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("provider '{provider}' is not configured")]
    ProviderNotRegistered { provider: ProviderKind },
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn CmsAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.registered())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own kind, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn CmsAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, provider: ProviderKind) -> Result<Arc<dyn CmsAdapter>, RegistryError> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or(RegistryError::ProviderNotRegistered { provider })
    }

    pub fn contains(&self, provider: ProviderKind) -> bool {
        self.adapters.contains_key(&provider)
    }

    pub fn registered(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .collect()
    }

    /// Builds the registry. OAuth platforms are only registered when client credentials exist.
    pub fn from_config(config: &ProviderClientConfig) -> Self {
        let timeout = config.http_timeout();
        let mut registry = Self::new();

        registry.register(Arc::new(WordPressAdapter::new(
            config.wordpress_app_name.clone(),
            timeout,
        )));
        registry.register(Arc::new(GhostAdapter::new(timeout)));

        match (&config.webflow_client_id, &config.webflow_client_secret) {
            (Some(id), Some(secret)) => {
                let mut adapter = WebflowAdapter::new(id.clone(), secret.clone(), timeout);
                if let (Some(auth), Some(api)) = (&config.webflow_auth_base, &config.webflow_api_base)
                {
                    adapter = adapter.with_base_urls(auth.clone(), api.clone());
                }
                registry.register(Arc::new(adapter));
            }
            _ => warn!("Webflow adapter not registered: missing Webflow client credentials"),
        }

        match (&config.shopify_client_id, &config.shopify_client_secret) {
            (Some(id), Some(secret)) => {
                let mut adapter = ShopifyAdapter::new(id.clone(), secret.clone(), timeout);
                if let Some(origin) = &config.shopify_origin_override {
                    adapter = adapter.with_origin_override(origin.clone());
                }
                registry.register(Arc::new(adapter));
            }
            _ => warn!("Shopify adapter not registered: missing Shopify client credentials"),
        }

        info!(providers = ?registry.registered(), "Adapter registry initialized");
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_adapters_need_credentials() {
        let registry = AdapterRegistry::from_config(&ProviderClientConfig::default());
        assert!(registry.contains(ProviderKind::WordPress));
        assert!(registry.contains(ProviderKind::Ghost));
        assert!(matches!(
            registry.get(ProviderKind::Webflow),
            Err(RegistryError::ProviderNotRegistered { .. })
        ));
    }

    #[test]
    fn configured_oauth_adapters_are_registered() {
        let config = ProviderClientConfig {
            webflow_client_id: Some("wf".to_string()),
            webflow_client_secret: Some("wf-secret".to_string()),
            shopify_client_id: Some("sh".to_string()),
            shopify_client_secret: Some("sh-secret".to_string()),
            ..Default::default()
        };
        let registry = AdapterRegistry::from_config(&config);
        assert_eq!(registry.registered(), ProviderKind::ALL.to_vec());
        assert_eq!(
            registry.get(ProviderKind::Shopify).unwrap().kind(),
            ProviderKind::Shopify
        );
    }
}
