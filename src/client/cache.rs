//! Per-region client cache. The only process-wide shared state: clients are
//! built once from the provider configuration and read-only afterwards.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::client::signer::{AnonymousSigner, RequestSigner, TokenSigner};
use crate::client::ServiceClient;
use crate::core::config::ProviderConfig;
use crate::core::error::ApigwResult;

#[derive(Default)]
pub struct ClientCache {
    clients: DashMap<String, Arc<ServiceClient>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client for the configured region, building it on first use
    pub fn client_for(&self, config: &ProviderConfig) -> ApigwResult<Arc<ServiceClient>> {
        if let Some(client) = self.clients.get(&config.region) {
            return Ok(Arc::clone(client.value()));
        }

        let signer: Arc<dyn RequestSigner> = match &config.auth.token {
            Some(token) => Arc::new(TokenSigner::new(token.clone())),
            None => Arc::new(AnonymousSigner),
        };
        let client = Arc::new(ServiceClient::new(config, signer)?);
        info!(region = %config.region, "APIGW client initialized");

        let entry = self
            .clients
            .entry(config.region.clone())
            .or_insert(client);
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clients_are_shared_per_region() {
        let cache = ClientCache::new();
        let config = ProviderConfig::new("eu-de", "p1");

        let first = cache.client_for(&config).unwrap();
        let second = cache.client_for(&config).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = ProviderConfig::new("eu-nl", "p1");
        cache.client_for(&other).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
