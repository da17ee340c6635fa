//! Provider wiring: validated configuration, the per-region client cache and
//! the registry of every APIGW resource type.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::apigw;
use crate::client::ClientCache;
use crate::core::config::ProviderConfig;
use crate::core::error::ApigwResult;
use crate::framework::{DynResource, OperationContext, ResourceRegistry};

pub struct Provider {
    config: ProviderConfig,
    clients: ClientCache,
    registry: ResourceRegistry,
}

impl Provider {
    pub fn new(config: ProviderConfig) -> ApigwResult<Self> {
        config.validate()?;

        let mut registry = ResourceRegistry::new();
        apigw::register_all(&mut registry);
        info!(
            region = %config.region,
            resource_types = registry.type_names().count(),
            "APIGW provider configured"
        );

        Ok(Self {
            config,
            clients: ClientCache::new(),
            registry,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn resource(&self, type_name: &str) -> ApigwResult<Arc<dyn DynResource>> {
        self.registry.get(type_name)
    }

    /// Context for one CRUD call
    pub fn context(&self) -> ApigwResult<OperationContext> {
        let client = self.clients.client_for(&self.config)?;
        Ok(OperationContext::new(client, &self.config))
    }

    /// Context bound to a cancellation token owned by the caller
    pub fn context_with_cancellation(&self, cancel: CancellationToken) -> ApigwResult<OperationContext> {
        Ok(self.context()?.with_cancellation(cancel))
    }
}
