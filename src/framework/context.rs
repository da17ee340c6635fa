use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client::ServiceClient;
use crate::core::config::{PollingConfig, ProviderConfig, TimeoutConfig};

/// Everything a CRUD entry point needs besides its own resource data
///
/// The client is shared and read-only; the cancellation token is the host's
/// signal that the current operation should stop waiting.
#[derive(Clone)]
pub struct OperationContext {
    client: Arc<ServiceClient>,
    timeouts: TimeoutConfig,
    polling: PollingConfig,
    cancel: CancellationToken,
}

impl OperationContext {
    pub fn new(client: Arc<ServiceClient>, config: &ProviderConfig) -> Self {
        Self {
            client,
            timeouts: config.timeouts.clone(),
            polling: config.polling.clone(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token with one owned by the host
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
