//! Shared fixtures: a provider pointed at a wiremock server with polling
//! shortened to milliseconds.

#![allow(dead_code)]

use std::time::Duration;

use otc_apigw::{OperationContext, Provider, ProviderConfig};
use serde_json::Value;
use wiremock::{MockServer, Request};

pub const PROJECT: &str = "p1";
pub const GATEWAY: &str = "gw";

/// Path prefix of every object inside the test gateway
pub fn gw_path(tail: &str) -> String {
    format!("/v2/{}/apigw/instances/{}/{}", PROJECT, GATEWAY, tail)
}

pub fn provider(server: &MockServer) -> Provider {
    let mut config = ProviderConfig::new("eu-de", PROJECT);
    config.endpoint = Some(server.uri());
    config.auth.token = Some("test-token".to_string());
    config.polling.gateway_interval = Duration::from_millis(10);
    config.polling.gateway_initial_delay = Duration::ZERO;
    config.polling.binding_interval = Duration::from_millis(10);
    config.timeouts.gateway_create = Duration::from_secs(5);
    config.timeouts.gateway_update = Duration::from_secs(5);
    config.timeouts.gateway_delete = Duration::from_secs(5);
    config.timeouts.binding = Duration::from_secs(5);
    Provider::new(config).expect("test provider")
}

pub fn context(provider: &Provider) -> OperationContext {
    provider.context().expect("operation context")
}

/// Requests received so far, as (method, path) pairs
pub async fn calls(server: &MockServer) -> Vec<(String, String)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| (request.method.to_string(), request.url.path().to_string()))
        .collect()
}

/// JSON bodies of every request matching `method` and `path`
pub async fn bodies(server: &MockServer, method: &str, path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.method.to_string() == method && request.url.path() == path)
        .map(|request: &Request| serde_json::from_slice(&request.body).unwrap_or(Value::Null))
        .collect()
}
