//! # Service Client
//!
//! Thin JSON-over-HTTPS client for the APIGW v2 endpoints. Every call is
//! scoped to `{endpoint}/v2/{project_id}/apigw` and signed by the configured
//! [`RequestSigner`]. Status codes are folded into [`ApigwError`] kinds:
//! 404 is `NotFound`, 409 is `Conflict`, anything else non-2xx is `Upstream`.

pub mod cache;
pub mod signer;

pub use cache::ClientCache;
pub use signer::{AnonymousSigner, RequestSigner, TokenSigner};

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::core::config::ProviderConfig;
use crate::core::error::{ApigwError, ApigwResult};

/// Page size used by every list call
pub const LIST_LIMIT: u32 = 500;

/// Error body returned by the service
#[derive(Debug, Default, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_msg: String,
}

/// Authenticated client for one region
pub struct ServiceClient {
    http: reqwest::Client,
    base: String,
    signer: Arc<dyn RequestSigner>,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient").field("base", &self.base).finish()
    }
}

impl ServiceClient {
    /// Build a client from provider configuration
    pub fn new(config: &ProviderConfig, signer: Arc<dyn RequestSigner>) -> ApigwResult<Self> {
        let endpoint = config.service_endpoint()?;
        let http = reqwest::Client::builder()
            .timeout(config.http.request_timeout)
            .user_agent(config.http.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            base: format!(
                "{}/v2/{}/apigw",
                endpoint.as_str().trim_end_matches('/'),
                config.project_id
            ),
            signer,
        })
    }

    /// Path of an object living inside a gateway instance
    pub fn instance_path(gateway_id: &str, tail: &str) -> String {
        if tail.is_empty() {
            format!("instances/{}", gateway_id)
        } else {
            format!("instances/{}/{}", gateway_id, tail)
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> ApigwResult<T> {
        let bytes = self.execute(operation, Method::GET, path, query, None).await?;
        decode(&bytes)
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> ApigwResult<T> {
        let body = serde_json::to_value(body)?;
        let bytes = self.execute(operation, Method::POST, path, &[], Some(body)).await?;
        decode(&bytes)
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> ApigwResult<T> {
        let body = serde_json::to_value(body)?;
        let bytes = self.execute(operation, Method::PUT, path, &[], Some(body)).await?;
        decode(&bytes)
    }

    /// DELETE, ignoring whatever body the service returns
    pub async fn delete(&self, operation: &str, path: &str) -> ApigwResult<()> {
        self.execute(operation, Method::DELETE, path, &[], None).await?;
        Ok(())
    }

    async fn execute(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> ApigwResult<Vec<u8>> {
        let url = format!("{}/{}", self.base, path);
        let request_id = Uuid::new_v4().to_string();

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("X-Request-Id", &request_id)
            .header("Content-Type", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let request = self.signer.sign(request);

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?.to_vec();

        debug!(
            operation,
            method = %method,
            path,
            status = status.as_u16(),
            request_id = %request_id,
            "APIGW request completed"
        );

        if status.is_success() {
            return Ok(bytes);
        }

        let detail: ServiceErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ApigwError::not_found(operation, path),
            StatusCode::CONFLICT => ApigwError::conflict(format!(
                "{}: {} {}",
                operation, detail.error_code, detail.error_msg
            )),
            _ => ApigwError::Upstream {
                operation: operation.to_string(),
                status: status.as_u16(),
                code: detail.error_code,
                message: if detail.error_msg.is_empty() {
                    String::from_utf8_lossy(&bytes).into_owned()
                } else {
                    detail.error_msg
                },
            },
        })
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ApigwResult<T> {
    let payload: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        bytes
    };
    Ok(serde_json::from_slice(payload)?)
}

/// Query pairs for a list call with the standard page size
pub fn list_query<'a>(pairs: &[(&'a str, &str)]) -> Vec<(&'a str, String)> {
    let mut query: Vec<(&'a str, String)> = pairs
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (*key, value.to_string()))
        .collect();
    query.push(("limit", LIST_LIMIT.to_string()));
    query
}
