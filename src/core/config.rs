//! # Configuration Module
//!
//! Provider configuration: region and project scoping, credentials, endpoint
//! overrides, HTTP settings, operation timeouts and polling cadence.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable overrides (`OTC_*`)
//! - Validation that reports every violation at once

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{ApigwError, ApigwResult};
use crate::observability::config::{LogConfig, LogFormat};

/// Main provider configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Region the gateways live in, e.g. `eu-de`
    pub region: String,

    /// Project scoping every request path
    pub project_id: String,

    /// Explicit service endpoint; derived from the region when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Credentials handed to the request signer
    #[serde(default)]
    pub auth: AuthConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Long-running operation timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Polling cadence for long-running operations
    #[serde(default)]
    pub polling: PollingConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

impl ProviderConfig {
    /// Create a configuration for a region/project pair with defaults everywhere else
    pub fn new<R: Into<String>, P: Into<String>>(region: R, project_id: P) -> Self {
        Self {
            region: region.into(),
            project_id: project_id.into(),
            endpoint: None,
            auth: AuthConfig::default(),
            http: HttpConfig::default(),
            timeouts: TimeoutConfig::default(),
            polling: PollingConfig::default(),
            logging: LogConfig::default(),
        }
    }

    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ApigwResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ApigwError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: ProviderConfig = serde_yaml::from_str(&content)
            .map_err(|e| ApigwError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> ApigwResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ApigwError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: ProviderConfig = serde_json::from_str(&content)
            .map_err(|e| ApigwError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Variables follow the pattern `OTC_<FIELD>`, e.g. `OTC_REGION=eu-nl`.
    pub fn apply_env_overrides(&mut self) -> ApigwResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, used by `apply_env_overrides`
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ApigwResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(region) = lookup("OTC_REGION") {
            self.region = region;
        }

        if let Some(project_id) = lookup("OTC_PROJECT_ID") {
            self.project_id = project_id;
        }

        if let Some(token) = lookup("OTC_AUTH_TOKEN") {
            self.auth.token = Some(token);
        }

        if let Some(endpoint) = lookup("OTC_APIGW_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }

        if let Some(timeout) = lookup("OTC_HTTP_TIMEOUT") {
            self.http.request_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| ApigwError::config(format!("Invalid OTC_HTTP_TIMEOUT: {}", e)))?;
        }

        if let Some(level) = lookup("OTC_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("OTC_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ApigwError::config(format!(
                        "Invalid OTC_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        Ok(())
    }

    /// Configuration validation with every violation reported together
    pub fn validate(&self) -> ApigwResult<()> {
        let mut errors = Vec::new();

        if self.region.trim().is_empty() {
            errors.push("region cannot be empty".to_string());
        }

        if self.project_id.trim().is_empty() {
            errors.push("project_id cannot be empty".to_string());
        }

        if let Some(endpoint) = &self.endpoint {
            if let Err(e) = Url::parse(endpoint) {
                errors.push(format!("Invalid endpoint '{}': {}", endpoint, e));
            }
        }

        if self.http.request_timeout.is_zero() {
            errors.push("http.request_timeout must be greater than 0".to_string());
        }

        let timeouts = [
            ("timeouts.gateway_create", self.timeouts.gateway_create),
            ("timeouts.gateway_update", self.timeouts.gateway_update),
            ("timeouts.gateway_delete", self.timeouts.gateway_delete),
            ("timeouts.binding", self.timeouts.binding),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                errors.push(format!("{} must be greater than 0", name));
            }
        }

        if self.polling.gateway_interval.is_zero() || self.polling.binding_interval.is_zero() {
            errors.push("polling intervals must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(ApigwError::config(errors.join("; ")));
        }

        Ok(())
    }

    /// Base URL of the APIGW service for this configuration
    pub fn service_endpoint(&self) -> ApigwResult<Url> {
        let raw = match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://apig.{}.otc.t-systems.com", self.region),
        };
        Url::parse(&raw).map_err(|e| ApigwError::config(format!("Invalid endpoint '{}': {}", raw, e)))
    }
}

/// Credentials consumed by the default token signer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Pre-issued IAM token sent as `X-Auth-Token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            user_agent: format!("otc-apigw/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Timeouts of the long-running operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(with = "humantime_serde")]
    pub gateway_create: Duration,
    #[serde(with = "humantime_serde")]
    pub gateway_update: Duration,
    #[serde(with = "humantime_serde")]
    pub gateway_delete: Duration,
    /// App authorization and signature binding convergence
    #[serde(with = "humantime_serde")]
    pub binding: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            gateway_create: Duration::from_secs(40 * 60),
            gateway_update: Duration::from_secs(10 * 60),
            gateway_delete: Duration::from_secs(10 * 60),
            binding: Duration::from_secs(3 * 60),
        }
    }
}

/// Minimum intervals between refreshes of polled objects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(with = "humantime_serde")]
    pub gateway_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub gateway_initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub binding_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            gateway_interval: Duration::from_secs(20),
            gateway_initial_delay: Duration::from_secs(5),
            binding_interval: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tokio::fs;

    #[test]
    fn test_default_config_validation() {
        let config = ProviderConfig::new("eu-de", "0123456789abcdef");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.service_endpoint().unwrap().as_str(),
            "https://apig.eu-de.otc.t-systems.com/"
        );
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("provider.yaml");

        let config_content = r#"
region: eu-nl
project_id: "5f2c0c"
endpoint: "http://127.0.0.1:8080"
auth:
  token: "secret-token"
http:
  request_timeout: "30s"
  user_agent: "test-agent"
timeouts:
  gateway_create: "50m"
  gateway_update: "5m"
  gateway_delete: "5m"
  binding: "1m"
polling:
  gateway_interval: "10s"
  gateway_initial_delay: "1s"
  binding_interval: "1s"
logging:
  level: "debug"
  format: text
"#;

        fs::write(&config_path, config_content).await.unwrap();

        let config = ProviderConfig::load_from_file(&config_path).await.unwrap();

        assert_eq!(config.project_id, "5f2c0c");
        assert_eq!(config.timeouts.gateway_create, Duration::from_secs(50 * 60));
        assert_eq!(config.polling.binding_interval, Duration::from_secs(1));
        assert_eq!(config.http.request_timeout, Duration::from_secs(30));
        assert_eq!(config.service_endpoint().unwrap().as_str(), "http://127.0.0.1:8080/");
    }

    #[tokio::test]
    async fn test_load_config_from_json_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("provider.json");

        fs::write(&config_path, r#"{"region": "eu-de", "project_id": "p1"}"#)
            .await
            .unwrap();

        let config = ProviderConfig::load_from_json(&config_path).await.unwrap();
        assert_eq!(config.timeouts.binding, Duration::from_secs(180));
        assert_eq!(config.polling.gateway_interval, Duration::from_secs(20));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("OTC_REGION", "eu-ch2"),
            ("OTC_AUTH_TOKEN", "tkn"),
            ("OTC_HTTP_TIMEOUT", "15s"),
            ("OTC_LOG_FORMAT", "text"),
        ]
        .into_iter()
        .collect();

        let mut config = ProviderConfig::new("eu-de", "p1");
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.region, "eu-ch2");
        assert_eq!(config.auth.token.as_deref(), Some("tkn"));
        assert_eq!(config.http.request_timeout, Duration::from_secs(15));
        assert!(matches!(config.logging.format, LogFormat::Text));
    }

    #[test]
    fn test_invalid_override_is_reported() {
        let mut config = ProviderConfig::new("eu-de", "p1");
        let result = config.apply_overrides_from(|key| {
            (key == "OTC_HTTP_TIMEOUT").then(|| "soon".to_string())
        });

        assert!(result.unwrap_err().to_string().contains("Invalid OTC_HTTP_TIMEOUT"));
    }

    #[test]
    fn test_config_validation_collects_errors() {
        let mut config = ProviderConfig::new("", "");
        config.endpoint = Some("not a url".to_string());

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("region cannot be empty"));
        assert!(message.contains("project_id cannot be empty"));
        assert!(message.contains("Invalid endpoint"));
    }
}
