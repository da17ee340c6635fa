//! Request and response bodies of the API endpoints.

use serde::{Deserialize, Serialize};

use crate::apigw::api::backend::{WireFunction, WireHttp, WireMock, WirePolicy};
use crate::apigw::api::params::{WireBackendParam, WireRequestParam};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct AuthOptions {
    /// `HEADER` enables simple app-code authentication, `DISABLE` turns it off
    #[serde(default)]
    pub app_code_auth_type: String,
}

/// API object as sent on create/update and returned by GET
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct WireApi {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub group_id: String,
    pub name: String,
    /// 1 public, 2 private
    #[serde(rename = "type")]
    pub api_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub req_protocol: String,
    pub req_method: String,
    pub req_uri: String,
    pub auth_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_opt: Option<AuthOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_id: Option<String>,
    pub match_mode: String,
    #[serde(default)]
    pub cors: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_remark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_normal_sample: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_failure_sample: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub backend_type: String,
    #[serde(default)]
    pub req_params: Vec<WireRequestParam>,
    #[serde(default)]
    pub backend_params: Vec<WireBackendParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_info: Option<WireMock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func_info: Option<WireFunction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_api: Option<WireHttp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_mocks: Vec<WirePolicy<WireMock>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_functions: Vec<WirePolicy<WireFunction>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_https: Vec<WirePolicy<WireHttp>>,

    /// Pipe-delimited publish ids, paired by index with `run_env_id`
    #[serde(default, skip_serializing)]
    pub publish_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub run_env_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub register_time: Option<String>,
    #[serde(default, skip_serializing)]
    pub update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiList {
    #[serde(default)]
    pub apis: Vec<ApiSummary>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiSummary {
    pub id: String,
    pub name: String,
}
