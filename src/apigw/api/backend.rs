//! Backend dispatch of an API.
//!
//! The user configures exactly one default backend (mock, FunctionGraph or
//! HTTP) and up to five policy backends of the same family. [`BackendRoute`]
//! is the checked, tagged form of that choice; it is built once when user
//! input is ingested and drives both the request body and route selection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;

use crate::apigw::api::conditions::{evaluate, Condition, ConditionContext, EffectiveMode, WireCondition};
use crate::apigw::api::params::{
    backend_params_from_wire, backend_params_to_wire, validate_backend_params, BackendParam,
    RequestParam, WireBackendParam,
};
use crate::apigw::api::wire::WireApi;
use crate::apigw::api::RequestMethod;
use crate::apigw::non_empty;
use crate::apigw::validation::{check_max_len, check_not_empty, check_range};
use crate::core::error::{ApigwError, ApigwResult};

/// Maximum number of policy backends per API
pub const MAX_POLICIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFamily {
    Mock,
    FuncGraph,
    Http,
}

impl BackendFamily {
    pub(crate) fn wire(self) -> &'static str {
        match self {
            Self::Mock => "MOCK",
            Self::FuncGraph => "FUNCTION",
            Self::Http => "HTTP",
        }
    }

    pub(crate) fn from_wire(raw: &str) -> ApigwResult<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "MOCK" => Ok(Self::Mock),
            "FUNCTION" => Ok(Self::FuncGraph),
            "HTTP" => Ok(Self::Http),
            other => Err(ApigwError::UnexpectedState {
                operation: "read api backend type".to_string(),
                state: other.to_string(),
            }),
        }
    }

    fn field(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::FuncGraph => "func_graph",
            Self::Http => "http",
        }
    }
}

/// One backend family with its wire representation
pub trait BackendKind:
    Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Wire: Debug + Clone + Default + Serialize + DeserializeOwned;
    const FAMILY: BackendFamily;

    fn to_wire(&self) -> Self::Wire;
    fn from_wire(wire: Self::Wire) -> ApigwResult<Self>;
    fn validate(&self, field: &str) -> ApigwResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockBackend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireMock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_id: Option<String>,
}

impl BackendKind for MockBackend {
    type Wire = WireMock;
    const FAMILY: BackendFamily = BackendFamily::Mock;

    fn to_wire(&self) -> WireMock {
        WireMock {
            result_content: self.result_content.clone(),
            authorizer_id: self.authorizer_id.clone(),
        }
    }

    fn from_wire(wire: WireMock) -> ApigwResult<Self> {
        Ok(Self {
            result_content: non_empty(wire.result_content),
            authorizer_id: non_empty(wire.authorizer_id),
        })
    }

    fn validate(&self, field: &str) -> ApigwResult<()> {
        if let Some(content) = &self.result_content {
            check_max_len(field, content, 2048)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationType {
    #[default]
    Sync,
    Async,
}

fn default_timeout() -> u32 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncGraphBackend {
    pub function_urn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub invocation_type: InvocationType,
    /// Milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireFunction {
    #[serde(default)]
    pub function_urn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub invocation_type: String,
    #[serde(default)]
    pub timeout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_id: Option<String>,
}

impl BackendKind for FuncGraphBackend {
    type Wire = WireFunction;
    const FAMILY: BackendFamily = BackendFamily::FuncGraph;

    fn to_wire(&self) -> WireFunction {
        WireFunction {
            function_urn: self.function_urn.clone(),
            version: self.version.clone(),
            invocation_type: match self.invocation_type {
                InvocationType::Sync => "sync".to_string(),
                InvocationType::Async => "async".to_string(),
            },
            timeout: self.timeout,
            authorizer_id: self.authorizer_id.clone(),
        }
    }

    fn from_wire(wire: WireFunction) -> ApigwResult<Self> {
        Ok(Self {
            function_urn: wire.function_urn,
            version: non_empty(wire.version),
            invocation_type: if wire.invocation_type == "async" {
                InvocationType::Async
            } else {
                InvocationType::Sync
            },
            timeout: wire.timeout,
            authorizer_id: non_empty(wire.authorizer_id),
        })
    }

    fn validate(&self, field: &str) -> ApigwResult<()> {
        check_not_empty(&format!("{}.function_urn", field), &self.function_urn)?;
        check_range(&format!("{}.timeout", field), self.timeout, 1, 600_000)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendProtocol {
    Http,
    #[default]
    Https,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpBackend {
    pub request_method: RequestMethod,
    #[serde(default)]
    pub request_protocol: BackendProtocol,
    pub request_uri: String,
    /// Milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i32>,
    /// Backend address, used when no VPC channel is referenced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_id: Option<String>,
    #[serde(default)]
    pub ssl_enable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireVpcChannel {
    pub vpc_channel_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireHttp {
    #[serde(default)]
    pub req_method: String,
    #[serde(default)]
    pub req_protocol: String,
    #[serde(default)]
    pub req_uri: String,
    #[serde(default)]
    pub timeout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_domain: Option<String>,
    /// 1 when a VPC channel is used, 2 otherwise
    #[serde(default)]
    pub vpc_channel_status: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_channel_info: Option<WireVpcChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_id: Option<String>,
    #[serde(default)]
    pub enable_client_ssl: bool,
}

impl HttpBackend {
    fn channel(&self) -> Option<&str> {
        self.vpc_channel_id.as_deref().filter(|id| !id.is_empty())
    }
}

impl BackendKind for HttpBackend {
    type Wire = WireHttp;
    const FAMILY: BackendFamily = BackendFamily::Http;

    fn to_wire(&self) -> WireHttp {
        let (vpc_channel_status, vpc_channel_info, url_domain) = match self.channel() {
            Some(channel) => (
                1,
                Some(WireVpcChannel {
                    vpc_channel_id: channel.to_string(),
                }),
                None,
            ),
            None => (2, None, self.url_domain.clone()),
        };
        WireHttp {
            req_method: self.request_method.wire().to_string(),
            req_protocol: match self.request_protocol {
                BackendProtocol::Http => "HTTP".to_string(),
                BackendProtocol::Https => "HTTPS".to_string(),
            },
            req_uri: self.request_uri.clone(),
            timeout: self.timeout,
            retry_count: self.retry_count,
            url_domain,
            vpc_channel_status,
            vpc_channel_info,
            authorizer_id: self.authorizer_id.clone(),
            enable_client_ssl: self.ssl_enable,
        }
    }

    fn from_wire(wire: WireHttp) -> ApigwResult<Self> {
        let via_channel = wire.vpc_channel_status == 1;
        Ok(Self {
            request_method: RequestMethod::from_wire(&wire.req_method)?,
            request_protocol: if wire.req_protocol.eq_ignore_ascii_case("HTTP") {
                BackendProtocol::Http
            } else {
                BackendProtocol::Https
            },
            request_uri: wire.req_uri,
            timeout: wire.timeout,
            retry_count: wire.retry_count,
            url_domain: if via_channel { None } else { non_empty(wire.url_domain) },
            vpc_channel_id: if via_channel {
                wire.vpc_channel_info
                    .map(|info| info.vpc_channel_id)
                    .filter(|id| !id.is_empty())
            } else {
                None
            },
            authorizer_id: non_empty(wire.authorizer_id),
            ssl_enable: wire.enable_client_ssl,
        })
    }

    fn validate(&self, field: &str) -> ApigwResult<()> {
        let has_domain = self.url_domain.as_deref().is_some_and(|d| !d.is_empty());
        if has_domain == self.channel().is_some() {
            return Err(ApigwError::validation(
                field,
                "exactly one of url_domain or vpc_channel_id must be set",
            ));
        }
        if !self.request_uri.starts_with('/') {
            return Err(ApigwError::validation(
                format!("{}.request_uri", field),
                "must start with '/'",
            ));
        }
        check_range(&format!("{}.timeout", field), self.timeout, 1, 600_000)?;
        if let Some(retries) = self.retry_count {
            check_range(&format!("{}.retry_count", field), retries, -1, 10)?;
        }
        Ok(())
    }
}

/// Conditional alternate backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy<B> {
    pub name: String,
    #[serde(flatten)]
    pub backend: B,
    #[serde(default)]
    pub effective_mode: EffectiveMode,
    pub conditions: BTreeSet<Condition>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub backend_params: BTreeSet<BackendParam>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct WirePolicy<W> {
    pub name: String,
    #[serde(flatten)]
    pub backend: W,
    #[serde(default)]
    pub effect_mode: String,
    #[serde(default)]
    pub conditions: Vec<WireCondition>,
    #[serde(default)]
    pub backend_params: Vec<WireBackendParam>,
}

impl<B: BackendKind> Policy<B> {
    pub(crate) fn to_wire(&self) -> WirePolicy<B::Wire> {
        WirePolicy {
            name: self.name.clone(),
            backend: self.backend.to_wire(),
            effect_mode: self.effective_mode.wire().to_string(),
            conditions: self.conditions.iter().map(Condition::to_wire).collect(),
            backend_params: backend_params_to_wire(&self.backend_params),
        }
    }

    pub(crate) fn from_wire(wire: WirePolicy<B::Wire>) -> ApigwResult<Self> {
        Ok(Self {
            name: wire.name,
            backend: B::from_wire(wire.backend)?,
            effective_mode: EffectiveMode::from_wire(&wire.effect_mode),
            conditions: wire
                .conditions
                .into_iter()
                .map(Condition::from_wire)
                .collect::<ApigwResult<_>>()?,
            backend_params: backend_params_from_wire(wire.backend_params)?,
        })
    }

    /// Whether this policy catches the request
    pub fn selects(&self, request: &ConditionContext) -> bool {
        evaluate(self.effective_mode, &self.conditions, request)
    }
}

/// Default backend plus its policy backends
#[derive(Debug)]
pub struct Route<'a, B> {
    pub default: &'a B,
    pub policies: &'a [Policy<B>],
}

impl<B> Clone for Route<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Route<'_, B> {}

impl<'a, B: BackendKind> Route<'a, B> {
    /// First policy catching the request, if any
    pub fn matching_policy(&self, request: &ConditionContext) -> Option<&'a Policy<B>> {
        self.policies.iter().find(|policy| policy.selects(request))
    }

    /// Backend the gateway forwards the request to
    pub fn select(&self, request: &ConditionContext) -> &'a B {
        self.matching_policy(request)
            .map(|policy| &policy.backend)
            .unwrap_or(self.default)
    }

    fn validate(&self, policy_field: &str, request_params: &BTreeSet<RequestParam>) -> ApigwResult<()> {
        self.default.validate(B::FAMILY.field())?;
        if self.policies.len() > MAX_POLICIES {
            return Err(ApigwError::validation(
                policy_field,
                format!("at most {} policy backends are allowed", MAX_POLICIES),
            ));
        }
        let mut names = BTreeSet::new();
        for policy in self.policies {
            check_not_empty(&format!("{}.name", policy_field), &policy.name)?;
            if !names.insert(policy.name.as_str()) {
                return Err(ApigwError::validation(
                    policy_field,
                    format!("duplicate policy name '{}'", policy.name),
                ));
            }
            if policy.conditions.is_empty() {
                return Err(ApigwError::validation(
                    policy_field,
                    format!("policy '{}' needs at least one condition", policy.name),
                ));
            }
            for condition in &policy.conditions {
                condition.validate(&format!("{}.conditions", policy_field), request_params)?;
            }
            policy.backend.validate(policy_field)?;
            validate_backend_params(
                &format!("{}.backend_params", policy_field),
                &policy.backend_params,
                request_params,
            )?;
        }
        Ok(())
    }

    fn policies_to_wire(&self) -> Vec<WirePolicy<B::Wire>> {
        self.policies.iter().map(Policy::to_wire).collect()
    }
}

/// Checked backend configuration of an API
#[derive(Debug, Clone, Copy)]
pub enum BackendRoute<'a> {
    Mock(Route<'a, MockBackend>),
    FuncGraph(Route<'a, FuncGraphBackend>),
    Http(Route<'a, HttpBackend>),
}

impl<'a> BackendRoute<'a> {
    pub fn family(&self) -> BackendFamily {
        match self {
            Self::Mock(_) => BackendFamily::Mock,
            Self::FuncGraph(_) => BackendFamily::FuncGraph,
            Self::Http(_) => BackendFamily::Http,
        }
    }

    pub(crate) fn validate(&self, request_params: &BTreeSet<RequestParam>) -> ApigwResult<()> {
        match self {
            Self::Mock(route) => route.validate("mock_policies", request_params),
            Self::FuncGraph(route) => route.validate("func_graph_policies", request_params),
            Self::Http(route) => route.validate("http_policies", request_params),
        }
    }

    /// Fill the backend part of a request body
    pub(crate) fn write(&self, body: &mut WireApi) {
        body.backend_type = self.family().wire().to_string();
        match self {
            Self::Mock(route) => {
                body.mock_info = Some(route.default.to_wire());
                body.policy_mocks = route.policies_to_wire();
            }
            Self::FuncGraph(route) => {
                body.func_info = Some(route.default.to_wire());
                body.policy_functions = route.policies_to_wire();
            }
            Self::Http(route) => {
                body.backend_api = Some(route.default.to_wire());
                body.policy_https = route.policies_to_wire();
            }
        }
    }
}

/// Policies of a family other than the default backend's must be absent
pub(crate) fn ensure_no_policies<B>(field: &str, policies: &[Policy<B>], family: BackendFamily) -> ApigwResult<()> {
    if policies.is_empty() {
        Ok(())
    } else {
        Err(ApigwError::validation(
            field,
            format!(
                "policy backends must use the same family as the default {} backend",
                family.field()
            ),
        ))
    }
}

pub(crate) fn policies_from_wire<B: BackendKind>(wire: Vec<WirePolicy<B::Wire>>) -> ApigwResult<Vec<Policy<B>>> {
    wire.into_iter().map(Policy::from_wire).collect()
}

/// Keep the user's policy order; the service may list policies differently
pub(crate) fn order_like<B>(policies: &mut [Policy<B>], prior: &[Policy<B>]) {
    policies.sort_by_key(|policy| {
        prior
            .iter()
            .position(|known| known.name == policy.name)
            .unwrap_or(usize::MAX)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apigw::api::conditions::{ConditionOrigin, ConditionType};

    fn http(channel: Option<&str>) -> HttpBackend {
        HttpBackend {
            request_method: RequestMethod::Get,
            request_protocol: BackendProtocol::Https,
            request_uri: "/orders".to_string(),
            timeout: 5000,
            retry_count: None,
            url_domain: if channel.is_some() { None } else { Some("backend.example.com".to_string()) },
            vpc_channel_id: channel.map(str::to_string),
            authorizer_id: None,
            ssl_enable: false,
        }
    }

    #[test]
    fn test_vpc_channel_switches_status_and_drops_domain() {
        let wire = http(Some("vpc-1")).to_wire();
        assert_eq!(wire.vpc_channel_status, 1);
        assert!(wire.url_domain.is_none());
        assert_eq!(wire.vpc_channel_info.as_ref().unwrap().vpc_channel_id, "vpc-1");
        assert_eq!(HttpBackend::from_wire(wire).unwrap(), http(Some("vpc-1")));

        let wire = http(None).to_wire();
        assert_eq!(wire.vpc_channel_status, 2);
        assert!(wire.vpc_channel_info.is_none());
        assert_eq!(wire.url_domain.as_deref(), Some("backend.example.com"));
    }

    #[test]
    fn test_http_needs_exactly_one_address() {
        let mut both = http(Some("vpc-1"));
        both.url_domain = Some("backend.example.com".to_string());
        assert!(both.validate("http").is_err());
        assert!(http(None).validate("http").is_ok());
    }

    #[test]
    fn test_policy_flattens_backend_fields() {
        let policy = Policy {
            name: "gold".to_string(),
            backend: MockBackend {
                result_content: Some("gold".to_string()),
                authorizer_id: None,
            },
            effective_mode: EffectiveMode::All,
            conditions: [Condition {
                origin: ConditionOrigin::Source,
                param_name: None,
                condition_type: ConditionType::Exact,
                value: "10.0.0.1".to_string(),
            }]
            .into_iter()
            .collect(),
            backend_params: BTreeSet::new(),
        };
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["result_content"], "gold");
        let back: Policy<MockBackend> = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);

        let wire = serde_json::to_value(policy.to_wire()).unwrap();
        assert_eq!(wire["effect_mode"], "ALL");
        assert_eq!(wire["conditions"][0]["condition_origin"], "source");
    }

    #[test]
    fn test_route_selects_first_matching_policy() {
        let default = MockBackend {
            result_content: Some("default".to_string()),
            authorizer_id: None,
        };
        let policies = vec![Policy {
            name: "internal".to_string(),
            backend: MockBackend {
                result_content: Some("internal".to_string()),
                authorizer_id: None,
            },
            effective_mode: EffectiveMode::Any,
            conditions: [Condition {
                origin: ConditionOrigin::Source,
                param_name: None,
                condition_type: ConditionType::Pattern,
                value: r"^10\.".to_string(),
            }]
            .into_iter()
            .collect(),
            backend_params: BTreeSet::new(),
        }];
        let route = Route {
            default: &default,
            policies: &policies,
        };
        let inside = ConditionContext::default().with_source_ip("10.1.2.3");
        let outside = ConditionContext::default().with_source_ip("8.8.8.8");
        assert_eq!(route.select(&inside).result_content.as_deref(), Some("internal"));
        assert_eq!(route.select(&outside).result_content.as_deref(), Some("default"));
    }
}
