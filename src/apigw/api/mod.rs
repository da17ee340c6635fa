//! # APIs
//!
//! The API is the central object of a gateway: a frontend request contract,
//! one default backend, optional policy backends selected by conditions, and
//! the parameter mapping between frontend and backend.
//!
//! User input is checked through [`ApiSpec::route`], which turns the three
//! optional default backends and three policy lists into a single tagged
//! [`BackendRoute`]. Everything sent to the service is derived from it.

pub mod backend;
pub mod conditions;
pub mod params;
pub(crate) mod wire;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::apigw::non_empty;
use crate::apigw::validation::{check_max_len, check_not_empty, check_pattern, IDENTIFIER};
use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{join_id, parse_id, require_found, OperationContext, Resource, ResourceState};

pub use backend::{
    BackendFamily, BackendKind, BackendProtocol, BackendRoute, FuncGraphBackend, HttpBackend,
    InvocationType, MockBackend, Policy, Route,
};
pub use conditions::{Condition, ConditionContext, ConditionOrigin, ConditionType, EffectiveMode};
pub use params::{
    BackendParam, BackendParamType, ParamLocation, ParamType, RequestParam, SystemParamType,
};

use backend::{ensure_no_policies, order_like, policies_from_wire};
use params::{
    backend_params_from_wire, backend_params_to_wire, request_params_to_wire,
    validate_backend_params, validate_request_params,
};
use wire::{ApiList, AuthOptions, WireApi};

/// Sample texts may be up to this many characters
pub const MAX_SAMPLE_LEN: usize = 20_480;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
    Options,
    Any,
}

impl RequestMethod {
    pub(crate) fn wire(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
            Self::Any => "ANY",
        }
    }

    pub(crate) fn from_wire(raw: &str) -> ApigwResult<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "PATCH" => Ok(Self::Patch),
            "OPTIONS" => Ok(Self::Options),
            "ANY" => Ok(Self::Any),
            other => Err(ApigwError::UnexpectedState {
                operation: "read request method".to_string(),
                state: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrontendProtocol {
    Http,
    #[default]
    Https,
    Both,
}

impl FrontendProtocol {
    fn wire(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Both => "BOTH",
        }
    }

    fn from_wire(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "HTTP" => Self::Http,
            "BOTH" => Self::Both,
            _ => Self::Https,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiType {
    #[default]
    Public,
    Private,
}

impl ApiType {
    fn wire(self) -> u8 {
        match self {
            Self::Public => 1,
            Self::Private => 2,
        }
    }

    fn from_wire(raw: u8) -> Self {
        if raw == 2 {
            Self::Private
        } else {
            Self::Public
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthType {
    #[default]
    None,
    App,
    Iam,
    Authorizer,
}

impl AuthType {
    fn wire(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::App => "APP",
            Self::Iam => "IAM",
            Self::Authorizer => "AUTHORIZER",
        }
    }

    fn from_wire(raw: &str) -> ApigwResult<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "APP" => Ok(Self::App),
            "IAM" => Ok(Self::Iam),
            "AUTHORIZER" => Ok(Self::Authorizer),
            other => Err(ApigwError::UnexpectedState {
                operation: "read authentication type".to_string(),
                state: other.to_string(),
            }),
        }
    }
}

/// `NORMAL` matches the request URI exactly, `SWA` by prefix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchMode {
    #[default]
    Normal,
    Swa,
}

impl MatchMode {
    fn wire(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Swa => "SWA",
        }
    }

    fn from_wire(raw: &str) -> ApigwResult<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(Self::Normal),
            "SWA" => Ok(Self::Swa),
            other => Err(ApigwError::validation(
                "match_mode",
                format!("unknown match mode '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSpec {
    pub gateway_id: String,
    pub group_id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub api_type: ApiType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub request_method: RequestMethod,
    pub request_uri: String,
    #[serde(default)]
    pub request_protocol: FrontendProtocol,
    #[serde(default)]
    pub security_authentication_type: AuthType,
    /// Simple app-code authentication, only with `APP` authentication
    #[serde(default)]
    pub security_authentication_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_id: Option<String>,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub cors: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub request_params: BTreeSet<RequestParam>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub backend_params: BTreeSet<BackendParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<MockBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func_graph: Option<FuncGraphBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpBackend>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mock_policies: Vec<Policy<MockBackend>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub func_graph_policies: Vec<Policy<FuncGraphBackend>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_policies: Vec<Policy<HttpBackend>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiObserved {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Environment id to publish id of every environment the API runs in
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub publications: BTreeMap<String, String>,
}

impl ApiSpec {
    /// The configured backend, checked for exactly one default backend and
    /// for policy backends of the same family
    pub fn route(&self) -> ApigwResult<BackendRoute<'_>> {
        match (&self.mock, &self.func_graph, &self.http) {
            (Some(mock), None, None) => {
                ensure_no_policies("func_graph_policies", &self.func_graph_policies, BackendFamily::Mock)?;
                ensure_no_policies("http_policies", &self.http_policies, BackendFamily::Mock)?;
                Ok(BackendRoute::Mock(Route {
                    default: mock,
                    policies: &self.mock_policies,
                }))
            }
            (None, Some(func_graph), None) => {
                ensure_no_policies("mock_policies", &self.mock_policies, BackendFamily::FuncGraph)?;
                ensure_no_policies("http_policies", &self.http_policies, BackendFamily::FuncGraph)?;
                Ok(BackendRoute::FuncGraph(Route {
                    default: func_graph,
                    policies: &self.func_graph_policies,
                }))
            }
            (None, None, Some(http)) => {
                ensure_no_policies("mock_policies", &self.mock_policies, BackendFamily::Http)?;
                ensure_no_policies("func_graph_policies", &self.func_graph_policies, BackendFamily::Http)?;
                Ok(BackendRoute::Http(Route {
                    default: http,
                    policies: &self.http_policies,
                }))
            }
            _ => Err(ApigwError::validation(
                "backend",
                "exactly one of mock, func_graph or http must be configured",
            )),
        }
    }

    fn to_wire(&self) -> ApigwResult<WireApi> {
        let route = self.route()?;
        let mut body = WireApi {
            group_id: self.group_id.clone(),
            name: self.name.clone(),
            api_type: self.api_type.wire(),
            version: self.version.clone(),
            req_protocol: self.request_protocol.wire().to_string(),
            req_method: self.request_method.wire().to_string(),
            req_uri: self.request_uri.clone(),
            auth_type: self.security_authentication_type.wire().to_string(),
            auth_opt: (self.security_authentication_type == AuthType::App).then(|| AuthOptions {
                app_code_auth_type: if self.security_authentication_enabled {
                    "HEADER".to_string()
                } else {
                    "DISABLE".to_string()
                },
            }),
            authorizer_id: self.authorizer_id.clone(),
            match_mode: self.match_mode.wire().to_string(),
            cors: self.cors,
            remark: self.description.clone(),
            body_remark: self.body_description.clone(),
            result_normal_sample: self.success_response.clone(),
            result_failure_sample: self.failure_response.clone(),
            response_id: self.response_id.clone(),
            tags: self.tags.iter().cloned().collect(),
            req_params: request_params_to_wire(&self.request_params),
            backend_params: backend_params_to_wire(&self.backend_params),
            ..WireApi::default()
        };
        route.write(&mut body);
        Ok(body)
    }
}

/// Pair the pipe-delimited publish ids and environment ids of an API detail
pub fn publications(publish_id: &str, run_env_id: &str) -> BTreeMap<String, String> {
    publish_id
        .split('|')
        .zip(run_env_id.split('|'))
        .filter(|(publish, env)| !publish.is_empty() && !env.is_empty())
        .map(|(publish, env)| (env.to_string(), publish.to_string()))
        .collect()
}

pub(crate) fn api_path(gateway_id: &str, api_id: &str) -> String {
    ServiceClient::instance_path(gateway_id, &format!("apis/{}", api_id))
}

/// Publish id of an API in one environment, if it runs there
pub(crate) async fn publish_id_of(
    ctx: &OperationContext,
    gateway_id: &str,
    api_id: &str,
    environment_id: &str,
) -> ApigwResult<Option<String>> {
    let detail: WireApi = ctx
        .client()
        .get("get api", &api_path(gateway_id, api_id), &[])
        .await?;
    let mut pairs = publications(
        detail.publish_id.as_deref().unwrap_or_default(),
        detail.run_env_id.as_deref().unwrap_or_default(),
    );
    Ok(pairs.remove(environment_id))
}

fn decode(
    gateway_id: &str,
    wire: WireApi,
    prior: Option<&ApiSpec>,
) -> ApigwResult<ResourceState<ApiSpec, ApiObserved>> {
    let security_authentication_type = AuthType::from_wire(&wire.auth_type)?;
    let mut spec = ApiSpec {
        gateway_id: gateway_id.to_string(),
        group_id: wire.group_id,
        name: wire.name,
        api_type: ApiType::from_wire(wire.api_type),
        version: non_empty(wire.version),
        request_method: RequestMethod::from_wire(&wire.req_method)?,
        request_uri: wire.req_uri,
        request_protocol: FrontendProtocol::from_wire(&wire.req_protocol),
        security_authentication_type,
        security_authentication_enabled: wire
            .auth_opt
            .is_some_and(|opt| opt.app_code_auth_type == "HEADER"),
        authorizer_id: non_empty(wire.authorizer_id),
        match_mode: MatchMode::from_wire(&wire.match_mode)?,
        cors: wire.cors,
        description: non_empty(wire.remark),
        body_description: non_empty(wire.body_remark),
        success_response: non_empty(wire.result_normal_sample),
        failure_response: non_empty(wire.result_failure_sample),
        response_id: non_empty(wire.response_id),
        tags: wire.tags.into_iter().collect(),
        request_params: wire
            .req_params
            .into_iter()
            .map(RequestParam::from_wire)
            .collect::<ApigwResult<_>>()?,
        backend_params: backend_params_from_wire(wire.backend_params)?,
        mock: None,
        func_graph: None,
        http: None,
        mock_policies: Vec::new(),
        func_graph_policies: Vec::new(),
        http_policies: Vec::new(),
    };

    match BackendFamily::from_wire(&wire.backend_type)? {
        BackendFamily::Mock => {
            let info = wire.mock_info.unwrap_or_default();
            spec.mock = Some(MockBackend::from_wire(info)?);
            spec.mock_policies = policies_from_wire(wire.policy_mocks)?;
        }
        BackendFamily::FuncGraph => {
            let info = wire.func_info.ok_or_else(|| missing_backend(&wire.id, "func_info"))?;
            spec.func_graph = Some(FuncGraphBackend::from_wire(info)?);
            spec.func_graph_policies = policies_from_wire(wire.policy_functions)?;
        }
        BackendFamily::Http => {
            let info = wire.backend_api.ok_or_else(|| missing_backend(&wire.id, "backend_api"))?;
            spec.http = Some(HttpBackend::from_wire(info)?);
            spec.http_policies = policies_from_wire(wire.policy_https)?;
        }
    }
    if let Some(prior) = prior {
        order_like(&mut spec.mock_policies, &prior.mock_policies);
        order_like(&mut spec.func_graph_policies, &prior.func_graph_policies);
        order_like(&mut spec.http_policies, &prior.http_policies);
    }

    let observed = ApiObserved {
        registered_at: non_empty(wire.register_time),
        updated_at: non_empty(wire.update_time),
        publications: publications(
            wire.publish_id.as_deref().unwrap_or_default(),
            wire.run_env_id.as_deref().unwrap_or_default(),
        ),
    };
    Ok(ResourceState::new(join_id(&[gateway_id, &wire.id]), spec, observed))
}

fn missing_backend(api_id: &str, field: &str) -> ApigwError {
    ApigwError::UnexpectedState {
        operation: format!("read api {}", api_id),
        state: format!("{} missing", field),
    }
}

fn api_id_of(state_id: &str) -> ApigwResult<String> {
    let [_, api_id] = parse_id(state_id, ["gateway_id", "id"])?;
    Ok(api_id)
}

pub struct ApiResource;

impl ApiResource {
    async fn fetch(
        ctx: &OperationContext,
        gateway_id: &str,
        api_id: &str,
        prior: Option<&ApiSpec>,
    ) -> ApigwResult<Option<ResourceState<ApiSpec, ApiObserved>>> {
        let detail: Option<WireApi> = ctx
            .client()
            .get("get api", &api_path(gateway_id, api_id), &[])
            .await
            .or_gone()?;
        detail.map(|detail| decode(gateway_id, detail, prior)).transpose()
    }
}

#[async_trait]
impl Resource for ApiResource {
    type Spec = ApiSpec;
    type Observed = ApiObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_api_v2";

    fn validate(&self, spec: &ApiSpec) -> ApigwResult<()> {
        check_not_empty("group_id", &spec.group_id)?;
        check_pattern(
            "name",
            &spec.name,
            &IDENTIFIER,
            "3 to 64 letters, digits or underscores starting with a letter",
        )?;
        if !spec.request_uri.starts_with('/') {
            return Err(ApigwError::validation("request_uri", "must start with '/'"));
        }
        check_max_len("request_uri", &spec.request_uri, 512)?;
        if let Some(description) = &spec.description {
            check_max_len("description", description, 255)?;
        }
        for (field, sample) in [
            ("body_description", &spec.body_description),
            ("success_response", &spec.success_response),
            ("failure_response", &spec.failure_response),
        ] {
            if let Some(sample) = sample {
                check_max_len(field, sample, MAX_SAMPLE_LEN)?;
            }
        }

        if spec.security_authentication_enabled && spec.security_authentication_type != AuthType::App {
            return Err(ApigwError::validation(
                "security_authentication_enabled",
                "simple authentication requires security_authentication_type APP",
            ));
        }
        if spec.security_authentication_type == AuthType::Authorizer
            && spec.authorizer_id.as_deref().map_or(true, str::is_empty)
        {
            return Err(ApigwError::validation(
                "authorizer_id",
                "required when security_authentication_type is AUTHORIZER",
            ));
        }

        validate_request_params(&spec.request_params)?;
        validate_backend_params("backend_params", &spec.backend_params, &spec.request_params)?;
        spec.route()?.validate(&spec.request_params)
    }

    fn replace_fields(&self, prior: &ApiSpec, desired: &ApiSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.tags != desired.tags {
            fields.push("tags");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &ApiSpec,
    ) -> ApigwResult<ResourceState<ApiSpec, ApiObserved>> {
        let body = spec.to_wire()?;
        let created: WireApi = ctx
            .client()
            .post(
                "create api",
                &ServiceClient::instance_path(&spec.gateway_id, "apis"),
                &body,
            )
            .await?;
        info!(api = %created.id, name = %spec.name, backend = body.backend_type.as_str(), "API created");

        let fresh = Self::fetch(ctx, &spec.gateway_id, &created.id, Some(spec)).await?;
        require_found(fresh, "api", &created.id)
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<ApiSpec, ApiObserved>,
    ) -> ApigwResult<Option<ResourceState<ApiSpec, ApiObserved>>> {
        Self::fetch(ctx, &state.spec.gateway_id, &api_id_of(&state.id)?, Some(&state.spec)).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<ApiSpec, ApiObserved>,
        desired: &ApiSpec,
    ) -> ApigwResult<ResourceState<ApiSpec, ApiObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let api_id = api_id_of(&prior.id)?;
        let body = desired.to_wire()?;
        let _: serde_json::Value = ctx
            .client()
            .put("update api", &api_path(&desired.gateway_id, &api_id), &body)
            .await?;

        let fresh = Self::fetch(ctx, &desired.gateway_id, &api_id, Some(desired)).await?;
        require_found(fresh, "api", &api_id)
    }

    async fn delete(&self, ctx: &OperationContext, state: &ResourceState<ApiSpec, ApiObserved>) -> ApigwResult<()> {
        let path = api_path(&state.spec.gateway_id, &api_id_of(&state.id)?);
        match ctx.client().delete("delete api", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(&self, ctx: &OperationContext, id: &str) -> ApigwResult<ResourceState<ApiSpec, ApiObserved>> {
        let [gateway_id, name] = parse_id(id, ["gateway_id", "name"])?;
        let list: ApiList = ctx
            .client()
            .get(
                "list apis",
                &ServiceClient::instance_path(&gateway_id, "apis"),
                &list_query(&[("name", &name)]),
            )
            .await?;
        let mut matches: Vec<_> = list.apis.into_iter().filter(|api| api.name == name).collect();
        let api = match (matches.pop(), matches.is_empty()) {
            (Some(api), true) => api,
            (None, _) => return Err(ApigwError::not_found("api", id)),
            (Some(_), false) => {
                return Err(ApigwError::validation(
                    "id",
                    format!("more than one API is named '{}'", name),
                ))
            }
        };
        let fresh = Self::fetch(ctx, &gateway_id, &api.id, None).await?;
        require_found(fresh, "api", id)
    }
}
