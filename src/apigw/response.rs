//! # Custom Gateway Responses
//!
//! A per-group table overriding the body and status code the gateway answers
//! with for well-known error kinds. The service always reports its built-in
//! defaults alongside user rules; only rules without the `default` flag are
//! kept in state, otherwise every read would report drift.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::apigw::validation::{check_max_len, check_pattern, check_range, IDENTIFIER};
use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{join_id, parse_id, OperationContext, Resource, ResourceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    AuthFailure,
    AuthHeaderMissing,
    AuthorizerFailure,
    AuthorizerConfFailure,
    AuthorizerIdentitiesFailure,
    BackendUnavailable,
    BackendTimeout,
    Throttled,
    Unauthorized,
    AccessDenied,
    NotFound,
    RequestParametersFailure,
    #[serde(rename = "DEFAULT_4XX")]
    Default4xx,
    #[serde(rename = "DEFAULT_5XX")]
    Default5xx,
    ThirdAuthFailure,
    ThirdAuthIdentitiesFailure,
    ThirdAuthConfFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRule {
    pub body: String,
    pub status_code: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    pub gateway_id: String,
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub rules: BTreeMap<ErrorType, ResponseRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseObserved {
    pub response_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireRule {
    #[serde(default)]
    body: String,
    status: u16,
    #[serde(default, rename = "default", skip_serializing)]
    is_default: bool,
}

#[derive(Debug, Serialize)]
struct ResponseBody<'a> {
    name: &'a str,
    responses: BTreeMap<ErrorType, WireRule>,
}

#[derive(Debug, Deserialize)]
struct ResponseDetail {
    id: String,
    name: String,
    #[serde(default)]
    responses: BTreeMap<String, WireRule>,
    #[serde(default)]
    create_time: Option<String>,
    #[serde(default)]
    update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseList {
    #[serde(default)]
    responses: Vec<ResponseDetail>,
}

fn to_wire(rules: &BTreeMap<ErrorType, ResponseRule>) -> BTreeMap<ErrorType, WireRule> {
    rules
        .iter()
        .map(|(kind, rule)| {
            (
                *kind,
                WireRule {
                    body: rule.body.clone(),
                    status: rule.status_code,
                    is_default: false,
                },
            )
        })
        .collect()
}

/// Keep user-managed rules only; unknown error kinds are skipped
fn from_wire(responses: BTreeMap<String, WireRule>) -> BTreeMap<ErrorType, ResponseRule> {
    responses
        .into_iter()
        .filter(|(_, rule)| !rule.is_default)
        .filter_map(|(kind, rule)| {
            let kind: ErrorType = serde_json::from_value(serde_json::Value::String(kind)).ok()?;
            Some((
                kind,
                ResponseRule {
                    body: rule.body,
                    status_code: rule.status,
                },
            ))
        })
        .collect()
}

pub struct ResponseResource;

impl ResponseResource {
    fn collection(gateway_id: &str, group_id: &str) -> String {
        ServiceClient::instance_path(
            gateway_id,
            &format!("api-groups/{}/gateway-responses", group_id),
        )
    }

    fn into_state(
        gateway_id: &str,
        group_id: &str,
        detail: ResponseDetail,
    ) -> ResourceState<ResponseSpec, ResponseObserved> {
        let spec = ResponseSpec {
            gateway_id: gateway_id.to_string(),
            group_id: group_id.to_string(),
            name: detail.name,
            rules: from_wire(detail.responses),
        };
        ResourceState::new(
            join_id(&[gateway_id, group_id, &spec.name]),
            spec,
            ResponseObserved {
                response_id: detail.id,
                created_at: detail.create_time,
                updated_at: detail.update_time,
            },
        )
    }
}

#[async_trait]
impl Resource for ResponseResource {
    type Spec = ResponseSpec;
    type Observed = ResponseObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_response_v2";

    fn validate(&self, spec: &ResponseSpec) -> ApigwResult<()> {
        check_pattern(
            "name",
            &spec.name,
            &IDENTIFIER,
            "3 to 64 letters, digits or underscores starting with a letter",
        )?;
        for rule in spec.rules.values() {
            check_range("rules.status_code", rule.status_code, 200, 599)?;
            check_max_len("rules.body", &rule.body, 2048)?;
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &ResponseSpec, desired: &ResponseSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.group_id != desired.group_id {
            fields.push("group_id");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &ResponseSpec,
    ) -> ApigwResult<ResourceState<ResponseSpec, ResponseObserved>> {
        let body = ResponseBody {
            name: &spec.name,
            responses: to_wire(&spec.rules),
        };
        let created: ResponseDetail = ctx
            .client()
            .post(
                "create custom response",
                &Self::collection(&spec.gateway_id, &spec.group_id),
                &body,
            )
            .await?;
        info!(response = %created.id, group = %spec.group_id, "Custom response created");
        Ok(Self::into_state(&spec.gateway_id, &spec.group_id, created))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<ResponseSpec, ResponseObserved>,
    ) -> ApigwResult<Option<ResourceState<ResponseSpec, ResponseObserved>>> {
        let path = format!(
            "{}/{}",
            Self::collection(&state.spec.gateway_id, &state.spec.group_id),
            state.observed.response_id
        );
        let detail: Option<ResponseDetail> = ctx
            .client()
            .get("get custom response", &path, &[])
            .await
            .or_gone()?;
        Ok(detail.map(|detail| {
            Self::into_state(&state.spec.gateway_id, &state.spec.group_id, detail)
        }))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<ResponseSpec, ResponseObserved>,
        desired: &ResponseSpec,
    ) -> ApigwResult<ResourceState<ResponseSpec, ResponseObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let path = format!(
            "{}/{}",
            Self::collection(&desired.gateway_id, &desired.group_id),
            prior.observed.response_id
        );
        let body = ResponseBody {
            name: &desired.name,
            responses: to_wire(&desired.rules),
        };
        let updated: ResponseDetail = ctx
            .client()
            .put("update custom response", &path, &body)
            .await?;
        Ok(Self::into_state(&desired.gateway_id, &desired.group_id, updated))
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<ResponseSpec, ResponseObserved>,
    ) -> ApigwResult<()> {
        let path = format!(
            "{}/{}",
            Self::collection(&state.spec.gateway_id, &state.spec.group_id),
            state.observed.response_id
        );
        match ctx.client().delete("delete custom response", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<ResponseSpec, ResponseObserved>> {
        let [gateway_id, group_id, name] = parse_id(id, ["gateway_id", "group_id", "name"])?;
        let list: ResponseList = ctx
            .client()
            .get(
                "list custom responses",
                &Self::collection(&gateway_id, &group_id),
                &list_query(&[]),
            )
            .await?;
        list.responses
            .into_iter()
            .find(|response| response.name == name)
            .map(|detail| Self::into_state(&gateway_id, &group_id, detail))
            .ok_or_else(|| ApigwError::not_found("custom response", id))
    }
}
