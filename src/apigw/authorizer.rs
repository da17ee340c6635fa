//! Function-backed custom authorizers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::apigw::non_empty;
use crate::apigw::validation::{check_pattern, check_range, IDENTIFIER, PARAM_NAME};
use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{join_id, parse_id, OperationContext, Resource, ResourceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthorizerType {
    Frontend,
    Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdentityLocation {
    Header,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub location: IdentityLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizerSpec {
    pub gateway_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub authorizer_type: AuthorizerType,
    pub function_urn: String,
    #[serde(default)]
    pub is_body_send: bool,
    /// Cache lifetime of the authorizer result in seconds
    #[serde(default)]
    pub cache_age: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<Identity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizerObserved {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuthorizerBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    authorizer_type: AuthorizerType,
    #[serde(rename = "authorizer_type")]
    backing: &'static str,
    authorizer_uri: &'a str,
    need_body: bool,
    ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<&'a str>,
    identities: &'a [Identity],
}

#[derive(Debug, Deserialize)]
struct AuthorizerDetail {
    id: String,
    name: String,
    #[serde(rename = "type")]
    authorizer_type: AuthorizerType,
    authorizer_uri: String,
    #[serde(default)]
    need_body: bool,
    #[serde(default)]
    ttl: u32,
    #[serde(default)]
    user_data: Option<String>,
    #[serde(default)]
    identities: Vec<Identity>,
    #[serde(default)]
    create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorizerList {
    #[serde(default)]
    authorizers: Vec<AuthorizerDetail>,
}

pub struct AuthorizerResource;

impl AuthorizerResource {
    fn into_state(
        gateway_id: &str,
        detail: AuthorizerDetail,
    ) -> ResourceState<AuthorizerSpec, AuthorizerObserved> {
        let identities = detail
            .identities
            .into_iter()
            .map(|identity| Identity {
                validation: non_empty(identity.validation),
                ..identity
            })
            .collect();
        ResourceState::new(
            join_id(&[gateway_id, &detail.id]),
            AuthorizerSpec {
                gateway_id: gateway_id.to_string(),
                name: detail.name,
                authorizer_type: detail.authorizer_type,
                function_urn: detail.authorizer_uri,
                is_body_send: detail.need_body,
                cache_age: detail.ttl,
                user_data: non_empty(detail.user_data),
                identities,
            },
            AuthorizerObserved {
                created_at: non_empty(detail.create_time),
            },
        )
    }

    fn body(spec: &AuthorizerSpec) -> AuthorizerBody<'_> {
        AuthorizerBody {
            name: &spec.name,
            authorizer_type: spec.authorizer_type,
            backing: "FUNC",
            authorizer_uri: &spec.function_urn,
            need_body: spec.is_body_send,
            ttl: spec.cache_age,
            user_data: spec.user_data.as_deref(),
            identities: &spec.identities,
        }
    }

    fn authorizer_path(gateway_id: &str, state_id: &str) -> ApigwResult<String> {
        let [_, authorizer_id] = parse_id(state_id, ["gateway_id", "id"])?;
        Ok(ServiceClient::instance_path(
            gateway_id,
            &format!("authorizers/{}", authorizer_id),
        ))
    }
}

#[async_trait]
impl Resource for AuthorizerResource {
    type Spec = AuthorizerSpec;
    type Observed = AuthorizerObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_custom_authorizer_v2";

    fn validate(&self, spec: &AuthorizerSpec) -> ApigwResult<()> {
        check_pattern(
            "name",
            &spec.name,
            &IDENTIFIER,
            "3 to 64 letters, digits or underscores starting with a letter",
        )?;
        check_range("cache_age", spec.cache_age, 0, 3600)?;
        if !spec.identities.is_empty() && spec.authorizer_type != AuthorizerType::Frontend {
            return Err(ApigwError::validation(
                "identities",
                "identities are only supported by FRONTEND authorizers",
            ));
        }
        for identity in &spec.identities {
            check_pattern(
                "identities.name",
                &identity.name,
                &PARAM_NAME,
                "letters, digits, hyphens, underscores or periods starting with a letter",
            )?;
            if let Some(validation) = &identity.validation {
                regex::Regex::new(validation).map_err(|e| {
                    ApigwError::validation("identities.validation", e.to_string())
                })?;
            }
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &AuthorizerSpec, desired: &AuthorizerSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.authorizer_type != desired.authorizer_type {
            fields.push("type");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &AuthorizerSpec,
    ) -> ApigwResult<ResourceState<AuthorizerSpec, AuthorizerObserved>> {
        let created: AuthorizerDetail = ctx
            .client()
            .post(
                "create authorizer",
                &ServiceClient::instance_path(&spec.gateway_id, "authorizers"),
                &Self::body(spec),
            )
            .await?;
        info!(authorizer = %created.id, name = %spec.name, "Custom authorizer created");
        Ok(Self::into_state(&spec.gateway_id, created))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<AuthorizerSpec, AuthorizerObserved>,
    ) -> ApigwResult<Option<ResourceState<AuthorizerSpec, AuthorizerObserved>>> {
        let path = Self::authorizer_path(&state.spec.gateway_id, &state.id)?;
        let detail: Option<AuthorizerDetail> = ctx
            .client()
            .get("get authorizer", &path, &[])
            .await
            .or_gone()?;
        Ok(detail.map(|detail| Self::into_state(&state.spec.gateway_id, detail)))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<AuthorizerSpec, AuthorizerObserved>,
        desired: &AuthorizerSpec,
    ) -> ApigwResult<ResourceState<AuthorizerSpec, AuthorizerObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let path = Self::authorizer_path(&desired.gateway_id, &prior.id)?;
        let updated: AuthorizerDetail = ctx
            .client()
            .put("update authorizer", &path, &Self::body(desired))
            .await?;
        Ok(Self::into_state(&desired.gateway_id, updated))
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<AuthorizerSpec, AuthorizerObserved>,
    ) -> ApigwResult<()> {
        let path = Self::authorizer_path(&state.spec.gateway_id, &state.id)?;
        match ctx.client().delete("delete authorizer", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<AuthorizerSpec, AuthorizerObserved>> {
        let [gateway_id, name] = parse_id(id, ["gateway_id", "name"])?;
        let list: AuthorizerList = ctx
            .client()
            .get(
                "list authorizers",
                &ServiceClient::instance_path(&gateway_id, "authorizers"),
                &list_query(&[("name", &name)]),
            )
            .await?;
        // The name filter is not guaranteed to be exact.
        list.authorizers
            .into_iter()
            .find(|detail| detail.name == name)
            .map(|detail| Self::into_state(&gateway_id, detail))
            .ok_or_else(|| {
                ApigwError::not_found("authorizer", format!("no authorizer named '{}' in {}", name, gateway_id))
            })
    }
}
