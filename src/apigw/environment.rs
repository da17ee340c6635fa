//! Environments are named publish targets. The service has no get-by-id call
//! for them, so READ and import both go through the filtered list.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::apigw::non_empty;
use crate::apigw::validation::{check_max_len, check_pattern, IDENTIFIER};
use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult};
use crate::framework::{join_id, parse_id, OperationContext, Resource, ResourceState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub gateway_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentObserved {
    pub environment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct EnvironmentBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remark: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct EnvironmentDetail {
    id: String,
    name: String,
    #[serde(default)]
    remark: Option<String>,
    #[serde(default)]
    create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvironmentList {
    #[serde(default)]
    envs: Vec<EnvironmentDetail>,
}

pub struct EnvironmentResource;

impl EnvironmentResource {
    async fn list(
        ctx: &OperationContext,
        gateway_id: &str,
        name: &str,
    ) -> ApigwResult<Vec<EnvironmentDetail>> {
        let list: EnvironmentList = ctx
            .client()
            .get(
                "list environments",
                &ServiceClient::instance_path(gateway_id, "envs"),
                &list_query(&[("name", name)]),
            )
            .await?;
        Ok(list.envs)
    }

    fn into_state(
        gateway_id: &str,
        detail: EnvironmentDetail,
    ) -> ResourceState<EnvironmentSpec, EnvironmentObserved> {
        let id = join_id(&[gateway_id, &detail.name]);
        ResourceState::new(
            id,
            EnvironmentSpec {
                gateway_id: gateway_id.to_string(),
                name: detail.name,
                description: non_empty(detail.remark),
            },
            EnvironmentObserved {
                environment_id: detail.id,
                created_at: non_empty(detail.create_time),
            },
        )
    }

    fn env_path(gateway_id: &str, env_id: &str) -> String {
        ServiceClient::instance_path(gateway_id, &format!("envs/{}", env_id))
    }
}

#[async_trait]
impl Resource for EnvironmentResource {
    type Spec = EnvironmentSpec;
    type Observed = EnvironmentObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_environment_v2";

    fn validate(&self, spec: &EnvironmentSpec) -> ApigwResult<()> {
        check_pattern(
            "name",
            &spec.name,
            &IDENTIFIER,
            "3 to 64 letters, digits or underscores starting with a letter",
        )?;
        if let Some(description) = &spec.description {
            check_max_len("description", description, 255)?;
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &EnvironmentSpec, desired: &EnvironmentSpec) -> Vec<&'static str> {
        if prior.gateway_id != desired.gateway_id {
            vec!["gateway_id"]
        } else {
            Vec::new()
        }
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &EnvironmentSpec,
    ) -> ApigwResult<ResourceState<EnvironmentSpec, EnvironmentObserved>> {
        let body = EnvironmentBody {
            name: &spec.name,
            remark: spec.description.as_deref(),
        };
        let created: EnvironmentDetail = ctx
            .client()
            .post(
                "create environment",
                &ServiceClient::instance_path(&spec.gateway_id, "envs"),
                &body,
            )
            .await?;
        info!(environment = %created.id, name = %created.name, "Environment created");
        Ok(Self::into_state(&spec.gateway_id, created))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<EnvironmentSpec, EnvironmentObserved>,
    ) -> ApigwResult<Option<ResourceState<EnvironmentSpec, EnvironmentObserved>>> {
        // Listed without a name filter: a rename outside of this resource
        // must still be found by id.
        let found = Self::list(ctx, &state.spec.gateway_id, "")
            .await?
            .into_iter()
            .find(|env| env.id == state.observed.environment_id);
        Ok(found.map(|detail| Self::into_state(&state.spec.gateway_id, detail)))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<EnvironmentSpec, EnvironmentObserved>,
        desired: &EnvironmentSpec,
    ) -> ApigwResult<ResourceState<EnvironmentSpec, EnvironmentObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let body = EnvironmentBody {
            name: &desired.name,
            remark: desired.description.as_deref(),
        };
        let updated: EnvironmentDetail = ctx
            .client()
            .put(
                "update environment",
                &Self::env_path(&desired.gateway_id, &prior.observed.environment_id),
                &body,
            )
            .await?;
        Ok(Self::into_state(&desired.gateway_id, updated))
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<EnvironmentSpec, EnvironmentObserved>,
    ) -> ApigwResult<()> {
        let path = Self::env_path(&state.spec.gateway_id, &state.observed.environment_id);
        match ctx.client().delete("delete environment", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<EnvironmentSpec, EnvironmentObserved>> {
        let [gateway_id, name] = parse_id(id, ["gateway_id", "name"])?;
        Self::list(ctx, &gateway_id, &name)
            .await?
            .into_iter()
            .find(|env| env.name == name)
            .map(|detail| Self::into_state(&gateway_id, detail))
            .ok_or_else(|| ApigwError::not_found("environment", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        let spec = EnvironmentSpec {
            gateway_id: "gw".to_string(),
            name: "DEV".to_string(),
            description: None,
        };
        assert!(EnvironmentResource.validate(&spec).is_ok());

        let invalid = EnvironmentSpec {
            name: "dev-stage".to_string(),
            ..spec
        };
        let err = EnvironmentResource.validate(&invalid).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_state_id_is_gateway_and_name() {
        let state = EnvironmentResource::into_state(
            "gw",
            EnvironmentDetail {
                id: "env-1".to_string(),
                name: "DEV".to_string(),
                remark: Some(String::new()),
                create_time: None,
            },
        );
        assert_eq!(state.id, "gw/DEV");
        assert_eq!(state.observed.environment_id, "env-1");
        assert_eq!(state.spec.description, None);
    }
}
