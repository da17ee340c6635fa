//! Environment variables: a `(group, environment, name) -> value` binding.
//! Every attribute is immutable, so a change always means delete and create.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::apigw::validation::{check_max_len, check_pattern, IDENTIFIER};
use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{ensure_mutable, join_id, parse_id, OperationContext, Resource, ResourceState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVariableSpec {
    pub gateway_id: String,
    pub group_id: String,
    pub environment_id: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVariableObserved {
    pub variable_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VariableDetail {
    pub id: String,
    pub group_id: String,
    pub env_id: String,
    pub variable_name: String,
    #[serde(default)]
    pub variable_value: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct VariableBody<'a> {
    pub group_id: &'a str,
    pub env_id: &'a str,
    pub variable_name: &'a str,
    pub variable_value: &'a str,
}

#[derive(Debug, Deserialize)]
struct VariableList {
    #[serde(default)]
    variables: Vec<VariableDetail>,
}

/// List variables of a group, optionally narrowed to one environment or name
pub(crate) async fn list_variables(
    ctx: &OperationContext,
    gateway_id: &str,
    group_id: &str,
    env_id: &str,
    name: &str,
) -> ApigwResult<Vec<VariableDetail>> {
    let query = list_query(&[
        ("group_id", group_id),
        ("env_id", env_id),
        ("variable_name", name),
    ]);
    let list: VariableList = ctx
        .client()
        .get(
            "list environment variables",
            &ServiceClient::instance_path(gateway_id, "env-variables"),
            &query,
        )
        .await?;
    Ok(list.variables)
}

pub(crate) async fn create_variable(
    ctx: &OperationContext,
    gateway_id: &str,
    body: &VariableBody<'_>,
) -> ApigwResult<VariableDetail> {
    info!(group = body.group_id, env = body.env_id, name = body.variable_name, "Creating environment variable");
    ctx.client()
        .post(
            "create environment variable",
            &ServiceClient::instance_path(gateway_id, "env-variables"),
            body,
        )
        .await
}

pub(crate) async fn delete_variable(
    ctx: &OperationContext,
    gateway_id: &str,
    variable_id: &str,
) -> ApigwResult<()> {
    let path = ServiceClient::instance_path(gateway_id, &format!("env-variables/{}", variable_id));
    match ctx.client().delete("delete environment variable", &path).await {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

pub(crate) fn validate_variable_name(field: &str, name: &str) -> ApigwResult<()> {
    check_pattern(
        field,
        name,
        &IDENTIFIER,
        "3 to 64 letters, digits or underscores starting with a letter",
    )
}

pub struct EnvVariableResource;

impl EnvVariableResource {
    fn into_state(gateway_id: &str, detail: VariableDetail) -> ResourceState<EnvVariableSpec, EnvVariableObserved> {
        let spec = EnvVariableSpec {
            gateway_id: gateway_id.to_string(),
            group_id: detail.group_id,
            environment_id: detail.env_id,
            name: detail.variable_name,
            value: detail.variable_value,
        };
        let id = join_id(&[gateway_id, &spec.group_id, &spec.name]);
        ResourceState::new(id, spec, EnvVariableObserved { variable_id: detail.id })
    }
}

#[async_trait]
impl Resource for EnvVariableResource {
    type Spec = EnvVariableSpec;
    type Observed = EnvVariableObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_environment_variable_v2";

    fn validate(&self, spec: &EnvVariableSpec) -> ApigwResult<()> {
        validate_variable_name("name", &spec.name)?;
        check_max_len("value", &spec.value, 255)
    }

    fn replace_fields(&self, prior: &EnvVariableSpec, desired: &EnvVariableSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.group_id != desired.group_id {
            fields.push("group_id");
        }
        if prior.environment_id != desired.environment_id {
            fields.push("environment_id");
        }
        if prior.name != desired.name {
            fields.push("name");
        }
        if prior.value != desired.value {
            fields.push("value");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &EnvVariableSpec,
    ) -> ApigwResult<ResourceState<EnvVariableSpec, EnvVariableObserved>> {
        let body = VariableBody {
            group_id: &spec.group_id,
            env_id: &spec.environment_id,
            variable_name: &spec.name,
            variable_value: &spec.value,
        };
        let created = create_variable(ctx, &spec.gateway_id, &body).await?;
        Ok(Self::into_state(&spec.gateway_id, created))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<EnvVariableSpec, EnvVariableObserved>,
    ) -> ApigwResult<Option<ResourceState<EnvVariableSpec, EnvVariableObserved>>> {
        let path = ServiceClient::instance_path(
            &state.spec.gateway_id,
            &format!("env-variables/{}", state.observed.variable_id),
        );
        let detail: Option<VariableDetail> = ctx
            .client()
            .get("get environment variable", &path, &[])
            .await
            .or_gone()?;
        Ok(detail.map(|detail| Self::into_state(&state.spec.gateway_id, detail)))
    }

    async fn update(
        &self,
        _ctx: &OperationContext,
        prior: &ResourceState<EnvVariableSpec, EnvVariableObserved>,
        desired: &EnvVariableSpec,
    ) -> ApigwResult<ResourceState<EnvVariableSpec, EnvVariableObserved>> {
        ensure_mutable(&self.replace_fields(&prior.spec, desired))?;
        Ok(prior.clone())
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<EnvVariableSpec, EnvVariableObserved>,
    ) -> ApigwResult<()> {
        delete_variable(ctx, &state.spec.gateway_id, &state.observed.variable_id).await
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<EnvVariableSpec, EnvVariableObserved>> {
        let [gateway_id, group_id, name] = parse_id(id, ["gateway_id", "group_id", "name"])?;
        let mut matches: Vec<VariableDetail> = list_variables(ctx, &gateway_id, &group_id, "", &name)
            .await?
            .into_iter()
            .filter(|variable| variable.variable_name == name)
            .collect();

        match matches.len() {
            0 => Err(ApigwError::not_found("environment variable", id)),
            1 => Ok(Self::into_state(&gateway_id, matches.remove(0))),
            n => Err(ApigwError::validation(
                "id",
                format!("{} variables named '{}' exist in group {}", n, name, group_id),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> EnvVariableSpec {
        EnvVariableSpec {
            gateway_id: "gw".to_string(),
            group_id: "grp".to_string(),
            environment_id: "env".to_string(),
            name: "backend_host".to_string(),
            value: "10.0.0.1".to_string(),
        }
    }

    #[test]
    fn test_value_change_requires_replacement() {
        let mut desired = spec();
        desired.value = "10.0.0.2".to_string();
        assert_eq!(EnvVariableResource.replace_fields(&spec(), &desired), vec!["value"]);
    }

    #[test]
    fn test_state_id_uses_group_and_name() {
        let state = EnvVariableResource::into_state(
            "gw",
            VariableDetail {
                id: "v-1".to_string(),
                group_id: "grp".to_string(),
                env_id: "env".to_string(),
                variable_name: "backend_host".to_string(),
                variable_value: "10.0.0.1".to_string(),
            },
        );
        assert_eq!(state.id, "gw/grp/backend_host");
        assert_eq!(state.spec, spec());
        assert_eq!(state.observed.variable_id, "v-1");
    }

    #[test]
    fn test_name_rules() {
        let mut invalid = spec();
        invalid.name = "1st".to_string();
        assert!(EnvVariableResource.validate(&invalid).is_err());
    }
}
