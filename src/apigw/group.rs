//! # API Groups
//!
//! A group namespaces APIs and owns per-environment variables. Variables are
//! embedded in the group's spec as `environment id -> {name, value}` and are
//! fetched from the variable endpoint on READ. A changed value is a removal
//! plus an addition, since variables cannot be edited in place.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

use crate::apigw::env_variable::{
    create_variable, delete_variable, list_variables, validate_variable_name, VariableBody,
};
use crate::apigw::non_empty;
use crate::apigw::validation::{check_max_len, check_range};
use crate::client::ServiceClient;
use crate::core::error::{ApigwResult, NotFoundExt};
use crate::framework::{
    diff_sets, join_id, parse_id, require_found, OperationContext, Resource, ResourceState,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub gateway_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Variables keyed by environment id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environments: BTreeMap<String, BTreeSet<GroupVariable>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupObserved {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct GroupBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remark: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GroupDetail {
    id: String,
    name: String,
    #[serde(default)]
    remark: Option<String>,
    #[serde(default)]
    register_time: Option<String>,
    #[serde(default)]
    update_time: Option<String>,
}

/// One variable flattened with its environment, the unit of reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopedVariable {
    env_id: String,
    name: String,
    value: String,
}

fn flatten(environments: &BTreeMap<String, BTreeSet<GroupVariable>>) -> Vec<ScopedVariable> {
    environments
        .iter()
        .flat_map(|(env_id, variables)| {
            variables.iter().map(move |variable| ScopedVariable {
                env_id: env_id.clone(),
                name: variable.name.clone(),
                value: variable.value.clone(),
            })
        })
        .collect()
}

pub struct GroupResource;

impl GroupResource {
    fn group_path(gateway_id: &str, group_id: &str) -> String {
        ServiceClient::instance_path(gateway_id, &format!("api-groups/{}", group_id))
    }

    async fn fetch(
        ctx: &OperationContext,
        gateway_id: &str,
        group_id: &str,
    ) -> ApigwResult<Option<ResourceState<GroupSpec, GroupObserved>>> {
        let detail: Option<GroupDetail> = ctx
            .client()
            .get("get group", &Self::group_path(gateway_id, group_id), &[])
            .await
            .or_gone()?;
        let Some(detail) = detail else {
            return Ok(None);
        };

        let mut environments: BTreeMap<String, BTreeSet<GroupVariable>> = BTreeMap::new();
        for variable in list_variables(ctx, gateway_id, &detail.id, "", "").await? {
            environments
                .entry(variable.env_id)
                .or_default()
                .insert(GroupVariable {
                    name: variable.variable_name,
                    value: variable.variable_value,
                });
        }

        let spec = GroupSpec {
            gateway_id: gateway_id.to_string(),
            name: detail.name,
            description: non_empty(detail.remark),
            environments,
        };
        let observed = GroupObserved {
            registered_at: non_empty(detail.register_time),
            updated_at: non_empty(detail.update_time),
        };
        Ok(Some(ResourceState::new(
            join_id(&[gateway_id, &detail.id]),
            spec,
            observed,
        )))
    }

    async fn create_variables(
        ctx: &OperationContext,
        gateway_id: &str,
        group_id: &str,
        variables: &[ScopedVariable],
    ) -> ApigwResult<()> {
        try_join_all(variables.iter().map(|variable| async move {
            let body = VariableBody {
                group_id,
                env_id: &variable.env_id,
                variable_name: &variable.name,
                variable_value: &variable.value,
            };
            create_variable(ctx, gateway_id, &body).await
        }))
        .await?;
        Ok(())
    }
}

fn group_id_of(state_id: &str) -> ApigwResult<String> {
    let [_, group_id] = parse_id(state_id, ["gateway_id", "id"])?;
    Ok(group_id)
}

#[async_trait]
impl Resource for GroupResource {
    type Spec = GroupSpec;
    type Observed = GroupObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_group_v2";

    fn validate(&self, spec: &GroupSpec) -> ApigwResult<()> {
        check_range("name", spec.name.chars().count(), 3, 64)?;
        if let Some(description) = &spec.description {
            check_max_len("description", description, 255)?;
        }
        for variable in spec.environments.values().flatten() {
            validate_variable_name("environments.name", &variable.name)?;
            check_max_len("environments.value", &variable.value, 255)?;
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &GroupSpec, desired: &GroupSpec) -> Vec<&'static str> {
        if prior.gateway_id != desired.gateway_id {
            vec!["gateway_id"]
        } else {
            Vec::new()
        }
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &GroupSpec,
    ) -> ApigwResult<ResourceState<GroupSpec, GroupObserved>> {
        let body = GroupBody {
            name: &spec.name,
            remark: spec.description.as_deref(),
        };
        let created: GroupDetail = ctx
            .client()
            .post(
                "create group",
                &ServiceClient::instance_path(&spec.gateway_id, "api-groups"),
                &body,
            )
            .await?;
        info!(group = %created.id, name = %spec.name, "Group created");

        Self::create_variables(ctx, &spec.gateway_id, &created.id, &flatten(&spec.environments))
            .await?;

        let fresh = Self::fetch(ctx, &spec.gateway_id, &created.id).await?;
        require_found(fresh, "group", &created.id)
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<GroupSpec, GroupObserved>,
    ) -> ApigwResult<Option<ResourceState<GroupSpec, GroupObserved>>> {
        Self::fetch(ctx, &state.spec.gateway_id, &group_id_of(&state.id)?).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<GroupSpec, GroupObserved>,
        desired: &GroupSpec,
    ) -> ApigwResult<ResourceState<GroupSpec, GroupObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let gateway_id = desired.gateway_id.as_str();
        let group_id = group_id_of(&prior.id)?;

        if prior.spec.name != desired.name || prior.spec.description != desired.description {
            let body = GroupBody {
                name: &desired.name,
                remark: desired.description.as_deref(),
            };
            let _: serde_json::Value = ctx
                .client()
                .put("update group", &Self::group_path(gateway_id, &group_id), &body)
                .await?;
        }

        let old = flatten(&prior.spec.environments);
        let new = flatten(&desired.environments);
        let diff = diff_sets(&old, &new);
        if !diff.removed.is_empty() {
            let server_ids: HashMap<(String, String), String> =
                list_variables(ctx, gateway_id, &group_id, "", "")
                    .await?
                    .into_iter()
                    .map(|variable| ((variable.env_id, variable.variable_name), variable.id))
                    .collect();
            let stale = diff.removed.iter().filter_map(|variable| {
                server_ids.get(&(variable.env_id.clone(), variable.name.clone()))
            });
            try_join_all(stale.map(|variable_id| delete_variable(ctx, gateway_id, variable_id)))
                .await?;
        }
        Self::create_variables(ctx, gateway_id, &group_id, &diff.added).await?;

        let fresh = Self::fetch(ctx, gateway_id, &group_id).await?;
        require_found(fresh, "group", &group_id)
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<GroupSpec, GroupObserved>,
    ) -> ApigwResult<()> {
        let path = Self::group_path(&state.spec.gateway_id, &group_id_of(&state.id)?);
        match ctx.client().delete("delete group", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<GroupSpec, GroupObserved>> {
        let [gateway_id, group_id] = parse_id(id, ["gateway_id", "id"])?;
        let fresh = Self::fetch(ctx, &gateway_id, &group_id).await?;
        require_found(fresh, "group", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeSet<GroupVariable> {
        pairs
            .iter()
            .map(|(name, value)| GroupVariable {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_value_change_is_remove_plus_add() {
        let mut old = BTreeMap::new();
        old.insert("env-1".to_string(), vars(&[("host", "a"), ("port", "80")]));
        let mut new = BTreeMap::new();
        new.insert("env-1".to_string(), vars(&[("host", "b"), ("port", "80")]));

        let old = flatten(&old);
        let new = flatten(&new);
        let diff = diff_sets(&old, &new);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].value, "a");
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].value, "b");
    }

    #[test]
    fn test_environments_serialize_as_map() {
        let mut environments = BTreeMap::new();
        environments.insert("env-1".to_string(), vars(&[("host", "a")]));
        let spec = GroupSpec {
            gateway_id: "gw".to_string(),
            name: "group_a".to_string(),
            description: None,
            environments,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["environments"]["env-1"][0]["name"], "host");
        assert!(value.get("description").is_none());
    }

    #[test]
    fn test_group_id_from_state_id() {
        assert_eq!(group_id_of("gw/grp-1").unwrap(), "grp-1");
        assert!(group_id_of("grp-1").is_err());
    }
}
