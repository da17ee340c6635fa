//! Access control policies: permit or deny lists of IP addresses, ranges or
//! account names, attached to published APIs through an association.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::info;

use crate::apigw::validation::{check_pattern, check_range, IDENTIFIER};
use crate::client::ServiceClient;
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{join_id, parse_id, OperationContext, Resource, ResourceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AclType {
    Permit,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Ip,
    Domain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclPolicySpec {
    pub gateway_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub acl_type: AclType,
    pub entity_type: EntityType,
    /// Comma-separated addresses, `a-b` ranges or domain names
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclPolicyObserved {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct AclBody<'a> {
    acl_name: &'a str,
    acl_type: AclType,
    acl_value: &'a str,
    entity_type: EntityType,
}

#[derive(Debug, Deserialize)]
struct AclDetail {
    id: String,
    acl_name: String,
    acl_type: AclType,
    acl_value: String,
    entity_type: EntityType,
    #[serde(default)]
    update_time: Option<String>,
}

/// Check one entry of an IP list: an address or an ascending `a-b` range
fn check_ip_entry(entry: &str) -> ApigwResult<()> {
    let parse = |raw: &str| {
        raw.trim().parse::<Ipv4Addr>().map_err(|_| {
            ApigwError::validation("value", format!("'{}' is not an IPv4 address", raw.trim()))
        })
    };
    match entry.split_once('-') {
        Some((start, end)) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(ApigwError::validation(
                    "value",
                    format!("range '{}' is descending", entry),
                ));
            }
            Ok(())
        }
        None => parse(entry).map(|_| ()),
    }
}

fn check_value(entity_type: EntityType, value: &str) -> ApigwResult<()> {
    let entries: Vec<&str> = value.split(',').map(str::trim).collect();
    if entries.iter().any(|entry| entry.is_empty()) {
        return Err(ApigwError::validation("value", "contains an empty entry"));
    }
    check_range("value", entries.len(), 1, 100)?;
    if entity_type == EntityType::Ip {
        for entry in entries {
            check_ip_entry(entry)?;
        }
    }
    Ok(())
}

pub struct AclPolicyResource;

impl AclPolicyResource {
    fn into_state(gateway_id: &str, detail: AclDetail) -> ResourceState<AclPolicySpec, AclPolicyObserved> {
        ResourceState::new(
            join_id(&[gateway_id, &detail.id]),
            AclPolicySpec {
                gateway_id: gateway_id.to_string(),
                name: detail.acl_name,
                acl_type: detail.acl_type,
                entity_type: detail.entity_type,
                value: detail.acl_value,
            },
            AclPolicyObserved {
                updated_at: detail.update_time,
            },
        )
    }

    fn body(spec: &AclPolicySpec) -> AclBody<'_> {
        AclBody {
            acl_name: &spec.name,
            acl_type: spec.acl_type,
            acl_value: &spec.value,
            entity_type: spec.entity_type,
        }
    }

    fn acl_path(gateway_id: &str, state_id: &str) -> ApigwResult<String> {
        let [_, acl_id] = parse_id(state_id, ["gateway_id", "id"])?;
        Ok(ServiceClient::instance_path(gateway_id, &format!("acls/{}", acl_id)))
    }
}

#[async_trait]
impl Resource for AclPolicyResource {
    type Spec = AclPolicySpec;
    type Observed = AclPolicyObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_acl_policy_v2";

    fn validate(&self, spec: &AclPolicySpec) -> ApigwResult<()> {
        check_pattern(
            "name",
            &spec.name,
            &IDENTIFIER,
            "3 to 64 letters, digits or underscores starting with a letter",
        )?;
        check_value(spec.entity_type, &spec.value)
    }

    fn replace_fields(&self, prior: &AclPolicySpec, desired: &AclPolicySpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.entity_type != desired.entity_type {
            fields.push("entity_type");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &AclPolicySpec,
    ) -> ApigwResult<ResourceState<AclPolicySpec, AclPolicyObserved>> {
        let created: AclDetail = ctx
            .client()
            .post(
                "create acl policy",
                &ServiceClient::instance_path(&spec.gateway_id, "acls"),
                &Self::body(spec),
            )
            .await?;
        info!(acl = %created.id, name = %spec.name, "ACL policy created");
        Ok(Self::into_state(&spec.gateway_id, created))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<AclPolicySpec, AclPolicyObserved>,
    ) -> ApigwResult<Option<ResourceState<AclPolicySpec, AclPolicyObserved>>> {
        let path = Self::acl_path(&state.spec.gateway_id, &state.id)?;
        let detail: Option<AclDetail> = ctx
            .client()
            .get("get acl policy", &path, &[])
            .await
            .or_gone()?;
        Ok(detail.map(|detail| Self::into_state(&state.spec.gateway_id, detail)))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<AclPolicySpec, AclPolicyObserved>,
        desired: &AclPolicySpec,
    ) -> ApigwResult<ResourceState<AclPolicySpec, AclPolicyObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let path = Self::acl_path(&desired.gateway_id, &prior.id)?;
        let updated: AclDetail = ctx
            .client()
            .put("update acl policy", &path, &Self::body(desired))
            .await?;
        Ok(Self::into_state(&desired.gateway_id, updated))
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<AclPolicySpec, AclPolicyObserved>,
    ) -> ApigwResult<()> {
        let path = Self::acl_path(&state.spec.gateway_id, &state.id)?;
        match ctx.client().delete("delete acl policy", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<AclPolicySpec, AclPolicyObserved>> {
        let [gateway_id, _] = parse_id(id, ["gateway_id", "id"])?;
        let path = Self::acl_path(&gateway_id, id)?;
        let detail: AclDetail = ctx.client().get("get acl policy", &path, &[]).await?;
        Ok(Self::into_state(&gateway_id, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_values() {
        assert!(check_value(EntityType::Ip, "10.0.0.1, 10.0.1.0-10.0.1.255").is_ok());
        assert!(check_value(EntityType::Ip, "10.0.1.255-10.0.1.0").is_err());
        assert!(check_value(EntityType::Ip, "example.com").is_err());
        assert!(check_value(EntityType::Ip, "10.0.0.1,,10.0.0.2").is_err());
    }

    #[test]
    fn test_domain_values_are_not_parsed_as_ip() {
        assert!(check_value(EntityType::Domain, "tenant-a,tenant-b").is_ok());
    }

    #[test]
    fn test_entity_type_is_immutable() {
        let prior = AclPolicySpec {
            gateway_id: "gw".to_string(),
            name: "acl_a".to_string(),
            acl_type: AclType::Permit,
            entity_type: EntityType::Ip,
            value: "10.0.0.1".to_string(),
        };
        let desired = AclPolicySpec {
            entity_type: EntityType::Domain,
            acl_type: AclType::Deny,
            ..prior.clone()
        };
        assert_eq!(
            AclPolicyResource.replace_fields(&prior, &desired),
            vec!["entity_type"]
        );
    }
}
