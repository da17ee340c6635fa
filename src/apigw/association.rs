//! # Policy Associations
//!
//! ACL policies, throttling policies and signature keys are attached to
//! published APIs through bindings. All three share one reconciler over the
//! set of `publish_ids`; they differ in endpoint names and in whether the
//! binding is synchronous. Binding ids are never kept in state: removals
//! list the current bindings of the policy and unbind by the matching id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use tracing::{debug, info};

use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult};
use crate::framework::{
    diff_sets, join_id, parse_id, require_found, OperationContext, Refresh, Resource,
    ResourceState, StateChangeConf,
};

/// Endpoint layout of one binding family
pub trait BindingKind: Send + Sync + 'static {
    const TYPE_NAME: &'static str;
    /// Human-readable policy kind, used in logs and errors
    const POLICY: &'static str;
    /// Collection below the gateway, e.g. `acl-bindings`
    const COLLECTION: &'static str;
    /// Field naming the policy in the bind request
    const BIND_FIELD: &'static str;
    /// Query parameter filtering bound APIs by policy
    const FILTER: &'static str;
    /// Whether bind/unbind must be awaited through the listings
    const POLLS: bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AclBinding;

impl BindingKind for AclBinding {
    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_acl_policy_associate_v2";
    const POLICY: &'static str = "acl policy";
    const COLLECTION: &'static str = "acl-bindings";
    const BIND_FIELD: &'static str = "acl_id";
    const FILTER: &'static str = "acl_id";
    const POLLS: bool = false;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThrottlingBinding;

impl BindingKind for ThrottlingBinding {
    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_throttling_policy_associate_v2";
    const POLICY: &'static str = "throttling policy";
    const COLLECTION: &'static str = "throttle-bindings";
    const BIND_FIELD: &'static str = "strategy_id";
    const FILTER: &'static str = "throttle_id";
    const POLLS: bool = false;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureBinding;

impl BindingKind for SignatureBinding {
    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_signature_associate_v2";
    const POLICY: &'static str = "signature key";
    const COLLECTION: &'static str = "sign-bindings";
    const BIND_FIELD: &'static str = "sign_id";
    const FILTER: &'static str = "sign_id";
    const POLLS: bool = true;
}

pub type AclAssociation = PolicyAssociation<AclBinding>;
pub type ThrottlingAssociation = PolicyAssociation<ThrottlingBinding>;
pub type SignatureAssociation = PolicyAssociation<SignatureBinding>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationSpec {
    pub gateway_id: String,
    pub policy_id: String,
    pub publish_ids: BTreeSet<String>,
}

/// One binding as listed by the service
#[derive(Debug, Clone, Deserialize)]
struct BoundApi {
    publish_id: String,
    #[serde(alias = "throttle_apply_id", alias = "binding_id")]
    bind_id: String,
}

#[derive(Debug, Deserialize)]
struct BoundList {
    #[serde(default, alias = "bindings")]
    apis: Vec<BoundApi>,
}

#[derive(Debug, Deserialize)]
struct UnboundApi {
    publish_id: String,
}

#[derive(Debug, Deserialize)]
struct UnboundList {
    #[serde(default)]
    apis: Vec<UnboundApi>,
}

/// Association between one policy and a set of published APIs
pub struct PolicyAssociation<K> {
    kind: PhantomData<K>,
}

impl<K> Default for PolicyAssociation<K> {
    fn default() -> Self {
        Self { kind: PhantomData }
    }
}

impl<K: BindingKind> PolicyAssociation<K> {
    fn collection(gateway_id: &str) -> String {
        ServiceClient::instance_path(gateway_id, K::COLLECTION)
    }

    async fn bound(ctx: &OperationContext, spec: &AssociationSpec) -> ApigwResult<Vec<BoundApi>> {
        let list: BoundList = ctx
            .client()
            .get(
                "list bound apis",
                &format!("{}/binded-apis", Self::collection(&spec.gateway_id)),
                &list_query(&[(K::FILTER, &spec.policy_id)]),
            )
            .await?;
        Ok(list.apis)
    }

    async fn unbound(ctx: &OperationContext, spec: &AssociationSpec) -> ApigwResult<Vec<String>> {
        let list: UnboundList = ctx
            .client()
            .get(
                "list unbound apis",
                &format!("{}/unbinded-apis", Self::collection(&spec.gateway_id)),
                &list_query(&[(K::FILTER, &spec.policy_id)]),
            )
            .await?;
        Ok(list.apis.into_iter().map(|api| api.publish_id).collect())
    }

    async fn bind(ctx: &OperationContext, spec: &AssociationSpec, publish_ids: &[String]) -> ApigwResult<()> {
        if publish_ids.is_empty() {
            return Ok(());
        }
        info!(policy = K::POLICY, policy_id = %spec.policy_id, count = publish_ids.len(), "Binding published APIs");
        let mut body = serde_json::Map::new();
        body.insert(K::BIND_FIELD.to_string(), serde_json::Value::from(spec.policy_id.clone()));
        body.insert("publish_ids".to_string(), serde_json::to_value(publish_ids)?);
        let _: serde_json::Value = ctx
            .client()
            .post("bind policy", &Self::collection(&spec.gateway_id), &body)
            .await?;
        Ok(())
    }

    async fn unbind(ctx: &OperationContext, spec: &AssociationSpec, publish_ids: &[String]) -> ApigwResult<()> {
        if publish_ids.is_empty() {
            return Ok(());
        }
        let bind_ids: HashMap<String, String> = Self::bound(ctx, spec)
            .await?
            .into_iter()
            .map(|bound| (bound.publish_id, bound.bind_id))
            .collect();
        for publish_id in publish_ids {
            let Some(bind_id) = bind_ids.get(publish_id) else {
                debug!(policy = K::POLICY, publish_id = %publish_id, "Binding already gone");
                continue;
            };
            let path = format!("{}/{}", Self::collection(&spec.gateway_id), bind_id);
            match ctx.client().delete("unbind policy", &path).await {
                Err(err) if err.is_not_found() => {}
                other => other?,
            }
        }
        Ok(())
    }

    async fn wait_bound(ctx: &OperationContext, spec: &AssociationSpec, publish_ids: &[String]) -> ApigwResult<()> {
        if !K::POLLS || publish_ids.is_empty() {
            return Ok(());
        }
        StateChangeConf::new(format!("{} binding", K::POLICY), move || async move {
            let unbound = Self::unbound(ctx, spec).await?;
            let pending = publish_ids.iter().any(|id| unbound.contains(id));
            Ok(Refresh::found((), if pending { "PENDING" } else { "COMPLETED" }))
        })
        .pending(["PENDING"])
        .target(["COMPLETED"])
        .timeout(ctx.timeouts().binding)
        .min_interval(ctx.polling().binding_interval)
        .wait_for_state(ctx.cancellation())
        .await
    }

    async fn wait_unbound(ctx: &OperationContext, spec: &AssociationSpec, publish_ids: &[String]) -> ApigwResult<()> {
        if !K::POLLS || publish_ids.is_empty() {
            return Ok(());
        }
        StateChangeConf::new(format!("{} unbinding", K::POLICY), move || async move {
            let bound = Self::bound(ctx, spec).await?;
            let pending = bound.iter().any(|api| publish_ids.contains(&api.publish_id));
            Ok(Refresh::found((), if pending { "PENDING" } else { "COMPLETED" }))
        })
        .pending(["PENDING"])
        .target(["COMPLETED"])
        .timeout(ctx.timeouts().binding)
        .min_interval(ctx.polling().binding_interval)
        .wait_for_state(ctx.cancellation())
        .await
    }

    fn state_id(spec: &AssociationSpec) -> String {
        join_id(&[&spec.gateway_id, &spec.policy_id])
    }

    async fn fetch(
        ctx: &OperationContext,
        spec: &AssociationSpec,
    ) -> ApigwResult<Option<ResourceState<AssociationSpec, ()>>> {
        let publish_ids: BTreeSet<String> = Self::bound(ctx, spec)
            .await?
            .into_iter()
            .map(|bound| bound.publish_id)
            .collect();
        if publish_ids.is_empty() {
            return Ok(None);
        }
        let spec = AssociationSpec {
            publish_ids,
            ..spec.clone()
        };
        Ok(Some(ResourceState::new(Self::state_id(&spec), spec, ())))
    }
}

#[async_trait]
impl<K: BindingKind> Resource for PolicyAssociation<K> {
    type Spec = AssociationSpec;
    type Observed = ();

    const TYPE_NAME: &'static str = K::TYPE_NAME;

    fn validate(&self, spec: &AssociationSpec) -> ApigwResult<()> {
        if spec.publish_ids.is_empty() {
            return Err(ApigwError::validation(
                "publish_ids",
                "at least one published API is required",
            ));
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &AssociationSpec, desired: &AssociationSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.policy_id != desired.policy_id {
            fields.push("policy_id");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &AssociationSpec,
    ) -> ApigwResult<ResourceState<AssociationSpec, ()>> {
        let publish_ids: Vec<String> = spec.publish_ids.iter().cloned().collect();
        Self::bind(ctx, spec, &publish_ids).await?;
        Self::wait_bound(ctx, spec, &publish_ids).await?;

        let fresh = Self::fetch(ctx, spec).await?;
        require_found(fresh, K::POLICY, &Self::state_id(spec))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<AssociationSpec, ()>,
    ) -> ApigwResult<Option<ResourceState<AssociationSpec, ()>>> {
        Self::fetch(ctx, &state.spec).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<AssociationSpec, ()>,
        desired: &AssociationSpec,
    ) -> ApigwResult<ResourceState<AssociationSpec, ()>> {
        self.guard_update(&prior.spec, desired)?;
        let diff = diff_sets(&prior.spec.publish_ids, &desired.publish_ids);

        Self::unbind(ctx, desired, &diff.removed).await?;
        Self::bind(ctx, desired, &diff.added).await?;
        Self::wait_unbound(ctx, desired, &diff.removed).await?;
        Self::wait_bound(ctx, desired, &diff.added).await?;

        let fresh = Self::fetch(ctx, desired).await?;
        require_found(fresh, K::POLICY, &Self::state_id(desired))
    }

    async fn delete(&self, ctx: &OperationContext, state: &ResourceState<AssociationSpec, ()>) -> ApigwResult<()> {
        let publish_ids: Vec<String> = state.spec.publish_ids.iter().cloned().collect();
        Self::unbind(ctx, &state.spec, &publish_ids).await?;
        Self::wait_unbound(ctx, &state.spec, &publish_ids).await
    }

    async fn import(&self, ctx: &OperationContext, id: &str) -> ApigwResult<ResourceState<AssociationSpec, ()>> {
        let [gateway_id, policy_id] = parse_id(id, ["gateway_id", "policy_id"])?;
        let lookup = AssociationSpec {
            gateway_id,
            policy_id,
            publish_ids: BTreeSet::new(),
        };
        let fresh = Self::fetch(ctx, &lookup).await?;
        require_found(fresh, K::POLICY, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_list_accepts_each_family() {
        let acl: BoundList = serde_json::from_value(serde_json::json!({
            "apis": [{"publish_id": "p-1", "bind_id": "b-1", "api_name": "x"}]
        }))
        .unwrap();
        assert_eq!(acl.apis[0].bind_id, "b-1");

        let throttle: BoundList = serde_json::from_value(serde_json::json!({
            "apis": [{"publish_id": "p-1", "throttle_apply_id": "t-1"}]
        }))
        .unwrap();
        assert_eq!(throttle.apis[0].bind_id, "t-1");

        let sign: BoundList = serde_json::from_value(serde_json::json!({
            "bindings": [{"publish_id": "p-1", "binding_id": "s-1"}]
        }))
        .unwrap();
        assert_eq!(sign.apis[0].bind_id, "s-1");
    }

    #[test]
    fn test_type_names_are_distinct() {
        assert_ne!(AclAssociation::TYPE_NAME, ThrottlingAssociation::TYPE_NAME);
        assert_ne!(ThrottlingAssociation::TYPE_NAME, SignatureAssociation::TYPE_NAME);
        assert!(SignatureBinding::POLLS);
        assert!(!AclBinding::POLLS);
    }

    #[test]
    fn test_policy_change_forces_replacement() {
        let prior = AssociationSpec {
            gateway_id: "gw".to_string(),
            policy_id: "acl-1".to_string(),
            publish_ids: ["p-1".to_string()].into_iter().collect(),
        };
        let desired = AssociationSpec {
            policy_id: "acl-2".to_string(),
            ..prior.clone()
        };
        assert_eq!(
            AclAssociation::default().replace_fields(&prior, &desired),
            vec!["policy_id"]
        );
        assert_eq!(AclAssociation::state_id(&prior), "gw/acl-1");
    }
}
