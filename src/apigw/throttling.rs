//! # Throttling Policies
//!
//! A throttling policy caps request rates over a period. Besides the global
//! limits it owns two sets of special throttles (per user, per application)
//! with their own server-assigned ids, reconciled entry by entry:
//!
//! - same object, new limit: updated in place
//! - object no longer configured: deleted by id
//! - new object: created

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::apigw::non_empty;
use crate::apigw::validation::{check_max_len, check_pattern, check_range, IDENTIFIER};
use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{join_id, parse_id, require_found, OperationContext, Resource, ResourceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeriodUnit {
    Second,
    Minute,
    Hour,
    Day,
}

/// Whether limits apply to each API separately or to all bound APIs together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyScope {
    #[default]
    ApiBased,
    ApiShared,
}

impl PolicyScope {
    fn code(self) -> u8 {
        match self {
            Self::ApiBased => 1,
            Self::ApiShared => 2,
        }
    }

    fn from_code(code: u8) -> Self {
        if code == 2 {
            Self::ApiShared
        } else {
            Self::ApiBased
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpecialKind {
    User,
    App,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpecialThrottle {
    pub throttling_object_id: String,
    pub max_api_requests: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottlingPolicySpec {
    pub gateway_id: String,
    pub name: String,
    pub period: u32,
    pub period_unit: PeriodUnit,
    pub max_api_requests: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_app_requests: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_user_requests: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ip_requests: Option<u32>,
    #[serde(rename = "type", default)]
    pub scope: PolicyScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub user_throttles: BTreeSet<SpecialThrottle>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub app_throttles: BTreeSet<SpecialThrottle>,
}

impl ThrottlingPolicySpec {
    fn specials(&self, kind: SpecialKind) -> &BTreeSet<SpecialThrottle> {
        match kind {
            SpecialKind::User => &self.user_throttles,
            SpecialKind::App => &self.app_throttles,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThrottlingPolicyObserved {
    /// Special throttle ids keyed by throttled user id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_throttle_ids: BTreeMap<String, String>,
    /// Special throttle ids keyed by throttled application id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub app_throttle_ids: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ThrottlingPolicyObserved {
    fn special_ids(&self, kind: SpecialKind) -> &BTreeMap<String, String> {
        match kind {
            SpecialKind::User => &self.user_throttle_ids,
            SpecialKind::App => &self.app_throttle_ids,
        }
    }
}

#[derive(Debug, Serialize)]
struct ThrottleBody<'a> {
    name: &'a str,
    time_interval: u32,
    time_unit: PeriodUnit,
    api_call_limits: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_call_limits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_call_limits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_call_limits: Option<u32>,
    #[serde(rename = "type")]
    scope: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    remark: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ThrottleDetail {
    id: String,
    name: String,
    time_interval: u32,
    time_unit: PeriodUnit,
    api_call_limits: u32,
    #[serde(default)]
    app_call_limits: Option<u32>,
    #[serde(default)]
    user_call_limits: Option<u32>,
    #[serde(default)]
    ip_call_limits: Option<u32>,
    #[serde(rename = "type", default)]
    scope: u8,
    #[serde(default)]
    remark: Option<String>,
    #[serde(default)]
    create_time: Option<String>,
}

#[derive(Debug, Serialize)]
struct SpecialBody<'a> {
    call_limits: u32,
    object_id: &'a str,
    object_type: SpecialKind,
}

#[derive(Debug, Serialize)]
struct SpecialLimitBody {
    call_limits: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct SpecialDetail {
    id: String,
    call_limits: u32,
    object_id: String,
    object_type: SpecialKind,
}

#[derive(Debug, Deserialize)]
struct SpecialList {
    #[serde(default)]
    throttle_specials: Vec<SpecialDetail>,
}

/// Calls needed to converge one kind of special throttles
#[derive(Debug, Default, PartialEq, Eq)]
struct SpecialPlan {
    create: Vec<SpecialThrottle>,
    /// (special id, new limit)
    update: Vec<(String, u32)>,
    /// Special ids
    delete: Vec<String>,
}

fn plan_specials(
    current: &BTreeMap<String, (String, u32)>,
    desired: &BTreeSet<SpecialThrottle>,
) -> SpecialPlan {
    let mut plan = SpecialPlan::default();
    for entry in desired {
        match current.get(&entry.throttling_object_id) {
            Some((special_id, limit)) if *limit != entry.max_api_requests => {
                plan.update.push((special_id.clone(), entry.max_api_requests));
            }
            Some(_) => {}
            None => plan.create.push(entry.clone()),
        }
    }
    for (object_id, (special_id, _)) in current {
        if !desired.iter().any(|entry| &entry.throttling_object_id == object_id) {
            plan.delete.push(special_id.clone());
        }
    }
    plan
}

pub struct ThrottlingPolicyResource;

impl ThrottlingPolicyResource {
    fn throttle_path(gateway_id: &str, throttle_id: &str) -> String {
        ServiceClient::instance_path(gateway_id, &format!("throttles/{}", throttle_id))
    }

    fn body(spec: &ThrottlingPolicySpec) -> ThrottleBody<'_> {
        ThrottleBody {
            name: &spec.name,
            time_interval: spec.period,
            time_unit: spec.period_unit,
            api_call_limits: spec.max_api_requests,
            app_call_limits: spec.max_app_requests,
            user_call_limits: spec.max_user_requests,
            ip_call_limits: spec.max_ip_requests,
            scope: spec.scope.code(),
            remark: spec.description.as_deref(),
        }
    }

    async fn list_specials(
        ctx: &OperationContext,
        gateway_id: &str,
        throttle_id: &str,
    ) -> ApigwResult<Vec<SpecialDetail>> {
        let list: SpecialList = ctx
            .client()
            .get(
                "list special throttles",
                &format!("{}/throttle-specials", Self::throttle_path(gateway_id, throttle_id)),
                &list_query(&[]),
            )
            .await?;
        Ok(list.throttle_specials)
    }

    async fn fetch(
        ctx: &OperationContext,
        gateway_id: &str,
        throttle_id: &str,
    ) -> ApigwResult<Option<ResourceState<ThrottlingPolicySpec, ThrottlingPolicyObserved>>> {
        let detail: Option<ThrottleDetail> = ctx
            .client()
            .get("get throttling policy", &Self::throttle_path(gateway_id, throttle_id), &[])
            .await
            .or_gone()?;
        let Some(detail) = detail else {
            return Ok(None);
        };

        let mut spec = ThrottlingPolicySpec {
            gateway_id: gateway_id.to_string(),
            name: detail.name,
            period: detail.time_interval,
            period_unit: detail.time_unit,
            max_api_requests: detail.api_call_limits,
            max_app_requests: detail.app_call_limits.filter(|limit| *limit > 0),
            max_user_requests: detail.user_call_limits.filter(|limit| *limit > 0),
            max_ip_requests: detail.ip_call_limits.filter(|limit| *limit > 0),
            scope: PolicyScope::from_code(detail.scope),
            description: non_empty(detail.remark),
            user_throttles: BTreeSet::new(),
            app_throttles: BTreeSet::new(),
        };
        let mut observed = ThrottlingPolicyObserved {
            created_at: non_empty(detail.create_time),
            ..Default::default()
        };

        for special in Self::list_specials(ctx, gateway_id, &detail.id).await? {
            let entry = SpecialThrottle {
                throttling_object_id: special.object_id.clone(),
                max_api_requests: special.call_limits,
            };
            match special.object_type {
                SpecialKind::User => {
                    spec.user_throttles.insert(entry);
                    observed.user_throttle_ids.insert(special.object_id, special.id);
                }
                SpecialKind::App => {
                    spec.app_throttles.insert(entry);
                    observed.app_throttle_ids.insert(special.object_id, special.id);
                }
            }
        }

        Ok(Some(ResourceState::new(
            join_id(&[gateway_id, &detail.id]),
            spec,
            observed,
        )))
    }

    /// Converge one kind of special throttles; `current` maps object id to (special id, limit)
    async fn reconcile_specials(
        ctx: &OperationContext,
        gateway_id: &str,
        throttle_id: &str,
        kind: SpecialKind,
        current: &BTreeMap<String, (String, u32)>,
        desired: &BTreeSet<SpecialThrottle>,
    ) -> ApigwResult<()> {
        let plan = plan_specials(current, desired);
        let base = format!("{}/throttle-specials", Self::throttle_path(gateway_id, throttle_id));
        debug!(
            throttle = throttle_id,
            ?kind,
            create = plan.create.len(),
            update = plan.update.len(),
            delete = plan.delete.len(),
            "Reconciling special throttles"
        );

        for special_id in &plan.delete {
            match ctx
                .client()
                .delete("delete special throttle", &format!("{}/{}", base, special_id))
                .await
            {
                Err(err) if err.is_not_found() => {}
                other => other?,
            }
        }
        for (special_id, limit) in &plan.update {
            let _: serde_json::Value = ctx
                .client()
                .put(
                    "update special throttle",
                    &format!("{}/{}", base, special_id),
                    &SpecialLimitBody { call_limits: *limit },
                )
                .await?;
        }
        for entry in &plan.create {
            let body = SpecialBody {
                call_limits: entry.max_api_requests,
                object_id: &entry.throttling_object_id,
                object_type: kind,
            };
            let _: SpecialDetail = ctx
                .client()
                .post("create special throttle", &base, &body)
                .await?;
        }
        Ok(())
    }

    /// Current specials of one kind, preferring ids already in state
    fn current_specials(
        spec: &ThrottlingPolicySpec,
        observed: &ThrottlingPolicyObserved,
        kind: SpecialKind,
    ) -> Option<BTreeMap<String, (String, u32)>> {
        let ids = observed.special_ids(kind);
        spec.specials(kind)
            .iter()
            .map(|entry| {
                ids.get(&entry.throttling_object_id).map(|special_id| {
                    (
                        entry.throttling_object_id.clone(),
                        (special_id.clone(), entry.max_api_requests),
                    )
                })
            })
            .collect()
    }
}

fn throttle_id_of(state_id: &str) -> ApigwResult<String> {
    let [_, throttle_id] = parse_id(state_id, ["gateway_id", "id"])?;
    Ok(throttle_id)
}

#[async_trait]
impl Resource for ThrottlingPolicyResource {
    type Spec = ThrottlingPolicySpec;
    type Observed = ThrottlingPolicyObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_throttling_policy_v2";

    fn validate(&self, spec: &ThrottlingPolicySpec) -> ApigwResult<()> {
        check_pattern(
            "name",
            &spec.name,
            &IDENTIFIER,
            "3 to 64 letters, digits or underscores starting with a letter",
        )?;
        check_range("period", spec.period, 1, 99_999)?;
        check_range("max_api_requests", spec.max_api_requests, 1, 2_147_483_647)?;
        for (field, limit) in [
            ("max_app_requests", spec.max_app_requests),
            ("max_user_requests", spec.max_user_requests),
            ("max_ip_requests", spec.max_ip_requests),
        ] {
            if let Some(limit) = limit {
                if limit > spec.max_api_requests {
                    return Err(ApigwError::validation(
                        field,
                        "must not exceed max_api_requests",
                    ));
                }
            }
        }
        if let Some(description) = &spec.description {
            check_max_len("description", description, 255)?;
        }
        for (field, specials) in [
            ("user_throttles", &spec.user_throttles),
            ("app_throttles", &spec.app_throttles),
        ] {
            let mut objects = BTreeSet::new();
            for entry in specials {
                if !objects.insert(&entry.throttling_object_id) {
                    return Err(ApigwError::validation(
                        field,
                        format!("'{}' is listed twice", entry.throttling_object_id),
                    ));
                }
                check_range(field, entry.max_api_requests, 1, spec.max_api_requests)?;
            }
        }
        Ok(())
    }

    fn replace_fields(
        &self,
        prior: &ThrottlingPolicySpec,
        desired: &ThrottlingPolicySpec,
    ) -> Vec<&'static str> {
        if prior.gateway_id != desired.gateway_id {
            vec!["gateway_id"]
        } else {
            Vec::new()
        }
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &ThrottlingPolicySpec,
    ) -> ApigwResult<ResourceState<ThrottlingPolicySpec, ThrottlingPolicyObserved>> {
        let created: ThrottleDetail = ctx
            .client()
            .post(
                "create throttling policy",
                &ServiceClient::instance_path(&spec.gateway_id, "throttles"),
                &Self::body(spec),
            )
            .await?;
        info!(throttle = %created.id, name = %spec.name, "Throttling policy created");

        let empty = BTreeMap::new();
        for kind in [SpecialKind::User, SpecialKind::App] {
            Self::reconcile_specials(
                ctx,
                &spec.gateway_id,
                &created.id,
                kind,
                &empty,
                spec.specials(kind),
            )
            .await?;
        }

        let fresh = Self::fetch(ctx, &spec.gateway_id, &created.id).await?;
        require_found(fresh, "throttling policy", &created.id)
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<ThrottlingPolicySpec, ThrottlingPolicyObserved>,
    ) -> ApigwResult<Option<ResourceState<ThrottlingPolicySpec, ThrottlingPolicyObserved>>> {
        Self::fetch(ctx, &state.spec.gateway_id, &throttle_id_of(&state.id)?).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<ThrottlingPolicySpec, ThrottlingPolicyObserved>,
        desired: &ThrottlingPolicySpec,
    ) -> ApigwResult<ResourceState<ThrottlingPolicySpec, ThrottlingPolicyObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let gateway_id = desired.gateway_id.as_str();
        let throttle_id = throttle_id_of(&prior.id)?;

        let base_changed = ThrottlingPolicySpec {
            user_throttles: BTreeSet::new(),
            app_throttles: BTreeSet::new(),
            ..prior.spec.clone()
        } != ThrottlingPolicySpec {
            user_throttles: BTreeSet::new(),
            app_throttles: BTreeSet::new(),
            ..desired.clone()
        };
        if base_changed {
            let _: ThrottleDetail = ctx
                .client()
                .put(
                    "update throttling policy",
                    &Self::throttle_path(gateway_id, &throttle_id),
                    &Self::body(desired),
                )
                .await?;
        }

        for kind in [SpecialKind::User, SpecialKind::App] {
            if prior.spec.specials(kind) == desired.specials(kind) {
                continue;
            }
            let current = match Self::current_specials(&prior.spec, &prior.observed, kind) {
                Some(current) => current,
                None => Self::list_specials(ctx, gateway_id, &throttle_id)
                    .await?
                    .into_iter()
                    .filter(|special| special.object_type == kind)
                    .map(|special| (special.object_id, (special.id, special.call_limits)))
                    .collect(),
            };
            Self::reconcile_specials(
                ctx,
                gateway_id,
                &throttle_id,
                kind,
                &current,
                desired.specials(kind),
            )
            .await?;
        }

        let fresh = Self::fetch(ctx, gateway_id, &throttle_id).await?;
        require_found(fresh, "throttling policy", &throttle_id)
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<ThrottlingPolicySpec, ThrottlingPolicyObserved>,
    ) -> ApigwResult<()> {
        let path = Self::throttle_path(&state.spec.gateway_id, &throttle_id_of(&state.id)?);
        match ctx.client().delete("delete throttling policy", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<ThrottlingPolicySpec, ThrottlingPolicyObserved>> {
        let [gateway_id, throttle_id] = parse_id(id, ["gateway_id", "id"])?;
        let fresh = Self::fetch(ctx, &gateway_id, &throttle_id).await?;
        require_found(fresh, "throttling policy", id)
    }
}
