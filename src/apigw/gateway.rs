//! # Gateway Instances
//!
//! The gateway is the compute/network unit every other APIGW object lives in.
//!
//! - Creation is asynchronous and tracked through the `progress` endpoint
//! - Attribute updates complete when the instance is `Running` again
//! - Egress (NAT EIP) bandwidth moves between disabled and enabled through
//!   three separate calls: enable, resize, disable

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::apigw::non_empty;
use crate::apigw::validation::{check_max_len, check_not_empty, check_pattern, GATEWAY_NAME};
use crate::client::ServiceClient;
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{OperationContext, Refresh, Resource, ResourceState, StateChangeConf};

/// Allowed maintenance window start times
pub const MAINTENANCE_STARTS: [&str; 6] = [
    "02:00:00", "06:00:00", "10:00:00", "14:00:00", "18:00:00", "22:00:00",
];

/// Instance states after which an update can never reach `Running`
const FATAL_STATES: [&str; 7] = [
    "InitingFailed",
    "RegisterFailed",
    "InstallFailed",
    "UpdateFailed",
    "RollbackFailed",
    "UnRegisterFailed",
    "RestartFail",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GatewayTier {
    Basic,
    Professional,
    Enterprise,
    Platinum,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerProvider {
    #[default]
    Lvs,
    Elb,
}

fn default_maintain_begin() -> String {
    "22:00:00".to_string()
}

/// User-authored gateway attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySpec {
    pub name: String,
    pub spec_id: GatewayTier,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub availability_zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Egress bandwidth in Mbit/s; 0 disables public egress
    #[serde(default)]
    pub bandwidth_size: u32,
    #[serde(default)]
    pub ingress_bandwidth_size: u32,
    #[serde(default)]
    pub loadbalancer_provider: LoadBalancerProvider,
    #[serde(default = "default_maintain_begin")]
    pub maintain_begin: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayObserved {
    pub status: String,
    pub maintain_end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpcep_service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    instance_name: &'a str,
    spec_id: GatewayTier,
    vpc_id: &'a str,
    subnet_id: &'a str,
    security_group_id: &'a str,
    available_zone_ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    maintain_begin: &'a str,
    maintain_end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bandwidth_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ingress_bandwidth_size: Option<u32>,
    loadbalancer_provider: LoadBalancerProvider,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    instance_name: &'a str,
    description: &'a str,
    security_group_id: &'a str,
    maintain_begin: &'a str,
    maintain_end: String,
}

#[derive(Debug, Serialize)]
struct EgressBody {
    bandwidth_size: u32,
}

#[derive(Debug, Deserialize)]
struct CreatedInstance {
    instance_id: String,
}

#[derive(Debug, Deserialize)]
struct Progress {
    #[serde(default)]
    progress: u32,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InstanceDetail {
    id: String,
    instance_name: String,
    #[serde(default)]
    status: String,
    spec: GatewayTier,
    vpc_id: String,
    subnet_id: String,
    security_group_id: String,
    #[serde(default)]
    available_zone_ids: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    bandwidth_size: u32,
    #[serde(default)]
    ingress_bandwidth_size: Option<u32>,
    #[serde(default)]
    loadbalancer_provider: LoadBalancerProvider,
    #[serde(default)]
    maintain_begin: String,
    #[serde(default)]
    maintain_end: String,
    #[serde(default)]
    eip_address: Option<String>,
    #[serde(default)]
    nat_eip_address: Option<String>,
    #[serde(default)]
    ingress_ip: Option<String>,
    #[serde(default)]
    vpcep_service_name: Option<String>,
    #[serde(default)]
    create_time: Option<String>,
}

/// Parse the bracketed availability-zone list returned by the service
///
/// `"[eu-de-01, eu-de-02]"` becomes `["eu-de-01", "eu-de-02"]`.
pub fn parse_availability_zones(raw: &str) -> ApigwResult<Vec<String>> {
    let inner: String = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if inner.is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|zone| {
            if zone.is_empty() {
                Err(ApigwError::validation(
                    "availability_zones",
                    format!("empty zone code in '{}'", raw),
                ))
            } else {
                Ok(zone.to_string())
            }
        })
        .collect()
}

/// Inverse of [`parse_availability_zones`]
pub fn format_availability_zones(zones: &[String]) -> String {
    format!("[{}]", zones.join(", "))
}

/// End of the four-hour maintenance window starting at `begin`
pub fn maintenance_end(begin: &str) -> ApigwResult<String> {
    if !MAINTENANCE_STARTS.contains(&begin) {
        return Err(ApigwError::validation(
            "maintain_begin",
            format!(
                "'{}' is not one of {}",
                begin,
                MAINTENANCE_STARTS.join(", ")
            ),
        ));
    }
    let start = NaiveTime::parse_from_str(begin, "%H:%M:%S")
        .map_err(|e| ApigwError::validation("maintain_begin", e.to_string()))?;
    let end = start + ChronoDuration::hours(4);
    Ok(end.format("%H:%M:%S").to_string())
}

/// Which egress call converges `old` onto `new`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressChange {
    None,
    Enable(u32),
    Resize(u32),
    Disable,
}

pub fn egress_change(old: u32, new: u32) -> EgressChange {
    match (old, new) {
        (a, b) if a == b => EgressChange::None,
        (0, size) => EgressChange::Enable(size),
        (_, 0) => EgressChange::Disable,
        (_, size) => EgressChange::Resize(size),
    }
}

pub struct GatewayResource;

impl GatewayResource {
    async fn fetch(ctx: &OperationContext, id: &str) -> ApigwResult<InstanceDetail> {
        ctx.client()
            .get("get gateway", &ServiceClient::instance_path(id, ""), &[])
            .await
    }

    fn into_state(detail: InstanceDetail) -> ApigwResult<ResourceState<GatewaySpec, GatewayObserved>> {
        let availability_zones = parse_availability_zones(&detail.available_zone_ids)?;
        let spec = GatewaySpec {
            name: detail.instance_name,
            spec_id: detail.spec,
            vpc_id: detail.vpc_id,
            subnet_id: detail.subnet_id,
            security_group_id: detail.security_group_id,
            availability_zones,
            description: non_empty(detail.description),
            bandwidth_size: detail.bandwidth_size,
            ingress_bandwidth_size: detail.ingress_bandwidth_size.unwrap_or_default(),
            loadbalancer_provider: detail.loadbalancer_provider,
            maintain_begin: detail.maintain_begin,
        };
        let observed = GatewayObserved {
            status: detail.status,
            maintain_end: detail.maintain_end,
            ingress_address: non_empty(detail.eip_address),
            egress_address: if spec.bandwidth_size > 0 {
                non_empty(detail.nat_eip_address)
            } else {
                None
            },
            private_address: non_empty(detail.ingress_ip),
            vpcep_service_name: non_empty(detail.vpcep_service_name),
            created_at: non_empty(detail.create_time),
        };
        Ok(ResourceState::new(detail.id, spec, observed))
    }

    async fn wait_for_creation(ctx: &OperationContext, id: &str) -> ApigwResult<()> {
        let path = ServiceClient::instance_path(id, "progress");
        let path = path.as_str();
        StateChangeConf::new("gateway creation", move || async move {
            let progress: Progress = ctx.client().get("get gateway progress", path, &[]).await?;
            debug!(gateway = id, progress = progress.progress, status = %progress.status, "Creation progress");
            let state = match progress.status.as_str() {
                "success" | "failed" => progress.status.clone(),
                _ => "creating".to_string(),
            };
            Ok(Refresh::found((), state))
        })
        .pending(["creating"])
        .target(["success"])
        .timeout(ctx.timeouts().gateway_create)
        .delay(ctx.polling().gateway_initial_delay)
        .min_interval(ctx.polling().gateway_interval)
        .wait_for_state(ctx.cancellation())
        .await
    }

    async fn wait_for_running(ctx: &OperationContext, id: &str) -> ApigwResult<()> {
        StateChangeConf::new("gateway update", move || async move {
            let detail = Self::fetch(ctx, id).await?;
            let state = if detail.status == "Running" || FATAL_STATES.contains(&detail.status.as_str()) {
                detail.status
            } else {
                "pending".to_string()
            };
            Ok(Refresh::found((), state))
        })
        .pending(["pending"])
        .target(["Running"])
        .timeout(ctx.timeouts().gateway_update)
        .delay(ctx.polling().gateway_initial_delay)
        .min_interval(ctx.polling().gateway_interval)
        .wait_for_state(ctx.cancellation())
        .await
    }

    async fn wait_for_deletion(ctx: &OperationContext, id: &str) -> ApigwResult<()> {
        StateChangeConf::new("gateway deletion", move || async move {
            let state = match Self::fetch(ctx, id).await.or_gone()? {
                Some(_) => "deleting",
                None => "deleted",
            };
            Ok(Refresh::found((), state))
        })
        .pending(["deleting"])
        .target(["deleted"])
        .timeout(ctx.timeouts().gateway_delete)
        .delay(ctx.polling().gateway_initial_delay)
        .min_interval(ctx.polling().gateway_interval)
        .wait_for_state(ctx.cancellation())
        .await
    }

    async fn apply_egress(ctx: &OperationContext, id: &str, old: u32, new: u32) -> ApigwResult<()> {
        let path = ServiceClient::instance_path(id, "nat-eip");
        match egress_change(old, new) {
            EgressChange::None => {}
            EgressChange::Enable(size) => {
                info!(gateway = id, bandwidth_size = size, "Enabling public egress");
                let _: serde_json::Value = ctx
                    .client()
                    .post("enable gateway egress", &path, &EgressBody { bandwidth_size: size })
                    .await?;
            }
            EgressChange::Resize(size) => {
                info!(gateway = id, bandwidth_size = size, "Resizing public egress");
                let _: serde_json::Value = ctx
                    .client()
                    .put("update gateway egress", &path, &EgressBody { bandwidth_size: size })
                    .await?;
            }
            EgressChange::Disable => {
                info!(gateway = id, "Disabling public egress");
                ctx.client().delete("disable gateway egress", &path).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for GatewayResource {
    type Spec = GatewaySpec;
    type Observed = GatewayObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_gateway_v2";

    fn validate(&self, spec: &GatewaySpec) -> ApigwResult<()> {
        check_pattern(
            "name",
            &spec.name,
            &GATEWAY_NAME,
            "3 to 64 letters, digits, hyphens or underscores starting with a letter",
        )?;
        check_not_empty("vpc_id", &spec.vpc_id)?;
        check_not_empty("subnet_id", &spec.subnet_id)?;
        check_not_empty("security_group_id", &spec.security_group_id)?;
        if spec.availability_zones.is_empty() {
            return Err(ApigwError::validation(
                "availability_zones",
                "at least one availability zone is required",
            ));
        }
        if let Some(zone) = spec
            .availability_zones
            .iter()
            .find(|zone| zone.is_empty() || zone.contains(',') || zone.contains(char::is_whitespace))
        {
            return Err(ApigwError::validation(
                "availability_zones",
                format!("'{}' must not be empty or contain commas or spaces", zone),
            ));
        }
        if let Some(description) = &spec.description {
            check_max_len("description", description, 255)?;
        }
        maintenance_end(&spec.maintain_begin)?;
        Ok(())
    }

    fn replace_fields(&self, prior: &GatewaySpec, desired: &GatewaySpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.spec_id != desired.spec_id {
            fields.push("spec_id");
        }
        if prior.vpc_id != desired.vpc_id {
            fields.push("vpc_id");
        }
        if prior.subnet_id != desired.subnet_id {
            fields.push("subnet_id");
        }
        if prior.availability_zones != desired.availability_zones {
            fields.push("availability_zones");
        }
        if prior.ingress_bandwidth_size != desired.ingress_bandwidth_size {
            fields.push("ingress_bandwidth_size");
        }
        if prior.loadbalancer_provider != desired.loadbalancer_provider {
            fields.push("loadbalancer_provider");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &GatewaySpec,
    ) -> ApigwResult<ResourceState<GatewaySpec, GatewayObserved>> {
        let body = CreateBody {
            instance_name: &spec.name,
            spec_id: spec.spec_id,
            vpc_id: &spec.vpc_id,
            subnet_id: &spec.subnet_id,
            security_group_id: &spec.security_group_id,
            available_zone_ids: &spec.availability_zones,
            description: spec.description.as_deref(),
            maintain_begin: &spec.maintain_begin,
            maintain_end: maintenance_end(&spec.maintain_begin)?,
            bandwidth_size: (spec.bandwidth_size > 0).then_some(spec.bandwidth_size),
            ingress_bandwidth_size: (spec.ingress_bandwidth_size > 0)
                .then_some(spec.ingress_bandwidth_size),
            loadbalancer_provider: spec.loadbalancer_provider,
        };
        let created: CreatedInstance = ctx
            .client()
            .post("create gateway", "instances", &body)
            .await?;
        info!(gateway = %created.instance_id, name = %spec.name, "Gateway creation submitted");

        Self::wait_for_creation(ctx, &created.instance_id).await?;
        let detail = Self::fetch(ctx, &created.instance_id).await?;
        Self::into_state(detail)
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<GatewaySpec, GatewayObserved>,
    ) -> ApigwResult<Option<ResourceState<GatewaySpec, GatewayObserved>>> {
        let Some(detail) = Self::fetch(ctx, &state.id).await.or_gone()? else {
            return Ok(None);
        };
        let mut fresh = Self::into_state(detail)?;
        // Older instances do not report the ingress size; keep what was applied.
        if fresh.spec.ingress_bandwidth_size == 0 {
            fresh.spec.ingress_bandwidth_size = state.spec.ingress_bandwidth_size;
        }
        Ok(Some(fresh))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<GatewaySpec, GatewayObserved>,
        desired: &GatewaySpec,
    ) -> ApigwResult<ResourceState<GatewaySpec, GatewayObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let id = prior.id.as_str();

        let attributes_changed = prior.spec.name != desired.name
            || prior.spec.description != desired.description
            || prior.spec.security_group_id != desired.security_group_id
            || prior.spec.maintain_begin != desired.maintain_begin;
        if attributes_changed {
            let body = UpdateBody {
                instance_name: &desired.name,
                description: desired.description.as_deref().unwrap_or_default(),
                security_group_id: &desired.security_group_id,
                maintain_begin: &desired.maintain_begin,
                maintain_end: maintenance_end(&desired.maintain_begin)?,
            };
            let _: serde_json::Value = ctx
                .client()
                .put("update gateway", &ServiceClient::instance_path(id, ""), &body)
                .await?;
            Self::wait_for_running(ctx, id).await?;
        }

        Self::apply_egress(ctx, id, prior.spec.bandwidth_size, desired.bandwidth_size).await?;

        let state = Resource::read(self, ctx, prior)
            .await?
            .ok_or_else(|| ApigwError::not_found("gateway", id))?;
        Ok(state)
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<GatewaySpec, GatewayObserved>,
    ) -> ApigwResult<()> {
        let path = ServiceClient::instance_path(&state.id, "");
        match ctx.client().delete("delete gateway", &path).await {
            Err(err) if err.is_not_found() => return Ok(()),
            other => other?,
        }
        Self::wait_for_deletion(ctx, &state.id).await
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<GatewaySpec, GatewayObserved>> {
        let detail = Self::fetch(ctx, id).await?;
        Self::into_state(detail)
    }
}
