//! # VPC Channels
//!
//! A VPC channel is a load-balanced backend pool:
//!
//! - Members addressed either by IP (`host`) or by ECS instance (`id`/`name`)
//! - Optional member groups with weights and microservice labels
//! - Optional health check
//! - Optional microservice discovery through CCE workloads or CSE services
//!
//! The service canonicalises IP members by echoing the host as both id and
//! name. Member identity therefore collapses to the host when `id == name`
//! and to the instance id otherwise, so both shapes compare equal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use tracing::info;

use crate::apigw::non_empty;
use crate::apigw::validation::{check_max_len, check_range};
use crate::client::ServiceClient;
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{join_id, parse_id, require_found, OperationContext, Resource, ResourceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Ip,
    Instance,
}

impl MemberType {
    fn wire(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Instance => "ecs",
        }
    }

    fn from_wire(raw: &str) -> Self {
        match raw {
            "ecs" | "instance" => Self::Instance,
            _ => Self::Ip,
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_port() -> u16 {
    80
}

/// One backend of the pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelMember {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub is_backup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ChannelMember {
    /// Host for IP members, instance id for ECS members
    pub fn identity(&self) -> &str {
        if self.id.is_empty() || self.id == self.name {
            if self.host.is_empty() {
                &self.id
            } else {
                &self.host
            }
        } else {
            &self.id
        }
    }

    fn comparable(&self) -> (&str, u32, bool, Option<&str>, Option<u16>) {
        (
            self.identity(),
            self.weight,
            self.is_backup,
            self.group_name.as_deref(),
            self.port,
        )
    }
}

impl PartialEq for ChannelMember {
    fn eq(&self, other: &Self) -> bool {
        self.comparable() == other.comparable()
    }
}

impl Eq for ChannelMember {}

impl Hash for ChannelMember {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for ChannelMember {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelMember {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparable().cmp(&other.comparable())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberGroup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microservice_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microservice_port: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Health check of the pool
///
/// Equality works on the canonical form: the protocol is case-insensitive,
/// TCP checks ignore `path` and `method`, and HTTP(S) checks default the
/// method to `GET` the way the service does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(deserialize_with = "uppercase")]
    pub protocol: String,
    #[serde(default = "default_threshold")]
    pub threshold_normal: u32,
    #[serde(default = "default_threshold")]
    pub threshold_abnormal: u32,
    /// Seconds between two probes
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Probe timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_codes: Option<String>,
    #[serde(default)]
    pub enable_client_ssl: bool,
}

impl HealthCheck {
    fn is_tcp(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("TCP")
    }

    fn check_path(&self) -> Option<&str> {
        if self.is_tcp() {
            None
        } else {
            self.path.as_deref()
        }
    }

    fn check_method(&self) -> Option<String> {
        if self.is_tcp() {
            None
        } else {
            Some(
                self.method
                    .as_deref()
                    .unwrap_or(DEFAULT_HEALTH_METHOD)
                    .to_uppercase(),
            )
        }
    }

    /// Rewrite into the shape the service reports back
    fn canonical(mut self) -> Self {
        self.protocol = self.protocol.to_uppercase();
        self.path = self.check_path().map(str::to_string);
        self.method = self.check_method();
        self
    }
}

impl PartialEq for HealthCheck {
    fn eq(&self, other: &Self) -> bool {
        self.protocol.eq_ignore_ascii_case(&other.protocol)
            && self.threshold_normal == other.threshold_normal
            && self.threshold_abnormal == other.threshold_abnormal
            && self.interval == other.interval
            && self.timeout == other.timeout
            && self.check_path() == other.check_path()
            && self.check_method() == other.check_method()
            && self.port == other.port
            && self.http_codes == other.http_codes
            && self.enable_client_ssl == other.enable_client_ssl
    }
}

const DEFAULT_HEALTH_METHOD: &str = "GET";

fn uppercase<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(|raw| raw.to_uppercase())
}

fn default_threshold() -> u32 {
    2
}

fn default_interval() -> u32 {
    10
}

fn default_timeout() -> u32 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CceConfig {
    pub cluster_id: String,
    pub namespace: String,
    pub workload_type: String,
    pub workload_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CseConfig {
    pub engine_id: String,
    pub service_id: String,
}

/// Discovery source of a microservice channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Microservice {
    CceConfig(CceConfig),
    CseConfig(CseConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcChannelSpec {
    pub gateway_id: String,
    pub name: String,
    pub port: u16,
    /// 1 weighted round robin, 2 weighted least connections, 3 source hash, 4 URI hash
    #[serde(default = "default_balance_strategy")]
    pub balance_strategy: u8,
    pub member_type: MemberType,
    /// 1 server, 2 microservice
    #[serde(default = "default_channel_type")]
    pub channel_type: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub member_groups: Vec<MemberGroup>,
    #[serde(default)]
    pub members: BTreeSet<ChannelMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microservice: Option<Microservice>,
}

fn default_balance_strategy() -> u8 {
    1
}

fn default_channel_type() -> u8 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VpcChannelObserved {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    /// Health check status as reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

// Wire representation

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMember {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ecs_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ecs_name: Option<String>,
    #[serde(default = "default_weight")]
    weight: u32,
    #[serde(default)]
    is_backup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    member_group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireLabel {
    label_name: String,
    label_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMemberGroup {
    member_group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    member_group_remark: Option<String>,
    #[serde(default = "default_weight")]
    member_group_weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    microservice_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    microservice_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    microservice_labels: Vec<WireLabel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireHealthCheck {
    protocol: String,
    threshold_normal: u32,
    threshold_abnormal: u32,
    time_interval: u32,
    timeout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_code: Option<String>,
    #[serde(default)]
    enable_client_ssl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireCceInfo {
    cluster_id: String,
    namespace: String,
    workload_type: String,
    app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireCseInfo {
    engine_id: String,
    service_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMicroservice {
    service_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cce_info: Option<WireCceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cse_info: Option<WireCseInfo>,
}

#[derive(Debug, Serialize)]
struct ChannelBody {
    name: String,
    port: u16,
    balance_strategy: u8,
    member_type: &'static str,
    #[serde(rename = "type")]
    channel_type: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    member_groups: Vec<WireMemberGroup>,
    members: Vec<WireMember>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vpc_health_config: Option<WireHealthCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    microservice_info: Option<WireMicroservice>,
}

#[derive(Debug, Deserialize)]
struct ChannelDetail {
    id: String,
    name: String,
    port: u16,
    #[serde(default = "default_balance_strategy")]
    balance_strategy: u8,
    #[serde(default)]
    member_type: String,
    #[serde(rename = "type", default = "default_channel_type")]
    channel_type: u8,
    #[serde(default)]
    member_groups: Vec<WireMemberGroup>,
    #[serde(default)]
    vpc_health_config: Option<WireHealthCheck>,
    #[serde(default)]
    microservice_info: Option<WireMicroservice>,
    #[serde(default)]
    status: Option<i32>,
    #[serde(default)]
    create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemberList {
    #[serde(default)]
    members: Vec<WireMember>,
}

fn member_to_wire(member_type: MemberType, member: &ChannelMember) -> WireMember {
    let (host, ecs_id, ecs_name) = match member_type {
        MemberType::Ip => (Some(member.identity().to_string()), None, None),
        MemberType::Instance => (
            non_empty(Some(member.host.clone())),
            Some(member.id.clone()),
            Some(if member.name.is_empty() {
                member.id.clone()
            } else {
                member.name.clone()
            }),
        ),
    };
    WireMember {
        host,
        ecs_id,
        ecs_name,
        weight: member.weight,
        is_backup: member.is_backup,
        member_group_name: member.group_name.clone(),
        port: member.port,
    }
}

fn member_from_wire(member_type: MemberType, wire: WireMember) -> ChannelMember {
    let host = wire.host.unwrap_or_default();
    let (id, name) = match member_type {
        MemberType::Ip => (host.clone(), host.clone()),
        MemberType::Instance => (
            wire.ecs_id.unwrap_or_default(),
            wire.ecs_name.unwrap_or_default(),
        ),
    };
    ChannelMember {
        host,
        id,
        name,
        weight: wire.weight,
        is_backup: wire.is_backup,
        group_name: non_empty(wire.member_group_name),
        port: wire.port,
    }
}

fn group_to_wire(group: &MemberGroup) -> WireMemberGroup {
    WireMemberGroup {
        member_group_name: group.name.clone(),
        member_group_remark: group.description.clone(),
        member_group_weight: group.weight,
        microservice_version: group.microservice_version.clone(),
        microservice_port: group.microservice_port,
        microservice_labels: group
            .tags
            .iter()
            .map(|(key, value)| WireLabel {
                label_name: key.clone(),
                label_value: value.clone(),
            })
            .collect(),
    }
}

fn group_from_wire(wire: WireMemberGroup) -> MemberGroup {
    MemberGroup {
        name: wire.member_group_name,
        description: non_empty(wire.member_group_remark),
        weight: wire.member_group_weight,
        microservice_version: non_empty(wire.microservice_version),
        microservice_port: wire.microservice_port,
        tags: wire
            .microservice_labels
            .into_iter()
            .map(|label| (label.label_name, label.label_value))
            .collect(),
    }
}

fn health_to_wire(check: &HealthCheck) -> WireHealthCheck {
    let check = check.clone().canonical();
    WireHealthCheck {
        protocol: check.protocol,
        threshold_normal: check.threshold_normal,
        threshold_abnormal: check.threshold_abnormal,
        time_interval: check.interval,
        timeout: check.timeout,
        path: check.path,
        method: check.method,
        port: check.port,
        http_code: check.http_codes,
        enable_client_ssl: check.enable_client_ssl,
        status: None,
    }
}

fn health_from_wire(wire: WireHealthCheck) -> HealthCheck {
    HealthCheck {
        protocol: wire.protocol,
        threshold_normal: wire.threshold_normal,
        threshold_abnormal: wire.threshold_abnormal,
        interval: wire.time_interval,
        timeout: wire.timeout,
        path: non_empty(wire.path),
        method: non_empty(wire.method),
        port: wire.port.filter(|port| *port != 0),
        http_codes: non_empty(wire.http_code),
        enable_client_ssl: wire.enable_client_ssl,
    }
    .canonical()
}

fn microservice_to_wire(microservice: &Microservice) -> WireMicroservice {
    match microservice {
        Microservice::CceConfig(cce) => WireMicroservice {
            service_type: "CCE".to_string(),
            cce_info: Some(WireCceInfo {
                cluster_id: cce.cluster_id.clone(),
                namespace: cce.namespace.clone(),
                workload_type: cce.workload_type.clone(),
                app_name: cce.workload_name.clone(),
                label_key: cce.label_key.clone(),
                label_value: cce.label_value.clone(),
            }),
            cse_info: None,
        },
        Microservice::CseConfig(cse) => WireMicroservice {
            service_type: "CSE".to_string(),
            cce_info: None,
            cse_info: Some(WireCseInfo {
                engine_id: cse.engine_id.clone(),
                service_id: cse.service_id.clone(),
            }),
        },
    }
}

fn microservice_from_wire(wire: WireMicroservice) -> Option<Microservice> {
    if let Some(cce) = wire.cce_info {
        return Some(Microservice::CceConfig(CceConfig {
            cluster_id: cce.cluster_id,
            namespace: cce.namespace,
            workload_type: cce.workload_type,
            workload_name: cce.app_name,
            label_key: non_empty(cce.label_key),
            label_value: non_empty(cce.label_value),
        }));
    }
    wire.cse_info.map(|cse| {
        Microservice::CseConfig(CseConfig {
            engine_id: cse.engine_id,
            service_id: cse.service_id,
        })
    })
}

fn to_body(spec: &VpcChannelSpec) -> ChannelBody {
    ChannelBody {
        name: spec.name.clone(),
        port: spec.port,
        balance_strategy: spec.balance_strategy,
        member_type: spec.member_type.wire(),
        channel_type: spec.channel_type,
        member_groups: spec.member_groups.iter().map(group_to_wire).collect(),
        members: spec
            .members
            .iter()
            .map(|member| member_to_wire(spec.member_type, member))
            .collect(),
        vpc_health_config: spec.health_check.as_ref().map(health_to_wire),
        microservice_info: spec.microservice.as_ref().map(microservice_to_wire),
    }
}

pub struct VpcChannelResource;

impl VpcChannelResource {
    fn channel_path(gateway_id: &str, channel_id: &str) -> String {
        ServiceClient::instance_path(gateway_id, &format!("vpc-channels/{}", channel_id))
    }

    async fn fetch(
        ctx: &OperationContext,
        gateway_id: &str,
        channel_id: &str,
    ) -> ApigwResult<Option<ResourceState<VpcChannelSpec, VpcChannelObserved>>> {
        let path = Self::channel_path(gateway_id, channel_id);
        let detail: Option<ChannelDetail> = ctx
            .client()
            .get("get vpc channel", &path, &[])
            .await
            .or_gone()?;
        let Some(detail) = detail else {
            return Ok(None);
        };
        let members: MemberList = ctx
            .client()
            .get("list vpc channel members", &format!("{}/members", path), &[])
            .await?;

        let member_type = MemberType::from_wire(&detail.member_type);
        let health_status = detail
            .vpc_health_config
            .as_ref()
            .and_then(|check| check.status);
        let spec = VpcChannelSpec {
            gateway_id: gateway_id.to_string(),
            name: detail.name,
            port: detail.port,
            balance_strategy: detail.balance_strategy,
            member_type,
            channel_type: detail.channel_type,
            member_groups: detail.member_groups.into_iter().map(group_from_wire).collect(),
            members: members
                .members
                .into_iter()
                .map(|member| member_from_wire(member_type, member))
                .collect(),
            health_check: detail.vpc_health_config.map(health_from_wire),
            microservice: detail.microservice_info.and_then(microservice_from_wire),
        };
        Ok(Some(ResourceState::new(
            join_id(&[gateway_id, &detail.id]),
            spec,
            VpcChannelObserved {
                status: detail.status,
                health_status,
                created_at: non_empty(detail.create_time),
            },
        )))
    }
}

fn channel_id_of(state_id: &str) -> ApigwResult<String> {
    let [_, channel_id] = parse_id(state_id, ["gateway_id", "id"])?;
    Ok(channel_id)
}

#[async_trait]
impl Resource for VpcChannelResource {
    type Spec = VpcChannelSpec;
    type Observed = VpcChannelObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_vpc_channel_v2";

    fn validate(&self, spec: &VpcChannelSpec) -> ApigwResult<()> {
        check_range("name", spec.name.chars().count(), 3, 64)?;
        check_range("port", spec.port, 1, 65535)?;
        check_range("balance_strategy", spec.balance_strategy, 1, 4)?;
        check_range("channel_type", spec.channel_type, 1, 2)?;

        for group in &spec.member_groups {
            check_range("member_groups.weight", group.weight, 0, 100)?;
            if let Some(description) = &group.description {
                check_max_len("member_groups.description", description, 255)?;
            }
        }

        for member in &spec.members {
            check_range("members.weight", member.weight, 0, 10000)?;
            match spec.member_type {
                MemberType::Ip if member.host.is_empty() => {
                    return Err(ApigwError::validation(
                        "members.host",
                        "IP members must set host",
                    ));
                }
                MemberType::Instance if member.id.is_empty() => {
                    return Err(ApigwError::validation(
                        "members.id",
                        "instance members must set id",
                    ));
                }
                _ => {}
            }
            if let Some(group_name) = &member.group_name {
                if !spec.member_groups.iter().any(|group| &group.name == group_name) {
                    return Err(ApigwError::validation(
                        "members.group_name",
                        format!("member group '{}' is not defined", group_name),
                    ));
                }
            }
        }

        if let Some(check) = &spec.health_check {
            let protocol = check.protocol.to_uppercase();
            if !["TCP", "HTTP", "HTTPS"].contains(&protocol.as_str()) {
                return Err(ApigwError::validation(
                    "health_check.protocol",
                    format!("'{}' must be one of TCP, HTTP, HTTPS", check.protocol),
                ));
            }
            if !check.is_tcp() && check.path.as_deref().map_or(true, str::is_empty) {
                return Err(ApigwError::validation(
                    "health_check.path",
                    "HTTP and HTTPS health checks require a path",
                ));
            }
            check_range("health_check.threshold_normal", check.threshold_normal, 1, 10)?;
            check_range("health_check.threshold_abnormal", check.threshold_abnormal, 1, 10)?;
            check_range("health_check.interval", check.interval, 1, 300)?;
            check_range("health_check.timeout", check.timeout, 1, 30)?;
            if check.timeout >= check.interval {
                return Err(ApigwError::validation(
                    "health_check.timeout",
                    "must be shorter than the interval",
                ));
            }
        }

        if spec.channel_type == 2 && spec.microservice.is_none() {
            return Err(ApigwError::validation(
                "microservice",
                "microservice channels require a CCE or CSE configuration",
            ));
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &VpcChannelSpec, desired: &VpcChannelSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.member_type != desired.member_type {
            fields.push("member_type");
        }
        if prior.channel_type != desired.channel_type {
            fields.push("channel_type");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &VpcChannelSpec,
    ) -> ApigwResult<ResourceState<VpcChannelSpec, VpcChannelObserved>> {
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }

        let created: Created = ctx
            .client()
            .post(
                "create vpc channel",
                &ServiceClient::instance_path(&spec.gateway_id, "vpc-channels"),
                &to_body(spec),
            )
            .await?;
        info!(channel = %created.id, members = spec.members.len(), "VPC channel created");

        let fresh = Self::fetch(ctx, &spec.gateway_id, &created.id).await?;
        require_found(fresh, "vpc channel", &created.id)
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<VpcChannelSpec, VpcChannelObserved>,
    ) -> ApigwResult<Option<ResourceState<VpcChannelSpec, VpcChannelObserved>>> {
        Self::fetch(ctx, &state.spec.gateway_id, &channel_id_of(&state.id)?).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<VpcChannelSpec, VpcChannelObserved>,
        desired: &VpcChannelSpec,
    ) -> ApigwResult<ResourceState<VpcChannelSpec, VpcChannelObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let channel_id = channel_id_of(&prior.id)?;
        let _: serde_json::Value = ctx
            .client()
            .put(
                "update vpc channel",
                &Self::channel_path(&desired.gateway_id, &channel_id),
                &to_body(desired),
            )
            .await?;

        let fresh = Self::fetch(ctx, &desired.gateway_id, &channel_id).await?;
        require_found(fresh, "vpc channel", &channel_id)
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<VpcChannelSpec, VpcChannelObserved>,
    ) -> ApigwResult<()> {
        let path = Self::channel_path(&state.spec.gateway_id, &channel_id_of(&state.id)?);
        match ctx.client().delete("delete vpc channel", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<VpcChannelSpec, VpcChannelObserved>> {
        let [gateway_id, channel_id] = parse_id(id, ["gateway_id", "id"])?;
        let fresh = Self::fetch(ctx, &gateway_id, &channel_id).await?;
        require_found(fresh, "vpc channel", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::Plan;
    use serde_json::json;

    fn host_member(host: &str) -> ChannelMember {
        ChannelMember {
            host: host.to_string(),
            weight: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_host_member_matches_canonical_form() {
        let configured = host_member("10.0.0.1");
        let returned = member_from_wire(
            MemberType::Ip,
            serde_json::from_value(json!({"host": "10.0.0.1", "weight": 1})).unwrap(),
        );
        assert_eq!(returned.id, "10.0.0.1");
        assert_eq!(returned.name, "10.0.0.1");
        assert_eq!(configured, returned);

        let configured: BTreeSet<_> = [configured].into_iter().collect();
        let returned: BTreeSet<_> = [returned].into_iter().collect();
        assert_eq!(configured, returned);
    }

    #[test]
    fn test_instance_member_identity_is_id() {
        let member = ChannelMember {
            host: "192.168.0.10".to_string(),
            id: "ecs-1".to_string(),
            name: "web-1".to_string(),
            weight: 1,
            ..Default::default()
        };
        assert_eq!(member.identity(), "ecs-1");

        let wire = member_to_wire(MemberType::Instance, &member);
        assert_eq!(wire.ecs_id.as_deref(), Some("ecs-1"));
        assert_eq!(wire.ecs_name.as_deref(), Some("web-1"));
    }

    #[test]
    fn test_weight_change_is_detected() {
        let mut heavier = host_member("10.0.0.1");
        heavier.weight = 5;
        assert_ne!(host_member("10.0.0.1"), heavier);
    }

    fn spec() -> VpcChannelSpec {
        VpcChannelSpec {
            gateway_id: "gw".to_string(),
            name: "channel_a".to_string(),
            port: 8080,
            balance_strategy: 1,
            member_type: MemberType::Ip,
            channel_type: 1,
            member_groups: Vec::new(),
            members: [host_member("10.0.0.1")].into_iter().collect(),
            health_check: Some(HealthCheck {
                protocol: "http".to_string(),
                threshold_normal: 2,
                threshold_abnormal: 2,
                interval: 10,
                timeout: 5,
                path: Some("/health".to_string()),
                method: Some("GET".to_string()),
                port: None,
                http_codes: Some("200".to_string()),
                enable_client_ssl: false,
            }),
            microservice: None,
        }
    }

    #[test]
    fn test_body_uppercases_health_protocol() {
        let body = serde_json::to_value(to_body(&spec())).unwrap();
        assert_eq!(body["vpc_health_config"]["protocol"], "HTTP");
        assert_eq!(body["member_type"], "ip");
        assert_eq!(body["type"], 1);
        assert_eq!(body["members"][0]["host"], "10.0.0.1");
    }

    #[test]
    fn test_lowercase_protocol_settles_after_read_back() {
        let desired = spec();
        let returned = health_from_wire(health_to_wire(desired.health_check.as_ref().unwrap()));
        assert_eq!(returned.protocol, "HTTP");

        let mut observed = desired.clone();
        observed.health_check = Some(returned);
        let state = ResourceState::new("gw/ch-1", observed, VpcChannelObserved::default());
        assert!(VpcChannelResource.validate(&desired).is_ok());
        assert_eq!(VpcChannelResource.plan(Some(&state), &desired), Plan::NoOp);
    }

    #[test]
    fn test_server_filled_health_fields_do_not_drift() {
        let mut tcp = spec();
        if let Some(check) = tcp.health_check.as_mut() {
            check.protocol = "tcp".to_string();
            check.path = None;
            check.method = None;
        }
        // The service reports a method and a root path even for TCP checks.
        let returned = health_from_wire(
            serde_json::from_value(json!({
                "protocol": "TCP",
                "threshold_normal": 2,
                "threshold_abnormal": 2,
                "time_interval": 10,
                "timeout": 5,
                "path": "/",
                "method": "GET",
                "port": 0,
                "http_code": "200",
                "status": 1
            }))
            .unwrap(),
        );
        assert_eq!(tcp.health_check.as_ref(), Some(&returned));

        let mut http = spec();
        if let Some(check) = http.health_check.as_mut() {
            check.method = None;
        }
        let returned = health_from_wire(health_to_wire(http.health_check.as_ref().unwrap()));
        assert_eq!(returned.method.as_deref(), Some("GET"));
        assert_eq!(http.health_check.as_ref(), Some(&returned));
    }

    #[test]
    fn test_http_check_requires_path() {
        let mut invalid = spec();
        if let Some(check) = invalid.health_check.as_mut() {
            check.path = None;
        }
        let err = VpcChannelResource.validate(&invalid).unwrap_err();
        assert!(err.to_string().contains("health_check.path"));
    }

    #[test]
    fn test_member_group_must_exist() {
        let mut invalid = spec();
        let mut member = host_member("10.0.0.2");
        member.group_name = Some("missing".to_string());
        invalid.members.insert(member);
        let err = VpcChannelResource.validate(&invalid).unwrap_err();
        assert!(err.to_string().contains("members.group_name"));
        assert!(VpcChannelResource.validate(&spec()).is_ok());
    }

    #[test]
    fn test_microservice_is_exactly_one_variant() {
        let microservice: Microservice = serde_json::from_value(json!({
            "cse_config": {"engine_id": "e-1", "service_id": "s-1"}
        }))
        .unwrap();
        let wire = microservice_to_wire(&microservice);
        assert_eq!(wire.service_type, "CSE");
        assert_eq!(microservice_from_wire(wire), Some(microservice));
    }
}
