//! # API Publishment
//!
//! Publishing exposes an API in one environment. Every publish creates a new
//! version; exactly one version per (API, environment) is live at a time.
//!
//! - without `version_id` the current draft is published (`online`)
//! - with `version_id` the named version must already exist and is switched
//!   to when it is not live yet
//! - a description may not be attached to an existing version silently:
//!   pinning a version with a different description, or re-publishing with a
//!   description that an older version already carries, is rejected
//! - delete takes the API offline; the version history stays on the service

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::apigw::api::publish_id_of;
use crate::apigw::non_empty;
use crate::apigw::validation::check_max_len;
use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{join_id, parse_id, require_found, OperationContext, Resource, ResourceState};

/// History status of the live version
pub const LIVE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishmentSpec {
    pub gateway_id: String,
    pub environment_id: String,
    pub api_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Pin an existing version instead of publishing the draft
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// One entry of the version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedVersion {
    pub version_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
    pub status: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishmentObserved {
    #[serde(default)]
    pub publish_id: String,
    /// Newest first
    #[serde(default)]
    pub history: Vec<PublishedVersion>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum PublishAction {
    Online,
    Offline,
}

#[derive(Debug, Serialize)]
struct PublishBody<'a> {
    action: PublishAction,
    env_id: &'a str,
    api_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remark: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct VersionRecord {
    version_id: String,
    #[serde(default)]
    remark: Option<String>,
    #[serde(default)]
    publish_time: Option<String>,
    #[serde(default)]
    status: i32,
}

#[derive(Debug, Deserialize)]
struct VersionList {
    #[serde(default)]
    api_versions: Vec<VersionRecord>,
}

impl From<VersionRecord> for PublishedVersion {
    fn from(record: VersionRecord) -> Self {
        Self {
            version_id: record.version_id,
            description: non_empty(record.remark),
            publish_time: non_empty(record.publish_time),
            status: record.status,
        }
    }
}

fn live_version(history: &[PublishedVersion]) -> Option<&PublishedVersion> {
    history.iter().find(|version| version.status == LIVE)
}

/// Version `version_id` checked against the desired description
fn pinned_version<'a>(
    history: &'a [PublishedVersion],
    version_id: &str,
    description: Option<&str>,
) -> ApigwResult<&'a PublishedVersion> {
    let version = history
        .iter()
        .find(|version| version.version_id == version_id)
        .ok_or_else(|| ApigwError::not_found("api version", version_id))?;
    if let Some(description) = description {
        if version.description.as_deref() != Some(description) {
            return Err(ApigwError::validation(
                "description",
                format!(
                    "version {} is described as '{}'; a pinned version cannot be relabelled",
                    version_id,
                    version.description.as_deref().unwrap_or_default()
                ),
            ));
        }
    }
    Ok(version)
}

/// A new version may not reuse an existing version's description
fn ensure_fresh_description(history: &[PublishedVersion], description: Option<&str>) -> ApigwResult<()> {
    let Some(description) = description else {
        return Ok(());
    };
    match history
        .iter()
        .find(|version| version.description.as_deref() == Some(description))
    {
        Some(existing) => Err(ApigwError::conflict(format!(
            "version {} is already described as '{}'; pin it with version_id instead",
            existing.version_id, description
        ))),
        None => Ok(()),
    }
}

pub struct PublishmentResource;

impl PublishmentResource {
    async fn history(ctx: &OperationContext, spec: &PublishmentSpec) -> ApigwResult<Vec<PublishedVersion>> {
        let list: Option<VersionList> = ctx
            .client()
            .get(
                "list api versions",
                &ServiceClient::instance_path(&spec.gateway_id, &format!("apis/publish/{}", spec.api_id)),
                &list_query(&[("env_id", &spec.environment_id)]),
            )
            .await
            .or_gone()?;
        Ok(list
            .map(|list| list.api_versions.into_iter().map(PublishedVersion::from).collect())
            .unwrap_or_default())
    }

    async fn publish(ctx: &OperationContext, spec: &PublishmentSpec) -> ApigwResult<()> {
        info!(api = %spec.api_id, env = %spec.environment_id, "Publishing API");
        let body = PublishBody {
            action: PublishAction::Online,
            env_id: &spec.environment_id,
            api_id: &spec.api_id,
            remark: spec.description.as_deref(),
        };
        let _: serde_json::Value = ctx
            .client()
            .post(
                "publish api",
                &ServiceClient::instance_path(&spec.gateway_id, "apis/action"),
                &body,
            )
            .await?;
        Ok(())
    }

    async fn switch(ctx: &OperationContext, spec: &PublishmentSpec, version_id: &str) -> ApigwResult<()> {
        info!(api = %spec.api_id, env = %spec.environment_id, version = version_id, "Switching API version");
        let path = ServiceClient::instance_path(
            &spec.gateway_id,
            &format!("apis/publish/{}/{}", spec.api_id, version_id),
        );
        let _: serde_json::Value = ctx
            .client()
            .put("switch api version", &path, &serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Make `version_id` live unless it already is
    async fn pin(ctx: &OperationContext, spec: &PublishmentSpec, version_id: &str) -> ApigwResult<()> {
        let history = Self::history(ctx, spec).await?;
        let version = pinned_version(&history, version_id, spec.description.as_deref())?;
        if version.status == LIVE {
            return Ok(());
        }
        Self::switch(ctx, spec, version_id).await
    }

    fn state_id(spec: &PublishmentSpec) -> String {
        join_id(&[&spec.gateway_id, &spec.environment_id, &spec.api_id])
    }

    async fn fetch(
        ctx: &OperationContext,
        spec: &PublishmentSpec,
        prior: Option<&PublishmentSpec>,
    ) -> ApigwResult<Option<ResourceState<PublishmentSpec, PublishmentObserved>>> {
        let history = Self::history(ctx, spec).await?;
        let Some(live) = live_version(&history) else {
            return Ok(None);
        };
        let publish_id = publish_id_of(ctx, &spec.gateway_id, &spec.api_id, &spec.environment_id)
            .await
            .or_gone()?
            .flatten()
            .unwrap_or_default();

        let pinned = prior.map_or(false, |prior| prior.version_id.is_some());
        let described = prior.map_or(true, |prior| prior.description.is_some());
        let spec = PublishmentSpec {
            version_id: pinned.then(|| live.version_id.clone()),
            description: if described { live.description.clone() } else { None },
            ..spec.clone()
        };
        Ok(Some(ResourceState::new(
            Self::state_id(&spec),
            spec,
            PublishmentObserved {
                publish_id,
                history,
            },
        )))
    }
}

#[async_trait]
impl Resource for PublishmentResource {
    type Spec = PublishmentSpec;
    type Observed = PublishmentObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_api_publishment_v2";

    fn validate(&self, spec: &PublishmentSpec) -> ApigwResult<()> {
        if let Some(description) = &spec.description {
            check_max_len("description", description, 255)?;
        }
        if spec.version_id.as_deref() == Some("") {
            return Err(ApigwError::validation("version_id", "must not be empty"));
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &PublishmentSpec, desired: &PublishmentSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.environment_id != desired.environment_id {
            fields.push("environment_id");
        }
        if prior.api_id != desired.api_id {
            fields.push("api_id");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &PublishmentSpec,
    ) -> ApigwResult<ResourceState<PublishmentSpec, PublishmentObserved>> {
        match &spec.version_id {
            Some(version_id) => Self::pin(ctx, spec, version_id).await?,
            None => Self::publish(ctx, spec).await?,
        }
        let fresh = Self::fetch(ctx, spec, Some(spec)).await?;
        require_found(fresh, "api publishment", &Self::state_id(spec))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<PublishmentSpec, PublishmentObserved>,
    ) -> ApigwResult<Option<ResourceState<PublishmentSpec, PublishmentObserved>>> {
        Self::fetch(ctx, &state.spec, Some(&state.spec)).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<PublishmentSpec, PublishmentObserved>,
        desired: &PublishmentSpec,
    ) -> ApigwResult<ResourceState<PublishmentSpec, PublishmentObserved>> {
        self.guard_update(&prior.spec, desired)?;

        match &desired.version_id {
            Some(version_id) if prior.spec.version_id.as_ref() != Some(version_id) => {
                Self::pin(ctx, desired, version_id).await?;
            }
            Some(_) => {
                if prior.spec.description != desired.description {
                    return Err(ApigwError::validation(
                        "description",
                        "the description of a pinned version cannot change",
                    ));
                }
            }
            None if prior.spec.description != desired.description => {
                let history = Self::history(ctx, desired).await?;
                ensure_fresh_description(&history, desired.description.as_deref())?;
                Self::publish(ctx, desired).await?;
            }
            None => {}
        }

        let fresh = Self::fetch(ctx, desired, Some(desired)).await?;
        require_found(fresh, "api publishment", &Self::state_id(desired))
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<PublishmentSpec, PublishmentObserved>,
    ) -> ApigwResult<()> {
        info!(api = %state.spec.api_id, env = %state.spec.environment_id, "Taking API offline");
        let body = PublishBody {
            action: PublishAction::Offline,
            env_id: &state.spec.environment_id,
            api_id: &state.spec.api_id,
            remark: None,
        };
        let result: ApigwResult<serde_json::Value> = ctx
            .client()
            .post(
                "take api offline",
                &ServiceClient::instance_path(&state.spec.gateway_id, "apis/action"),
                &body,
            )
            .await;
        match result {
            Err(err) if err.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<PublishmentSpec, PublishmentObserved>> {
        let [gateway_id, environment_id, api_id] =
            parse_id(id, ["gateway_id", "environment_id", "api_id"])?;
        let lookup = PublishmentSpec {
            gateway_id,
            environment_id,
            api_id,
            description: None,
            version_id: None,
        };
        let fresh = Self::fetch(ctx, &lookup, None).await?;
        require_found(fresh, "api publishment", id)
    }
}
