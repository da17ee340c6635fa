//! # Application Authorization
//!
//! Authorizes one application to call a set of APIs in one environment.
//! Binding is eventually consistent on the service side, so every write is
//! followed by a poll over the bound/unbound listings:
//!
//! - authorize is done once no target API is listed as unbound
//! - unauthorize is done once no target API is listed as bound

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult};
use crate::framework::{
    diff_sets, join_id, parse_id, require_found, OperationContext, Refresh, Resource,
    ResourceState, StateChangeConf,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppAuthSpec {
    pub gateway_id: String,
    pub environment_id: String,
    pub application_id: String,
    pub api_ids: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
struct AuthorizeBody<'a> {
    env_id: &'a str,
    app_ids: [&'a str; 1],
    api_ids: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct AuthRecord {
    /// Authorization id, needed to revoke
    id: String,
    api_id: String,
}

#[derive(Debug, Deserialize)]
struct AuthList {
    #[serde(default)]
    auths: Vec<AuthRecord>,
}

#[derive(Debug, Deserialize)]
struct UnboundApi {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UnboundList {
    #[serde(default)]
    apis: Vec<UnboundApi>,
}

pub struct AppAuthResource;

impl AppAuthResource {
    async fn bound(ctx: &OperationContext, spec: &AppAuthSpec) -> ApigwResult<Vec<AuthRecord>> {
        let list: AuthList = ctx
            .client()
            .get(
                "list authorized apis",
                &ServiceClient::instance_path(&spec.gateway_id, "app-auths/binded-apis"),
                &list_query(&[
                    ("app_id", &spec.application_id),
                    ("env_id", &spec.environment_id),
                ]),
            )
            .await?;
        Ok(list.auths)
    }

    async fn unbound(ctx: &OperationContext, spec: &AppAuthSpec) -> ApigwResult<Vec<String>> {
        let list: UnboundList = ctx
            .client()
            .get(
                "list unauthorized apis",
                &ServiceClient::instance_path(&spec.gateway_id, "app-auths/unbinded-apis"),
                &list_query(&[
                    ("app_id", &spec.application_id),
                    ("env_id", &spec.environment_id),
                ]),
            )
            .await?;
        Ok(list.apis.into_iter().map(|api| api.id).collect())
    }

    async fn authorize(ctx: &OperationContext, spec: &AppAuthSpec, api_ids: &[String]) -> ApigwResult<()> {
        if api_ids.is_empty() {
            return Ok(());
        }
        info!(application = %spec.application_id, env = %spec.environment_id, apis = api_ids.len(), "Authorizing APIs");
        let body = AuthorizeBody {
            env_id: &spec.environment_id,
            app_ids: [&spec.application_id],
            api_ids,
        };
        let _: serde_json::Value = ctx
            .client()
            .post(
                "authorize application",
                &ServiceClient::instance_path(&spec.gateway_id, "app-auths"),
                &body,
            )
            .await?;
        Ok(())
    }

    async fn unauthorize(ctx: &OperationContext, spec: &AppAuthSpec, api_ids: &[String]) -> ApigwResult<()> {
        if api_ids.is_empty() {
            return Ok(());
        }
        let auth_ids: HashMap<String, String> = Self::bound(ctx, spec)
            .await?
            .into_iter()
            .map(|record| (record.api_id, record.id))
            .collect();
        for api_id in api_ids {
            let Some(auth_id) = auth_ids.get(api_id) else {
                debug!(api = %api_id, "API already unauthorized");
                continue;
            };
            let path = ServiceClient::instance_path(&spec.gateway_id, &format!("app-auths/{}", auth_id));
            match ctx.client().delete("unauthorize application", &path).await {
                Err(err) if err.is_not_found() => {}
                other => other?,
            }
        }
        Ok(())
    }

    async fn wait_authorized(ctx: &OperationContext, spec: &AppAuthSpec, api_ids: &[String]) -> ApigwResult<()> {
        if api_ids.is_empty() {
            return Ok(());
        }
        StateChangeConf::new("application authorization", move || async move {
            let unbound = Self::unbound(ctx, spec).await?;
            let pending = api_ids.iter().any(|id| unbound.contains(id));
            Ok(Refresh::found((), if pending { "PENDING" } else { "COMPLETED" }))
        })
        .pending(["PENDING"])
        .target(["COMPLETED"])
        .timeout(ctx.timeouts().binding)
        .min_interval(ctx.polling().binding_interval)
        .wait_for_state(ctx.cancellation())
        .await
    }

    async fn wait_unauthorized(ctx: &OperationContext, spec: &AppAuthSpec, api_ids: &[String]) -> ApigwResult<()> {
        if api_ids.is_empty() {
            return Ok(());
        }
        StateChangeConf::new("application unauthorization", move || async move {
            let bound = Self::bound(ctx, spec).await?;
            let pending = bound.iter().any(|record| api_ids.contains(&record.api_id));
            Ok(Refresh::found((), if pending { "PENDING" } else { "COMPLETED" }))
        })
        .pending(["PENDING"])
        .target(["COMPLETED"])
        .timeout(ctx.timeouts().binding)
        .min_interval(ctx.polling().binding_interval)
        .wait_for_state(ctx.cancellation())
        .await
    }

    fn state_id(spec: &AppAuthSpec) -> String {
        join_id(&[&spec.gateway_id, &spec.environment_id, &spec.application_id])
    }

    async fn fetch(ctx: &OperationContext, spec: &AppAuthSpec) -> ApigwResult<Option<ResourceState<AppAuthSpec, ()>>> {
        let api_ids: BTreeSet<String> = Self::bound(ctx, spec)
            .await?
            .into_iter()
            .map(|record| record.api_id)
            .collect();
        if api_ids.is_empty() {
            return Ok(None);
        }
        let spec = AppAuthSpec {
            api_ids,
            ..spec.clone()
        };
        Ok(Some(ResourceState::new(Self::state_id(&spec), spec, ())))
    }
}

#[async_trait]
impl Resource for AppAuthResource {
    type Spec = AppAuthSpec;
    type Observed = ();

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_application_authorization_v2";

    fn validate(&self, spec: &AppAuthSpec) -> ApigwResult<()> {
        if spec.api_ids.is_empty() {
            return Err(ApigwError::validation("api_ids", "at least one API is required"));
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &AppAuthSpec, desired: &AppAuthSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.environment_id != desired.environment_id {
            fields.push("environment_id");
        }
        if prior.application_id != desired.application_id {
            fields.push("application_id");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &AppAuthSpec,
    ) -> ApigwResult<ResourceState<AppAuthSpec, ()>> {
        let api_ids: Vec<String> = spec.api_ids.iter().cloned().collect();
        Self::authorize(ctx, spec, &api_ids).await?;
        Self::wait_authorized(ctx, spec, &api_ids).await?;

        let fresh = Self::fetch(ctx, spec).await?;
        require_found(fresh, "application authorization", &Self::state_id(spec))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<AppAuthSpec, ()>,
    ) -> ApigwResult<Option<ResourceState<AppAuthSpec, ()>>> {
        Self::fetch(ctx, &state.spec).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<AppAuthSpec, ()>,
        desired: &AppAuthSpec,
    ) -> ApigwResult<ResourceState<AppAuthSpec, ()>> {
        self.guard_update(&prior.spec, desired)?;
        let diff = diff_sets(&prior.spec.api_ids, &desired.api_ids);

        Self::unauthorize(ctx, desired, &diff.removed).await?;
        Self::authorize(ctx, desired, &diff.added).await?;
        Self::wait_unauthorized(ctx, desired, &diff.removed).await?;
        Self::wait_authorized(ctx, desired, &diff.added).await?;

        let fresh = Self::fetch(ctx, desired).await?;
        require_found(fresh, "application authorization", &Self::state_id(desired))
    }

    async fn delete(&self, ctx: &OperationContext, state: &ResourceState<AppAuthSpec, ()>) -> ApigwResult<()> {
        let api_ids: Vec<String> = state.spec.api_ids.iter().cloned().collect();
        Self::unauthorize(ctx, &state.spec, &api_ids).await?;
        Self::wait_unauthorized(ctx, &state.spec, &api_ids).await
    }

    async fn import(&self, ctx: &OperationContext, id: &str) -> ApigwResult<ResourceState<AppAuthSpec, ()>> {
        let [gateway_id, environment_id, application_id] =
            parse_id(id, ["gateway_id", "environment_id", "application_id"])?;
        let lookup = AppAuthSpec {
            gateway_id,
            environment_id,
            application_id,
            api_ids: BTreeSet::new(),
        };
        let fresh = Self::fetch(ctx, &lookup).await?;
        require_found(fresh, "application authorization", id)
    }
}
