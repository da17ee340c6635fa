//! App codes enable simple authentication for an application. They can be
//! managed individually here or as the `app_codes` set of an application.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::apigw::validation::{check_pattern, APP_CODE};
use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwResult, NotFoundExt};
use crate::framework::{
    ensure_mutable, join_id, parse_id, OperationContext, Resource, ResourceState,
};
use crate::observability::redact;

pub(crate) const APP_CODE_RULE: &str =
    "64 to 180 characters: letters, digits and + _ ! @ # $ % / = -, starting with a letter, digit, + or /";

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AppCodeDetail {
    pub id: String,
    pub app_code: String,
    #[serde(default)]
    pub create_time: Option<String>,
}

#[derive(Debug, Serialize)]
struct AppCodeBody<'a> {
    app_code: &'a str,
}

#[derive(Debug, Deserialize)]
struct AppCodeList {
    #[serde(default)]
    app_codes: Vec<AppCodeDetail>,
}

fn codes_path(gateway_id: &str, application_id: &str) -> String {
    ServiceClient::instance_path(gateway_id, &format!("apps/{}/app-codes", application_id))
}

pub(crate) async fn list_app_codes(
    ctx: &OperationContext,
    gateway_id: &str,
    application_id: &str,
) -> ApigwResult<Vec<AppCodeDetail>> {
    let list: AppCodeList = ctx
        .client()
        .get(
            "list app codes",
            &codes_path(gateway_id, application_id),
            &list_query(&[]),
        )
        .await?;
    Ok(list.app_codes)
}

pub(crate) async fn create_app_code(
    ctx: &OperationContext,
    gateway_id: &str,
    application_id: &str,
    code: &str,
) -> ApigwResult<AppCodeDetail> {
    info!(application = application_id, code = %redact(code), "Creating app code");
    ctx.client()
        .post(
            "create app code",
            &codes_path(gateway_id, application_id),
            &AppCodeBody { app_code: code },
        )
        .await
}

pub(crate) async fn delete_app_code(
    ctx: &OperationContext,
    gateway_id: &str,
    application_id: &str,
    code_id: &str,
) -> ApigwResult<()> {
    let path = format!("{}/{}", codes_path(gateway_id, application_id), code_id);
    match ctx.client().delete("delete app code", &path).await {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppCodeSpec {
    pub gateway_id: String,
    pub application_id: String,
    /// Left empty to let the service generate a code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppCodeObserved {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

pub struct AppCodeResource;

impl AppCodeResource {
    fn into_state(
        gateway_id: &str,
        application_id: &str,
        detail: AppCodeDetail,
        configured: bool,
    ) -> ResourceState<AppCodeSpec, AppCodeObserved> {
        ResourceState::new(
            join_id(&[gateway_id, application_id, &detail.id]),
            AppCodeSpec {
                gateway_id: gateway_id.to_string(),
                application_id: application_id.to_string(),
                value: configured.then(|| detail.app_code.clone()),
            },
            AppCodeObserved {
                code: detail.app_code,
                created_at: detail.create_time,
            },
        )
    }
}

#[async_trait]
impl Resource for AppCodeResource {
    type Spec = AppCodeSpec;
    type Observed = AppCodeObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_appcode_v2";

    fn validate(&self, spec: &AppCodeSpec) -> ApigwResult<()> {
        if let Some(value) = &spec.value {
            check_pattern("value", value, &APP_CODE, APP_CODE_RULE)?;
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &AppCodeSpec, desired: &AppCodeSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if prior.gateway_id != desired.gateway_id {
            fields.push("gateway_id");
        }
        if prior.application_id != desired.application_id {
            fields.push("application_id");
        }
        if prior.value != desired.value {
            fields.push("value");
        }
        fields
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &AppCodeSpec,
    ) -> ApigwResult<ResourceState<AppCodeSpec, AppCodeObserved>> {
        let detail = match &spec.value {
            Some(code) => create_app_code(ctx, &spec.gateway_id, &spec.application_id, code).await?,
            None => {
                info!(application = %spec.application_id, "Generating app code");
                ctx.client()
                    .put(
                        "generate app code",
                        &codes_path(&spec.gateway_id, &spec.application_id),
                        &serde_json::json!({}),
                    )
                    .await?
            }
        };
        Ok(Self::into_state(
            &spec.gateway_id,
            &spec.application_id,
            detail,
            spec.value.is_some(),
        ))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<AppCodeSpec, AppCodeObserved>,
    ) -> ApigwResult<Option<ResourceState<AppCodeSpec, AppCodeObserved>>> {
        let [gateway_id, application_id, code_id] =
            parse_id(&state.id, ["gateway_id", "application_id", "id"])?;
        let path = format!("{}/{}", codes_path(&gateway_id, &application_id), code_id);
        let detail: Option<AppCodeDetail> = ctx
            .client()
            .get("get app code", &path, &[])
            .await
            .or_gone()?;
        Ok(detail.map(|detail| {
            Self::into_state(&gateway_id, &application_id, detail, state.spec.value.is_some())
        }))
    }

    async fn update(
        &self,
        _ctx: &OperationContext,
        prior: &ResourceState<AppCodeSpec, AppCodeObserved>,
        desired: &AppCodeSpec,
    ) -> ApigwResult<ResourceState<AppCodeSpec, AppCodeObserved>> {
        ensure_mutable(&self.replace_fields(&prior.spec, desired))?;
        Ok(prior.clone())
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<AppCodeSpec, AppCodeObserved>,
    ) -> ApigwResult<()> {
        let [gateway_id, application_id, code_id] =
            parse_id(&state.id, ["gateway_id", "application_id", "id"])?;
        delete_app_code(ctx, &gateway_id, &application_id, &code_id).await
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<AppCodeSpec, AppCodeObserved>> {
        let [gateway_id, application_id, code_id] =
            parse_id(id, ["gateway_id", "application_id", "id"])?;
        let path = format!("{}/{}", codes_path(&gateway_id, &application_id), code_id);
        let detail: AppCodeDetail = ctx.client().get("get app code", &path, &[]).await?;
        Ok(Self::into_state(&gateway_id, &application_id, detail, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail() -> AppCodeDetail {
        AppCodeDetail {
            id: "code-1".to_string(),
            app_code: "A".repeat(64),
            create_time: None,
        }
    }

    #[test]
    fn test_generated_code_stays_out_of_spec() {
        let state = AppCodeResource::into_state("gw", "app-1", detail(), false);
        assert_eq!(state.id, "gw/app-1/code-1");
        assert_eq!(state.spec.value, None);
        assert_eq!(state.observed.code, "A".repeat(64));
    }

    #[test]
    fn test_configured_code_round_trips() {
        let state = AppCodeResource::into_state("gw", "app-1", detail(), true);
        assert_eq!(state.spec.value, Some("A".repeat(64)));
    }

    #[test]
    fn test_short_code_is_rejected() {
        let spec = AppCodeSpec {
            gateway_id: "gw".to_string(),
            application_id: "app-1".to_string(),
            value: Some("short".to_string()),
        };
        let err = AppCodeResource.validate(&spec).unwrap_err();
        assert!(err.to_string().contains("value"));
    }
}
