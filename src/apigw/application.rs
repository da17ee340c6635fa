//! # Applications
//!
//! Consumer identities holding a key/secret pair and up to five app codes.
//!
//! - `app_codes` is a set; the service returns codes in insertion order, so
//!   reconciliation diffs natural values and resolves server ids on demand
//! - `secret_action = RESET` is a write-only trigger that rotates the secret;
//!   it is never read back from the service

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

use crate::apigw::app_code::{
    create_app_code, delete_app_code, list_app_codes, APP_CODE_RULE,
};
use crate::apigw::non_empty;
use crate::apigw::validation::{check_max_len, check_pattern, APP_CODE, IDENTIFIER};
use crate::client::ServiceClient;
use crate::core::error::{ApigwError, ApigwResult, NotFoundExt};
use crate::framework::{
    diff_sets, join_id, parse_id, require_found, OperationContext, Resource, ResourceState,
};

/// Maximum number of app codes per application
pub const MAX_APP_CODES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecretAction {
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub gateway_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub app_codes: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_action: Option<SecretAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationObserved {
    pub app_key: String,
    pub app_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApplicationBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remark: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApplicationDetail {
    id: String,
    name: String,
    #[serde(default)]
    remark: Option<String>,
    #[serde(default)]
    app_key: String,
    #[serde(default)]
    app_secret: String,
    #[serde(default)]
    register_time: Option<String>,
    #[serde(default)]
    update_time: Option<String>,
}

pub struct ApplicationResource;

impl ApplicationResource {
    fn app_path(gateway_id: &str, application_id: &str) -> String {
        ServiceClient::instance_path(gateway_id, &format!("apps/{}", application_id))
    }

    async fn fetch(
        ctx: &OperationContext,
        gateway_id: &str,
        application_id: &str,
        secret_action: Option<SecretAction>,
    ) -> ApigwResult<Option<ResourceState<ApplicationSpec, ApplicationObserved>>> {
        let detail: Option<ApplicationDetail> = ctx
            .client()
            .get("get application", &Self::app_path(gateway_id, application_id), &[])
            .await
            .or_gone()?;
        let Some(detail) = detail else {
            return Ok(None);
        };
        let app_codes = list_app_codes(ctx, gateway_id, &detail.id)
            .await?
            .into_iter()
            .map(|code| code.app_code)
            .collect();

        Ok(Some(ResourceState::new(
            join_id(&[gateway_id, &detail.id]),
            ApplicationSpec {
                gateway_id: gateway_id.to_string(),
                name: detail.name,
                description: non_empty(detail.remark),
                app_codes,
                secret_action,
            },
            ApplicationObserved {
                app_key: detail.app_key,
                app_secret: detail.app_secret,
                registered_at: non_empty(detail.register_time),
                updated_at: non_empty(detail.update_time),
            },
        )))
    }

    async fn reset_secret(ctx: &OperationContext, gateway_id: &str, application_id: &str) -> ApigwResult<()> {
        info!(application = application_id, "Resetting application secret");
        let _: serde_json::Value = ctx
            .client()
            .put(
                "reset application secret",
                &ServiceClient::instance_path(gateway_id, &format!("apps/secret/{}", application_id)),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }
}

fn application_id_of(state_id: &str) -> ApigwResult<String> {
    let [_, application_id] = parse_id(state_id, ["gateway_id", "id"])?;
    Ok(application_id)
}

#[async_trait]
impl Resource for ApplicationResource {
    type Spec = ApplicationSpec;
    type Observed = ApplicationObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_application_v2";

    fn validate(&self, spec: &ApplicationSpec) -> ApigwResult<()> {
        check_pattern(
            "name",
            &spec.name,
            &IDENTIFIER,
            "3 to 64 letters, digits or underscores starting with a letter",
        )?;
        if let Some(description) = &spec.description {
            check_max_len("description", description, 255)?;
        }
        if spec.app_codes.len() > MAX_APP_CODES {
            return Err(ApigwError::validation(
                "app_codes",
                format!("at most {} app codes are allowed", MAX_APP_CODES),
            ));
        }
        for code in &spec.app_codes {
            check_pattern("app_codes", code, &APP_CODE, APP_CODE_RULE)?;
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &ApplicationSpec, desired: &ApplicationSpec) -> Vec<&'static str> {
        if prior.gateway_id != desired.gateway_id {
            vec!["gateway_id"]
        } else {
            Vec::new()
        }
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &ApplicationSpec,
    ) -> ApigwResult<ResourceState<ApplicationSpec, ApplicationObserved>> {
        let body = ApplicationBody {
            name: &spec.name,
            remark: spec.description.as_deref(),
        };
        let created: ApplicationDetail = ctx
            .client()
            .post(
                "create application",
                &ServiceClient::instance_path(&spec.gateway_id, "apps"),
                &body,
            )
            .await?;
        info!(application = %created.id, name = %spec.name, "Application created");

        for code in &spec.app_codes {
            create_app_code(ctx, &spec.gateway_id, &created.id, code).await?;
        }

        let fresh = Self::fetch(ctx, &spec.gateway_id, &created.id, spec.secret_action).await?;
        require_found(fresh, "application", &created.id)
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<ApplicationSpec, ApplicationObserved>,
    ) -> ApigwResult<Option<ResourceState<ApplicationSpec, ApplicationObserved>>> {
        Self::fetch(
            ctx,
            &state.spec.gateway_id,
            &application_id_of(&state.id)?,
            state.spec.secret_action,
        )
        .await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<ApplicationSpec, ApplicationObserved>,
        desired: &ApplicationSpec,
    ) -> ApigwResult<ResourceState<ApplicationSpec, ApplicationObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let gateway_id = desired.gateway_id.as_str();
        let application_id = application_id_of(&prior.id)?;

        if prior.spec.name != desired.name || prior.spec.description != desired.description {
            let body = ApplicationBody {
                name: &desired.name,
                remark: desired.description.as_deref(),
            };
            let _: serde_json::Value = ctx
                .client()
                .put("update application", &Self::app_path(gateway_id, &application_id), &body)
                .await?;
        }

        let diff = diff_sets(&prior.spec.app_codes, &desired.app_codes);
        if !diff.removed.is_empty() {
            let server_ids: HashMap<String, String> = list_app_codes(ctx, gateway_id, &application_id)
                .await?
                .into_iter()
                .map(|code| (code.app_code, code.id))
                .collect();
            for code in &diff.removed {
                if let Some(code_id) = server_ids.get(code) {
                    delete_app_code(ctx, gateway_id, &application_id, code_id).await?;
                }
            }
        }
        for code in &diff.added {
            create_app_code(ctx, gateway_id, &application_id, code).await?;
        }

        if desired.secret_action == Some(SecretAction::Reset)
            && prior.spec.secret_action != desired.secret_action
        {
            Self::reset_secret(ctx, gateway_id, &application_id).await?;
        }

        let fresh = Self::fetch(ctx, gateway_id, &application_id, desired.secret_action).await?;
        require_found(fresh, "application", &application_id)
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<ApplicationSpec, ApplicationObserved>,
    ) -> ApigwResult<()> {
        let path = Self::app_path(&state.spec.gateway_id, &application_id_of(&state.id)?);
        match ctx.client().delete("delete application", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<ApplicationSpec, ApplicationObserved>> {
        let [gateway_id, application_id] = parse_id(id, ["gateway_id", "id"])?;
        let fresh = Self::fetch(ctx, &gateway_id, &application_id, None).await?;
        require_found(fresh, "application", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(codes: &[String]) -> ApplicationSpec {
        ApplicationSpec {
            gateway_id: "gw".to_string(),
            name: "app_consumer".to_string(),
            description: None,
            app_codes: codes.iter().cloned().collect(),
            secret_action: None,
        }
    }

    #[test]
    fn test_at_most_five_codes() {
        let codes: Vec<String> = (0..6).map(|i| format!("{}{}", i, "c".repeat(63))).collect();
        let err = ApplicationResource.validate(&spec(&codes)).unwrap_err();
        assert!(err.to_string().contains("app_codes"));
        assert!(ApplicationResource.validate(&spec(&codes[..5])).is_ok());
    }

    #[test]
    fn test_secret_action_parses_reset_only() {
        let action: SecretAction = serde_json::from_str("\"RESET\"").unwrap();
        assert_eq!(action, SecretAction::Reset);
        assert!(serde_json::from_str::<SecretAction>("\"ROTATE\"").is_err());
    }
}
