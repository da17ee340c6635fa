//! Signature keys used by the gateway to sign requests towards backends.
//! There is no get-by-id call; READ filters the list by id instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::apigw::non_empty;
use crate::apigw::validation::{check_pattern, check_range, IDENTIFIER};
use crate::client::{list_query, ServiceClient};
use crate::core::error::{ApigwError, ApigwResult};
use crate::framework::{join_id, parse_id, require_found, OperationContext, Resource, ResourceState};
use crate::observability::redact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Hmac,
    Basic,
    PublicKey,
    Aes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureSpec {
    pub gateway_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub sign_type: SignatureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureObserved {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct SignatureBody<'a> {
    name: &'a str,
    sign_type: SignatureType,
    #[serde(skip_serializing_if = "Option::is_none")]
    sign_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sign_secret: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sign_algorithm: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SignatureDetail {
    id: String,
    name: String,
    sign_type: SignatureType,
    #[serde(default)]
    sign_key: Option<String>,
    #[serde(default)]
    sign_secret: Option<String>,
    #[serde(default)]
    sign_algorithm: Option<String>,
    #[serde(default)]
    create_time: Option<String>,
    #[serde(default)]
    update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignatureList {
    #[serde(default)]
    signs: Vec<SignatureDetail>,
}

pub struct SignatureResource;

impl SignatureResource {
    async fn find(
        ctx: &OperationContext,
        gateway_id: &str,
        signature_id: &str,
    ) -> ApigwResult<Option<SignatureDetail>> {
        let list: SignatureList = ctx
            .client()
            .get(
                "list signature keys",
                &ServiceClient::instance_path(gateway_id, "signs"),
                &list_query(&[("id", signature_id)]),
            )
            .await?;
        Ok(list.signs.into_iter().find(|sign| sign.id == signature_id))
    }

    /// Service-generated key material is kept; configured material wins when
    /// the service does not echo it back.
    fn into_state(
        gateway_id: &str,
        detail: SignatureDetail,
        prior: Option<&SignatureSpec>,
    ) -> ResourceState<SignatureSpec, SignatureObserved> {
        let key = non_empty(detail.sign_key).or_else(|| prior.and_then(|p| p.key.clone()));
        let secret =
            non_empty(detail.sign_secret).or_else(|| prior.and_then(|p| p.secret.clone()));
        ResourceState::new(
            join_id(&[gateway_id, &detail.id]),
            SignatureSpec {
                gateway_id: gateway_id.to_string(),
                name: detail.name,
                sign_type: detail.sign_type,
                key,
                secret,
                algorithm: non_empty(detail.sign_algorithm),
            },
            SignatureObserved {
                created_at: non_empty(detail.create_time),
                updated_at: non_empty(detail.update_time),
            },
        )
    }

    fn body(spec: &SignatureSpec) -> SignatureBody<'_> {
        SignatureBody {
            name: &spec.name,
            sign_type: spec.sign_type,
            sign_key: spec.key.as_deref(),
            sign_secret: spec.secret.as_deref(),
            sign_algorithm: spec.algorithm.as_deref(),
        }
    }
}

pub(crate) fn signature_id_of(state_id: &str) -> ApigwResult<String> {
    let [_, signature_id] = parse_id(state_id, ["gateway_id", "id"])?;
    Ok(signature_id)
}

#[async_trait]
impl Resource for SignatureResource {
    type Spec = SignatureSpec;
    type Observed = SignatureObserved;

    const TYPE_NAME: &'static str = "opentelekomcloud_apigw_signature_v2";

    fn validate(&self, spec: &SignatureSpec) -> ApigwResult<()> {
        check_pattern(
            "name",
            &spec.name,
            &IDENTIFIER,
            "3 to 64 letters, digits or underscores starting with a letter",
        )?;
        match spec.sign_type {
            SignatureType::Hmac | SignatureType::Basic | SignatureType::Aes => {
                if let Some(key) = &spec.key {
                    check_range("key", key.chars().count(), 8, 32)?;
                }
                if let Some(secret) = &spec.secret {
                    check_range("secret", secret.chars().count(), 16, 64)?;
                }
            }
            SignatureType::PublicKey => {}
        }
        if spec.sign_type == SignatureType::Aes && spec.algorithm.is_none() {
            return Err(ApigwError::validation(
                "algorithm",
                "AES signature keys require an algorithm",
            ));
        }
        if spec.sign_type != SignatureType::Aes && spec.algorithm.is_some() {
            return Err(ApigwError::validation(
                "algorithm",
                "only AES signature keys take an algorithm",
            ));
        }
        Ok(())
    }

    fn replace_fields(&self, prior: &SignatureSpec, desired: &SignatureSpec) -> Vec<&'static str> {
        if prior.gateway_id != desired.gateway_id {
            vec!["gateway_id"]
        } else {
            Vec::new()
        }
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &SignatureSpec,
    ) -> ApigwResult<ResourceState<SignatureSpec, SignatureObserved>> {
        let created: SignatureDetail = ctx
            .client()
            .post(
                "create signature key",
                &ServiceClient::instance_path(&spec.gateway_id, "signs"),
                &Self::body(spec),
            )
            .await?;
        info!(
            signature = %created.id,
            key = %created.sign_key.as_deref().map(redact).unwrap_or_default(),
            "Signature key created"
        );
        Ok(Self::into_state(&spec.gateway_id, created, Some(spec)))
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<SignatureSpec, SignatureObserved>,
    ) -> ApigwResult<Option<ResourceState<SignatureSpec, SignatureObserved>>> {
        let signature_id = signature_id_of(&state.id)?;
        let found = Self::find(ctx, &state.spec.gateway_id, &signature_id).await?;
        Ok(found.map(|detail| Self::into_state(&state.spec.gateway_id, detail, Some(&state.spec))))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<SignatureSpec, SignatureObserved>,
        desired: &SignatureSpec,
    ) -> ApigwResult<ResourceState<SignatureSpec, SignatureObserved>> {
        self.guard_update(&prior.spec, desired)?;
        let signature_id = signature_id_of(&prior.id)?;
        let updated: SignatureDetail = ctx
            .client()
            .put(
                "update signature key",
                &ServiceClient::instance_path(&desired.gateway_id, &format!("signs/{}", signature_id)),
                &Self::body(desired),
            )
            .await?;
        Ok(Self::into_state(&desired.gateway_id, updated, Some(desired)))
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<SignatureSpec, SignatureObserved>,
    ) -> ApigwResult<()> {
        let path = ServiceClient::instance_path(
            &state.spec.gateway_id,
            &format!("signs/{}", signature_id_of(&state.id)?),
        );
        match ctx.client().delete("delete signature key", &path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<SignatureSpec, SignatureObserved>> {
        let [gateway_id, signature_id] = parse_id(id, ["gateway_id", "id"])?;
        let found = Self::find(ctx, &gateway_id, &signature_id).await?;
        let detail = require_found(found, "signature key", id)?;
        Ok(Self::into_state(&gateway_id, detail, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(sign_type: SignatureType) -> SignatureSpec {
        SignatureSpec {
            gateway_id: "gw".to_string(),
            name: "sign_key_a".to_string(),
            sign_type,
            key: Some("key-12345".to_string()),
            secret: Some("secret-0123456789".to_string()),
            algorithm: None,
        }
    }

    #[test]
    fn test_aes_requires_algorithm() {
        assert!(SignatureResource.validate(&spec(SignatureType::Hmac)).is_ok());
        assert!(SignatureResource.validate(&spec(SignatureType::Aes)).is_err());

        let mut aes = spec(SignatureType::Aes);
        aes.algorithm = Some("aes-128-cfb".to_string());
        assert!(SignatureResource.validate(&aes).is_ok());
    }

    #[test]
    fn test_secret_kept_when_not_echoed() {
        let detail = SignatureDetail {
            id: "s-1".to_string(),
            name: "sign_key_a".to_string(),
            sign_type: SignatureType::Hmac,
            sign_key: Some("key-12345".to_string()),
            sign_secret: None,
            sign_algorithm: None,
            create_time: None,
            update_time: None,
        };
        let prior = spec(SignatureType::Hmac);
        let state = SignatureResource::into_state("gw", detail, Some(&prior));
        assert_eq!(state.id, "gw/s-1");
        assert_eq!(state.spec, prior);
    }

    #[test]
    fn test_type_wire_names() {
        let body = serde_json::to_value(SignatureResource::body(&spec(SignatureType::PublicKey))).unwrap();
        assert_eq!(body["sign_type"], "public_key");
    }
}
