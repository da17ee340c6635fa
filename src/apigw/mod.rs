//! # API Gateway Resources
//!
//! One module per resource type, layered the way the service nests them:
//! gateway → group/environment → channel, policies, applications → API →
//! publishment → associations between published APIs and policies.

pub mod acl;
pub mod api;
pub mod app_auth;
pub mod app_code;
pub mod application;
pub mod association;
pub mod authorizer;
pub mod channel;
pub mod env_variable;
pub mod environment;
pub mod gateway;
pub mod group;
pub mod publishment;
pub mod response;
pub mod signature;
pub mod throttling;
pub mod validation;

use crate::framework::ResourceRegistry;

/// Register every APIGW resource type
pub fn register_all(registry: &mut ResourceRegistry) {
    registry
        .register(gateway::GatewayResource)
        .register(group::GroupResource)
        .register(environment::EnvironmentResource)
        .register(env_variable::EnvVariableResource)
        .register(response::ResponseResource)
        .register(channel::VpcChannelResource)
        .register(authorizer::AuthorizerResource)
        .register(signature::SignatureResource)
        .register(acl::AclPolicyResource)
        .register(throttling::ThrottlingPolicyResource)
        .register(application::ApplicationResource)
        .register(app_code::AppCodeResource)
        .register(app_auth::AppAuthResource)
        .register(api::ApiResource)
        .register(publishment::PublishmentResource)
        .register(association::AclAssociation::default())
        .register(association::ThrottlingAssociation::default())
        .register(association::SignatureAssociation::default());
}

/// Treat empty strings from the service as absent values
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
