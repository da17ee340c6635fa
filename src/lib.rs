//! # Open Telekom Cloud API Gateway Provider
//!
//! Declarative management of API Gateway (APIGW) objects. Each resource maps a
//! user-authored spec onto imperative REST calls and reconciles server state
//! back into a stable, diffable shape.
//!
//! The crate is layered:
//! - `core`: error kinds and provider configuration
//! - `client`: the signed JSON client, cached per region
//! - `framework`: the resource trait the orchestration host drives, plus
//!   polling, set-diff and composite-id helpers
//! - `apigw`: one module per resource type, from gateways down to
//!   publishments and their policy associations
//! - `provider`: wiring of configuration, clients and the resource registry

pub mod apigw;
pub mod client;
pub mod core;
pub mod framework;
pub mod observability;
pub mod provider;

pub use crate::core::config::ProviderConfig;
pub use crate::core::error::{ApigwError, ApigwResult};
pub use framework::{DynResource, OperationContext, Plan, Resource, ResourceRegistry, ResourceState};
pub use provider::Provider;
