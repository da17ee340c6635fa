//! # Resource Framework
//!
//! The orchestration host owns planning, state storage and dependency
//! ordering. This module is the seam it drives: a typed [`Resource`] trait,
//! its type-erased [`DynResource`] twin keyed by type name, the per-call
//! [`OperationContext`], and the shared helpers every APIGW resource leans
//! on (polling, set diffs, composite ids).

pub mod context;
pub mod diff;
pub mod id;
pub mod registry;
pub mod resource;
pub mod wait;

pub use context::OperationContext;
pub use diff::{diff_sets, SetDiff};
pub use id::{join_id, parse_id};
pub use registry::{DynResource, ResourceRegistry};
pub use resource::{ensure_mutable, require_found, Plan, Resource, ResourceState};
pub use wait::{Refresh, StateChangeConf};
