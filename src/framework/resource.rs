use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::core::error::{ApigwError, ApigwResult};
use crate::framework::context::OperationContext;

/// Persisted state of one managed object
///
/// `id` is the composite id (the same string import accepts), `spec` the
/// user-facing attributes as last observed, `observed` the computed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState<S, O> {
    pub id: String,
    pub spec: S,
    pub observed: O,
}

impl<S, O> ResourceState<S, O> {
    pub fn new<I: Into<String>>(id: I, spec: S, observed: O) -> Self {
        Self {
            id: id.into(),
            spec,
            observed,
        }
    }
}

/// What the host has to do to converge prior state onto a desired spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Create,
    NoOp,
    Update,
    /// Immutable attributes changed; destroy and recreate
    Replace { fields: Vec<&'static str> },
}

/// CRUD surface of one APIGW resource type
#[async_trait]
pub trait Resource: Send + Sync {
    /// User-authored attributes
    type Spec: Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync;
    /// Server-computed attributes kept alongside the spec
    type Observed: Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync;

    const TYPE_NAME: &'static str;

    /// Local invariants checked before any request is issued
    fn validate(&self, _spec: &Self::Spec) -> ApigwResult<()> {
        Ok(())
    }

    /// Names of immutable attributes that differ between `prior` and `desired`
    fn replace_fields(&self, _prior: &Self::Spec, _desired: &Self::Spec) -> Vec<&'static str> {
        Vec::new()
    }

    /// Reject an update that touches immutable attributes
    fn guard_update(&self, prior: &Self::Spec, desired: &Self::Spec) -> ApigwResult<()> {
        ensure_mutable(&self.replace_fields(prior, desired))
    }

    fn plan(
        &self,
        prior: Option<&ResourceState<Self::Spec, Self::Observed>>,
        desired: &Self::Spec,
    ) -> Plan {
        match prior {
            None => Plan::Create,
            Some(state) if state.spec == *desired => Plan::NoOp,
            Some(state) => {
                let fields = self.replace_fields(&state.spec, desired);
                if fields.is_empty() {
                    Plan::Update
                } else {
                    Plan::Replace { fields }
                }
            }
        }
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        spec: &Self::Spec,
    ) -> ApigwResult<ResourceState<Self::Spec, Self::Observed>>;

    /// `Ok(None)` means the remote object is gone and must leave state
    async fn read(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<Self::Spec, Self::Observed>,
    ) -> ApigwResult<Option<ResourceState<Self::Spec, Self::Observed>>>;

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: &ResourceState<Self::Spec, Self::Observed>,
        desired: &Self::Spec,
    ) -> ApigwResult<ResourceState<Self::Spec, Self::Observed>>;

    async fn delete(
        &self,
        ctx: &OperationContext,
        state: &ResourceState<Self::Spec, Self::Observed>,
    ) -> ApigwResult<()>;

    /// Build state from a composite import id; a missing object is an error here
    async fn import(
        &self,
        ctx: &OperationContext,
        id: &str,
    ) -> ApigwResult<ResourceState<Self::Spec, Self::Observed>>;
}

/// Reject an update that touches immutable attributes
pub fn ensure_mutable(fields: &[&'static str]) -> ApigwResult<()> {
    match fields.first() {
        None => Ok(()),
        Some(field) => Err(ApigwError::validation(
            *field,
            "attribute is immutable; the resource must be replaced",
        )),
    }
}

/// Turn a READ miss during import into a descriptive lookup error
pub fn require_found<T>(found: Option<T>, resource: &str, id: &str) -> ApigwResult<T> {
    found.ok_or_else(|| ApigwError::not_found(resource, id))
}
