use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::core::error::{ApigwError, ApigwResult};
use crate::framework::context::OperationContext;
use crate::framework::resource::{Plan, Resource, ResourceState};

/// Type-erased resource driven by JSON documents
#[async_trait]
pub trait DynResource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn plan(&self, prior: Option<&Value>, desired: &Value) -> ApigwResult<Plan>;

    /// Create, update or replace so that remote state matches `desired`
    async fn apply(
        &self,
        ctx: &OperationContext,
        prior: Option<&Value>,
        desired: &Value,
    ) -> ApigwResult<Value>;

    async fn read(&self, ctx: &OperationContext, state: &Value) -> ApigwResult<Option<Value>>;

    async fn delete(&self, ctx: &OperationContext, state: &Value) -> ApigwResult<()>;

    async fn import(&self, ctx: &OperationContext, id: &str) -> ApigwResult<Value>;
}

type State<R> = ResourceState<<R as Resource>::Spec, <R as Resource>::Observed>;

fn decode_state<R: Resource>(value: &Value) -> ApigwResult<State<R>> {
    serde_json::from_value(value.clone()).map_err(|e| {
        ApigwError::validation("state", format!("invalid {} state: {}", R::TYPE_NAME, e))
    })
}

fn decode_spec<R: Resource>(value: &Value) -> ApigwResult<R::Spec> {
    serde_json::from_value(value.clone()).map_err(|e| {
        ApigwError::validation("spec", format!("invalid {} spec: {}", R::TYPE_NAME, e))
    })
}

#[async_trait]
impl<R> DynResource for R
where
    R: Resource + 'static,
{
    fn type_name(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn plan(&self, prior: Option<&Value>, desired: &Value) -> ApigwResult<Plan> {
        let prior = prior.map(decode_state::<R>).transpose()?;
        let desired = decode_spec::<R>(desired)?;
        Ok(Resource::plan(self, prior.as_ref(), &desired))
    }

    #[instrument(skip_all, fields(resource = R::TYPE_NAME))]
    async fn apply(
        &self,
        ctx: &OperationContext,
        prior: Option<&Value>,
        desired: &Value,
    ) -> ApigwResult<Value> {
        let prior = prior.map(decode_state::<R>).transpose()?;
        let desired = decode_spec::<R>(desired)?;
        self.validate(&desired)?;

        let state = match (Resource::plan(self, prior.as_ref(), &desired), prior) {
            (Plan::Create, _) | (_, None) => self.create(ctx, &desired).await?,
            (Plan::NoOp, Some(prior)) => prior,
            (Plan::Update, Some(prior)) => self.update(ctx, &prior, &desired).await?,
            (Plan::Replace { fields }, Some(prior)) => {
                info!(id = %prior.id, ?fields, "Replacing resource");
                Resource::delete(self, ctx, &prior).await?;
                self.create(ctx, &desired).await?
            }
        };

        Ok(serde_json::to_value(state)?)
    }

    #[instrument(skip_all, fields(resource = R::TYPE_NAME))]
    async fn read(&self, ctx: &OperationContext, state: &Value) -> ApigwResult<Option<Value>> {
        let state = decode_state::<R>(state)?;
        match Resource::read(self, ctx, &state).await? {
            Some(state) => Ok(Some(serde_json::to_value(state)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(resource = R::TYPE_NAME))]
    async fn delete(&self, ctx: &OperationContext, state: &Value) -> ApigwResult<()> {
        let state = decode_state::<R>(state)?;
        Resource::delete(self, ctx, &state).await
    }

    #[instrument(skip_all, fields(resource = R::TYPE_NAME, id = %id))]
    async fn import(&self, ctx: &OperationContext, id: &str) -> ApigwResult<Value> {
        let state = Resource::import(self, ctx, id).await?;
        Ok(serde_json::to_value(state)?)
    }
}

/// Resource implementations keyed by type name
#[derive(Default, Clone)]
pub struct ResourceRegistry {
    resources: BTreeMap<&'static str, Arc<dyn DynResource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<R: Resource + 'static>(&mut self, resource: R) -> &mut Self {
        self.resources.insert(R::TYPE_NAME, Arc::new(resource));
        self
    }

    pub fn get(&self, type_name: &str) -> ApigwResult<Arc<dyn DynResource>> {
        self.resources
            .get(type_name)
            .cloned()
            .ok_or_else(|| ApigwError::not_found("resource type", type_name))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resources.keys().copied()
    }
}
