// ABOUTME: FilterChainProcessor - runs a payload through ordered inlet or outlet filter plugins.
// ABOUTME: Filters run strictly in sequence; a raising filter aborts the rest of the chain.

use crate::error::RelayError;
use crate::metrics;
use anyhow::Result;
use async_trait::async_trait;
use chatrelay_plugin::context::string_list;
use chatrelay_plugin::{
    BoundArgs, CapabilityBinder, ContextValues, FilterKind, FunctionStore, MetadataContext,
    ModelDescriptor,
};
use serde_json::Value;
use std::sync::Arc;

/// One filter to run, as chosen by the ordering collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSelection {
    pub id: String,
    /// Missing required filters fail the chain instead of being skipped
    pub required: bool,
}

impl FilterSelection {
    pub fn optional(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            required: false,
        }
    }

    pub fn required(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            required: true,
        }
    }
}

/// Decides which filters apply to a model and in what order
#[async_trait]
pub trait FilterOrdering: Send + Sync {
    async fn sorted_filter_ids(
        &self,
        model: &ModelDescriptor,
        explicit: &[String],
    ) -> Result<Vec<FilterSelection>>;
}

/// The model's own `info.meta.filterIds`, then the request's explicit ids, deduplicated
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFilterOrdering;

#[async_trait]
impl FilterOrdering for DefaultFilterOrdering {
    async fn sorted_filter_ids(
        &self,
        model: &ModelDescriptor,
        explicit: &[String],
    ) -> Result<Vec<FilterSelection>> {
        let mut ids = string_list(model.meta("filterIds"));
        for id in explicit {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        Ok(ids.into_iter().map(FilterSelection::optional).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    pub payload: Value,
    pub metadata: MetadataContext,
    /// Ids of filters that actually ran, in order
    pub applied: Vec<String>,
}

pub struct FilterChainProcessor {
    store: Arc<dyn FunctionStore>,
}

impl FilterChainProcessor {
    pub fn new(store: Arc<dyn FunctionStore>) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        kind: FilterKind,
        selections: &[FilterSelection],
        payload: Value,
        context: &ContextValues,
    ) -> Result<ChainOutput, RelayError> {
        let mut payload = payload;
        let mut applied = Vec::new();

        for selection in selections {
            let Some(module) = self.store.resolve(&selection.id).await else {
                if selection.required {
                    return Err(RelayError::NotFound(format!(
                        "Filter not found: {}",
                        selection.id
                    )));
                }
                tracing::debug!(filter = %selection.id, "Skipping unresolvable filter");
                continue;
            };
            let Some(entrypoint) = module.filter_entrypoint(kind) else {
                continue;
            };

            let abort = |e: anyhow::Error| {
                tracing::error!(
                    filter = %selection.id,
                    kind = kind.as_str(),
                    error = %e,
                    "Filter aborted the chain"
                );
                metrics::record_filter_abort(kind.as_str());
                RelayError::ChainAborted(e.to_string())
            };

            let valves = self.store.instantiate_valves(&module).await.map_err(abort)?;

            let mut available = context.clone();
            available.id = Some(selection.id.clone());
            let store = self.store.clone();
            let user = context.user.clone();
            let target = module.clone();
            let args = CapabilityBinder::bind(
                entrypoint.signature(),
                BoundArgs::new(payload).with_valves(valves),
                &available,
                || async move { store.instantiate_user_valves(&target, user.as_ref()).await },
            )
            .await;

            payload = entrypoint.invoke(args).await.map_err(abort)?;
            tracing::debug!(filter = %selection.id, kind = kind.as_str(), "Filter applied");
            applied.push(selection.id.clone());
        }

        let metadata = match payload.get("metadata").and_then(Value::as_object) {
            Some(map) => MetadataContext::from_map(map),
            None => context.metadata.clone().unwrap_or_default(),
        };

        Ok(ChainOutput {
            payload,
            metadata,
            applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_default_ordering_model_filters_first() {
        let model = ModelDescriptor::new("m1")
            .with_info(json!({"meta": {"filterIds": ["global", "shared"]}}));
        let explicit = vec!["shared".to_string(), "mine".to_string()];

        let ids: Vec<String> = DefaultFilterOrdering
            .sorted_filter_ids(&model, &explicit)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();

        assert_eq!(ids, vec!["global", "shared", "mine"]);
    }
}
