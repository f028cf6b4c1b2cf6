// ABOUTME: CompletionDispatcher - attaches request metadata, picks a transport, runs filter gates.
// ABOUTME: Outlet failures on the completed checkpoint come back as HookOutcome values.

use crate::catalog::ModelMap;
use crate::completion::Completion;
use crate::config::TransportMode;
use crate::direct::DirectWorkerBridge;
use crate::error::{HookOutcome, RelayError};
use crate::filter::FilterChainProcessor;
use crate::metrics;
use crate::payload::ChatPayload;
use crate::remote::RemoteCompletionBridge;
use crate::services::{hook_metadata, RelayServices};
use crate::sse::data_event;
use chatrelay_plugin::context::string_list;
use chatrelay_plugin::{FilterKind, ModelDescriptor, RequestContext, UserInfo};
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct CompletionDispatcher {
    services: Arc<RelayServices>,
    remote: RemoteCompletionBridge,
    direct: DirectWorkerBridge,
    filters: FilterChainProcessor,
}

impl CompletionDispatcher {
    pub fn new(services: Arc<RelayServices>) -> Result<Self, RelayError> {
        let remote = RemoteCompletionBridge::new(services.config.remote.url.clone())?;
        Ok(Self::with_remote(services, remote))
    }

    pub fn with_remote(services: Arc<RelayServices>, remote: RemoteCompletionBridge) -> Self {
        Self {
            direct: DirectWorkerBridge::new(services.bus()),
            filters: FilterChainProcessor::new(services.functions.clone()),
            remote,
            services,
        }
    }

    pub fn services(&self) -> &Arc<RelayServices> {
        &self.services
    }

    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        mut payload: ChatPayload,
        user: &UserInfo,
        bypass_filter: bool,
    ) -> Result<Completion, RelayError> {
        payload.merge_metadata(ctx.metadata.as_ref());
        let (model, models) = self.services.models.resolve(ctx, &payload.model).await?;

        match self.services.config.transport.mode {
            TransportMode::Remote => self.complete_remote(ctx, payload).await,
            TransportMode::Auto => {
                if ctx.direct_target().is_some() {
                    return self.complete_direct(payload, &models).await;
                }
                if !bypass_filter
                    && !self.services.config.bypass_model_access_control
                    && user.is_plain_user()
                {
                    self.check_access(&model, user).await?;
                }
                if model.is_arena() {
                    return self.complete_arena(ctx, payload, &model, &models).await;
                }
                self.complete_remote(ctx, payload).await
            }
        }
    }

    /// Run inlet filters over a request before it is dispatched
    pub async fn process_inlet(
        &self,
        ctx: &RequestContext,
        mut payload: ChatPayload,
        user: &UserInfo,
    ) -> Result<ChatPayload, RelayError> {
        payload.merge_metadata(ctx.metadata.as_ref());
        let (model, _) = self.services.models.resolve(ctx, &payload.model).await?;
        let metadata = payload.metadata_context();
        let selections = self
            .services
            .ordering
            .sorted_filter_ids(&model, &metadata.filter_ids)
            .await?;
        if selections.is_empty() {
            return Ok(payload);
        }

        let context = self.services.context_values(ctx, user, &model, metadata);
        let output = self
            .filters
            .run(FilterKind::Inlet, &selections, payload.to_value()?, &context)
            .await?;
        ChatPayload::from_value(output.payload)
    }

    /// Outlet checkpoint for a finalized message. Only an unknown model is raised.
    pub async fn chat_completed(
        &self,
        ctx: &RequestContext,
        body: Value,
        user: &UserInfo,
    ) -> Result<HookOutcome, RelayError> {
        let model_id = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (model, _) = self.services.models.resolve(ctx, &model_id).await?;

        let metadata = hook_metadata(&body, user);
        let context = self
            .services
            .context_values(ctx, user, &model, metadata.clone());

        let selections = match self
            .services
            .ordering
            .sorted_filter_ids(&model, &metadata.filter_ids)
            .await
        {
            Ok(selections) => selections,
            Err(e) => return Ok(HookOutcome::Failed(e.into())),
        };

        match self
            .filters
            .run(FilterKind::Outlet, &selections, body, &context)
            .await
        {
            Ok(output) => Ok(HookOutcome::Completed(output.payload)),
            Err(e) => Ok(HookOutcome::Failed(e)),
        }
    }

    async fn check_access(&self, model: &ModelDescriptor, user: &UserInfo) -> Result<(), RelayError> {
        self.services
            .models
            .catalog()
            .check_access(model, user)
            .await
            .map_err(|e| {
                tracing::debug!(model = %model.id, user = %user.id, error = %e, "Model access denied");
                RelayError::model_not_found()
            })
    }

    async fn complete_remote(
        &self,
        ctx: &RequestContext,
        payload: ChatPayload,
    ) -> Result<Completion, RelayError> {
        metrics::record_completion("remote", payload.stream);
        self.remote
            .complete(ctx.authorization(), &payload)
            .await
            .inspect_err(|e| metrics::record_upstream_error(e.kind()))
    }

    async fn complete_direct(
        &self,
        payload: ChatPayload,
        models: &ModelMap,
    ) -> Result<Completion, RelayError> {
        metrics::record_completion("direct", payload.stream);
        self.direct
            .complete(payload, models)
            .await
            .inspect_err(|e| metrics::record_upstream_error(e.kind()))
    }

    async fn complete_arena(
        &self,
        ctx: &RequestContext,
        mut payload: ChatPayload,
        arena: &ModelDescriptor,
        models: &ModelMap,
    ) -> Result<Completion, RelayError> {
        let selected = pick_arena_model(arena, models)?;
        tracing::debug!(arena = %arena.id, selected = %selected, "Arena model selected");
        payload.model = selected.clone();

        match self.complete_remote(ctx, payload).await? {
            Completion::Json(mut value) => {
                if let Some(map) = value.as_object_mut() {
                    map.insert("selected_model_id".to_string(), json!(selected));
                }
                Ok(Completion::Json(value))
            }
            Completion::Stream(stream) => {
                let head = data_event(&json!({"selected_model_id": selected}).to_string());
                Ok(Completion::Stream(stream.prepend(head)))
            }
        }
    }
}

/// Choose the concrete model an arena request runs against
pub fn pick_arena_model(arena: &ModelDescriptor, models: &ModelMap) -> Result<String, RelayError> {
    let listed = string_list(arena.meta("model_ids"));
    let exclude = arena.meta("filter_mode").and_then(Value::as_str) == Some("exclude");

    let mut non_arena: Vec<String> = models
        .values()
        .filter(|model| !model.is_arena())
        .map(|model| model.id.clone())
        .collect();
    non_arena.sort();

    let candidates = if !listed.is_empty() && exclude {
        non_arena
            .into_iter()
            .filter(|id| !listed.contains(id))
            .collect()
    } else if !listed.is_empty() {
        listed
    } else {
        non_arena
    };

    let selected = candidates
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(RelayError::model_not_found)?;
    // Listed ids are free text; the pick still has to exist
    if !models.contains_key(&selected) {
        tracing::debug!(arena = %arena.id, selected = %selected, "Arena listed unknown model");
        return Err(RelayError::model_not_found());
    }
    Ok(selected)
}
