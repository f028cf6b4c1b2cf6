// ABOUTME: ActionDispatcher - invokes a user-triggered action plugin on a finalized message.
// ABOUTME: Valves are resolved per call and passed in; the loaded module is never mutated.

use crate::error::{HookOutcome, RelayError};
use crate::metrics;
use crate::services::{hook_metadata, RelayServices};
use chatrelay_plugin::{BoundArgs, CapabilityBinder, RequestContext, UserInfo};
use serde_json::Value;
use std::sync::Arc;

/// Split `primary.sub` at the first separator
pub fn parse_action_id(action_id: &str) -> (&str, Option<&str>) {
    match action_id.split_once('.') {
        Some((primary, sub)) => (primary, Some(sub)),
        None => (action_id, None),
    }
}

pub struct ActionDispatcher {
    services: Arc<RelayServices>,
}

impl ActionDispatcher {
    pub fn new(services: Arc<RelayServices>) -> Self {
        Self { services }
    }

    /// Unknown actions and models are raised; everything that goes wrong once the
    /// action is about to run comes back as `HookOutcome::Failed`.
    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        action_id: &str,
        body: Value,
        user: &UserInfo,
    ) -> Result<HookOutcome, RelayError> {
        let (primary, sub) = parse_action_id(action_id);
        let Some(module) = self.services.functions.resolve(primary).await else {
            return Err(RelayError::NotFound(format!("Action not found: {}", primary)));
        };

        let model_id = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (model, _) = self.services.models.resolve(ctx, &model_id).await?;

        let Some(entrypoint) = module.action_entrypoint() else {
            return Ok(HookOutcome::Completed(body));
        };

        let fail = |e: anyhow::Error| {
            tracing::error!(action = %action_id, error = %e, "Action failed");
            metrics::record_action("failed");
            HookOutcome::Failed(RelayError::ChainAborted(e.to_string()))
        };

        let valves = match self.services.functions.instantiate_valves(&module).await {
            Ok(valves) => valves,
            Err(e) => return Ok(fail(e)),
        };

        let metadata = hook_metadata(&body, user);
        let mut available = self.services.context_values(ctx, user, &model, metadata);
        available.id = Some(sub.unwrap_or(primary).to_string());

        let functions = self.services.functions.clone();
        let target = module.clone();
        let owner = user.clone();
        let args = CapabilityBinder::bind(
            entrypoint.signature(),
            BoundArgs::new(body).with_valves(valves),
            &available,
            || async move { functions.instantiate_user_valves(&target, Some(&owner)).await },
        )
        .await;

        match entrypoint.invoke(args).await {
            Ok(result) => {
                metrics::record_action("completed");
                Ok(HookOutcome::Completed(result))
            }
            Err(e) => Ok(fail(e)),
        }
    }
}
