// ABOUTME: Shared collaborators of the dispatchers: config, models, functions, filter ordering, bus.
// ABOUTME: Also builds the per-request context values handed to plugins.

use crate::bus::EventBus;
use crate::catalog::{ModelCatalog, ModelResolver};
use crate::config::RelayConfig;
use crate::filter::{DefaultFilterOrdering, FilterOrdering};
use chatrelay_plugin::context::string_list;
use chatrelay_plugin::{
    ContextValues, EventCaller, EventEmitter, EventSink, FunctionStore, MetadataContext,
    ModelDescriptor, RequestContext, UserInfo,
};
use serde_json::Value;
use std::sync::Arc;

pub struct RelayServices {
    pub config: RelayConfig,
    pub models: ModelResolver,
    pub functions: Arc<dyn FunctionStore>,
    pub ordering: Arc<dyn FilterOrdering>,
    bus: Arc<dyn EventBus>,
    sink: Arc<dyn EventSink>,
}

impl RelayServices {
    pub fn new<B: EventBus + 'static>(
        config: RelayConfig,
        catalog: Arc<dyn ModelCatalog>,
        functions: Arc<dyn FunctionStore>,
        bus: Arc<B>,
    ) -> Self {
        Self {
            config,
            models: ModelResolver::new(catalog),
            functions,
            ordering: Arc::new(DefaultFilterOrdering),
            bus: bus.clone(),
            sink: bus,
        }
    }

    pub fn with_ordering(mut self, ordering: Arc<dyn FilterOrdering>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    pub fn emitter(&self, metadata: MetadataContext) -> EventEmitter {
        EventEmitter::new(self.sink.clone(), metadata)
    }

    pub fn caller(&self, metadata: MetadataContext) -> EventCaller {
        EventCaller::new(self.sink.clone(), metadata)
    }

    /// Everything a plugin may ask for during this request
    pub fn context_values(
        &self,
        ctx: &RequestContext,
        user: &UserInfo,
        model: &ModelDescriptor,
        metadata: MetadataContext,
    ) -> ContextValues {
        ContextValues {
            model: Some(model.clone()),
            id: None,
            event_emitter: Some(self.emitter(metadata.clone())),
            event_call: Some(self.caller(metadata.clone())),
            request: Some(ctx.clone()),
            metadata: Some(metadata),
            user: Some(user.clone()),
        }
    }
}

/// Metadata for the post-completion hooks, read from a finalized message body
pub fn hook_metadata(body: &Value, user: &UserInfo) -> MetadataContext {
    let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
    MetadataContext {
        user_id: Some(user.id.clone()),
        chat_id: text("chat_id"),
        message_id: text("id"),
        session_id: text("session_id"),
        filter_ids: string_list(body.get("filter_ids")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hook_metadata_maps_message_id() {
        let body = json!({
            "model": "m1",
            "chat_id": "c1",
            "id": "msg-7",
            "session_id": "s1",
            "filter_ids": ["f1"]
        });
        let metadata = hook_metadata(&body, &UserInfo::new("u1"));

        assert_eq!(metadata.message_id.as_deref(), Some("msg-7"));
        assert_eq!(metadata.user_id.as_deref(), Some("u1"));
        assert_eq!(metadata.filter_ids, vec!["f1"]);
    }
}
