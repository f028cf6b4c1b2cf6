// ABOUTME: Event emitter and event caller handles bound to one request's metadata.
// ABOUTME: The EventSink seam is implemented by whatever transport reaches the client or worker.

use crate::context::MetadataContext;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Transport toward the session a request belongs to
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Fire-and-forget event for the session identified by `metadata`
    async fn emit(&self, metadata: &MetadataContext, event: Value) -> Result<()>;

    /// Send an event and wait for its single acknowledgement
    async fn call(&self, metadata: &MetadataContext, event: Value) -> Result<Value>;
}

/// Injected as `__event_emitter__`
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    metadata: MetadataContext,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>, metadata: MetadataContext) -> Self {
        Self { sink, metadata }
    }

    pub fn metadata(&self) -> &MetadataContext {
        &self.metadata
    }

    pub async fn emit(&self, event: Value) -> Result<()> {
        self.sink.emit(&self.metadata, event).await
    }

    /// Emit a `status` event, the usual progress signal from plugins
    pub async fn status(&self, description: &str, done: bool) -> Result<()> {
        self.emit(json!({
            "type": "status",
            "data": {"description": description, "done": done},
        }))
        .await
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Injected as `__event_call__`
#[derive(Clone)]
pub struct EventCaller {
    sink: Arc<dyn EventSink>,
    metadata: MetadataContext,
}

impl EventCaller {
    pub fn new(sink: Arc<dyn EventSink>, metadata: MetadataContext) -> Self {
        Self { sink, metadata }
    }

    pub fn metadata(&self) -> &MetadataContext {
        &self.metadata
    }

    pub async fn call(&self, event: Value) -> Result<Value> {
        self.sink.call(&self.metadata, event).await
    }
}

impl fmt::Debug for EventCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCaller")
            .field("metadata", &self.metadata)
            .finish()
    }
}
