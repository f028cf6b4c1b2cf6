// ABOUTME: DirectWorkerBridge - completes through a remote worker reachable only over the event bus.
// ABOUTME: Streaming replies arrive on a per-request channel and are pulled out as event-stream bytes.

use crate::bus::{ChannelLease, EventBus};
use crate::catalog::ModelMap;
use crate::completion::{Completion, CompletionStream};
use crate::error::RelayError;
use crate::payload::ChatPayload;
use crate::sse::{frame_worker_message, is_truthy, WorkerChunk};
use bytes::Bytes;
use chatrelay_plugin::MetadataContext;
use futures::stream;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const COMPLETION_EVENT: &str = "request:chat:completion";

/// `user_id:session_id:request_id`
pub fn channel_key(user_id: &str, session_id: &str, request_id: &str) -> String {
    format!("{}:{}:{}", user_id, session_id, request_id)
}

pub struct DirectWorkerBridge {
    bus: Arc<dyn EventBus>,
}

impl DirectWorkerBridge {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub async fn complete(
        &self,
        mut payload: ChatPayload,
        models: &ModelMap,
    ) -> Result<Completion, RelayError> {
        let metadata = MetadataContext::from_map(&payload.take_metadata());
        let user_id = metadata.user_id.clone().unwrap_or_default();
        let session_id = metadata.session_id.clone().unwrap_or_default();
        let model = models
            .get(&payload.model)
            .cloned()
            .ok_or_else(RelayError::model_not_found)?;

        let channel = channel_key(&user_id, &session_id, &Uuid::new_v4().to_string());
        let event = json!({
            "type": COMPLETION_EVENT,
            "data": {
                "form_data": payload.to_value()?,
                "model": model,
                "channel": channel,
                "session_id": session_id,
            },
        });

        if !payload.stream {
            let ack = self.bus.call(&metadata, event).await?;
            if let Some(error) = ack.get("error").filter(|e| is_truthy(e)) {
                return Err(RelayError::WorkerRejected(describe(error)));
            }
            return Ok(Completion::Json(ack));
        }

        // Listen before dispatching so no early chunk is lost
        let (sender, receiver) = mpsc::unbounded_channel();
        let lease = ChannelLease::acquire(self.bus.clone(), channel, sender)?;

        let ack = self.bus.call(&metadata, event).await?;
        if !ack.get("status").is_some_and(is_truthy) {
            tracing::error!(channel = %lease.channel(), ack = %ack, "Worker rejected completion");
            return Err(RelayError::WorkerRejected(match ack.get("error") {
                Some(error) if is_truthy(error) => describe(error),
                _ => ack.to_string(),
            }));
        }

        tracing::debug!(channel = %lease.channel(), "Worker accepted streaming completion");
        Ok(Completion::Stream(worker_stream(lease, receiver)))
    }
}

fn describe(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Drains the channel queue until a done marker. The lease is released on every exit path.
fn worker_stream(lease: ChannelLease, receiver: mpsc::UnboundedReceiver<Value>) -> CompletionStream {
    CompletionStream::new(stream::unfold(
        (lease, receiver),
        |(lease, mut receiver)| async move {
            loop {
                let Some(message) = receiver.recv().await else {
                    lease.release();
                    return None;
                };
                match frame_worker_message(&message) {
                    WorkerChunk::Done => {
                        lease.release();
                        return None;
                    }
                    WorkerChunk::Event(frame) => {
                        let chunk = Ok::<_, RelayError>(Bytes::from(frame));
                        return Some((chunk, (lease, receiver)));
                    }
                    WorkerChunk::Ignored => continue,
                }
            }
        },
    ))
}
