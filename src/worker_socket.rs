// ABOUTME: Websocket attachment for the remote worker that sits behind the event bus
// ABOUTME: One worker at a time; calls made while none is attached are refused immediately

use axum::extract::ws::{Message, WebSocket};
use chatrelay_core::bus::{BusEnvelope, InMemoryEventBus, WorkerLink};
use chatrelay_plugin::MetadataContext;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

// =============================================================================
// Wire Frames
// =============================================================================

/// JSON frames exchanged with the worker over the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerFrame {
    /// Relay to worker; answered by an `ack` with the same id
    Call {
        id: String,
        metadata: MetadataContext,
        event: Value,
    },
    /// Relay to worker; fire and forget
    Emit {
        metadata: MetadataContext,
        event: Value,
    },
    /// Worker reply to a call
    Ack {
        id: String,
        #[serde(default)]
        data: Value,
    },
    /// Worker push into a registered per-request channel
    Channel {
        channel: String,
        #[serde(default)]
        data: Value,
    },
}

/// Acknowledgement given to calls that no worker can answer
pub fn detached_ack() -> Value {
    json!({"status": false, "error": "No worker attached"})
}

// =============================================================================
// Worker Hub
// =============================================================================

type FrameSender = mpsc::UnboundedSender<WorkerFrame>;

/// Routes bus traffic to the attached worker and worker replies back into the bus
pub struct WorkerHub {
    bus: Arc<InMemoryEventBus>,
    attached: Mutex<Option<(u64, FrameSender)>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    next_session: AtomicU64,
}

/// Outbound frames for one attached worker
pub struct WorkerSession {
    pub id: u64,
    pub frames: mpsc::UnboundedReceiver<WorkerFrame>,
}

impl WorkerHub {
    /// Take the worker end of the bus and start routing its traffic
    pub fn spawn(link: WorkerLink) -> Arc<Self> {
        let hub = Arc::new(Self {
            bus: link.bus().clone(),
            attached: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        });
        tokio::spawn(pump(Arc::downgrade(&hub), link));
        hub
    }

    pub fn is_attached(&self) -> bool {
        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Claim the worker slot. None when another worker holds it.
    pub fn attach(&self) -> Option<WorkerSession> {
        let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        if attached.is_some() {
            return None;
        }
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let (sender, frames) = mpsc::unbounded_channel();
        *attached = Some((id, sender));
        Some(WorkerSession { id, frames })
    }

    /// Free the slot held by `session` and refuse its unanswered calls
    pub fn detach(&self, session: u64) {
        {
            let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
            if !attached.as_ref().is_some_and(|(id, _)| *id == session) {
                return;
            }
            *attached = None;
        }
        let unanswered: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (id, reply) in unanswered {
            tracing::debug!(id = %id, "Refusing call left unanswered by detached worker");
            let _ = reply.send(detached_ack());
        }
    }

    /// Apply one frame received from the worker
    pub fn handle_frame(&self, frame: WorkerFrame) {
        match frame {
            WorkerFrame::Ack { id, data } => {
                let reply = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(data);
                    }
                    None => tracing::debug!(id = %id, "Ack for unknown call"),
                }
            }
            WorkerFrame::Channel { channel, data } => {
                self.bus.deliver(&channel, data);
            }
            other => {
                tracing::debug!(frame = ?other, "Ignoring relay-bound frame sent by worker");
            }
        }
    }

    fn route(&self, envelope: BusEnvelope) {
        match envelope {
            BusEnvelope::Emit { metadata, event } => {
                let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
                match attached.as_ref() {
                    Some((_, worker)) => {
                        let _ = worker.send(WorkerFrame::Emit { metadata, event });
                    }
                    None => tracing::debug!("No worker attached, event dropped"),
                }
            }
            BusEnvelope::Call {
                metadata,
                event,
                reply,
            } => self.forward_call(metadata, event, reply),
        }
    }

    fn forward_call(&self, metadata: MetadataContext, event: Value, reply: oneshot::Sender<Value>) {
        // The slot lock is held until the call is pending, so a detach either drains it or
        // happens before it is sent
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        let Some((_, worker)) = attached.as_ref() else {
            tracing::warn!("No worker attached, refusing call");
            let _ = reply.send(detached_ack());
            return;
        };

        let id = Uuid::new_v4().to_string();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), reply);
        let frame = WorkerFrame::Call {
            id: id.clone(),
            metadata,
            event,
        };
        if worker.send(frame).is_err() {
            let reply = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            if let Some(reply) = reply {
                let _ = reply.send(detached_ack());
            }
        }
    }

    #[cfg(test)]
    fn pending_calls(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

async fn pump(hub: Weak<WorkerHub>, mut link: WorkerLink) {
    while let Some(envelope) = link.recv().await {
        let Some(hub) = hub.upgrade() else {
            break;
        };
        hub.route(envelope);
    }
}

// =============================================================================
// Socket Session
// =============================================================================

/// Serve one worker connection until it closes
pub async fn run_worker_session(mut socket: WebSocket, hub: Arc<WorkerHub>) {
    let Some(WorkerSession { id, mut frames }) = hub.attach() else {
        tracing::warn!("Worker already attached, closing new connection");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    tracing::info!(session = id, "Worker attached");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize worker frame");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<WorkerFrame>(&text) {
                Ok(frame) => hub.handle_frame(frame),
                Err(e) => tracing::debug!(error = %e, "Invalid frame from worker"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    hub.detach(id);
    writer_task.abort();
    tracing::info!(session = id, "Worker detached");
}
