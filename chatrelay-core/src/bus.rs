// ABOUTME: Duplex event bus between the relay and a remote worker, plus per-request channel leases.
// ABOUTME: Channel registration is the one piece of state shared across concurrent requests.

use crate::metrics;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chatrelay_plugin::{EventSink, MetadataContext};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Producer side of one channel's chunk queue
pub type ChannelSender = mpsc::UnboundedSender<Value>;

/// Event sink that can also route named channels back into the relay
pub trait EventBus: EventSink {
    /// Route messages for `channel` into `sender`. Fails if the key is already taken.
    fn register_channel(&self, channel: &str, sender: ChannelSender) -> Result<()>;

    /// Stop routing `channel`; returns whether it was registered
    fn deregister_channel(&self, channel: &str) -> bool;
}

/// A registered channel that deregisters itself exactly once
pub struct ChannelLease {
    bus: Arc<dyn EventBus>,
    channel: String,
    released: AtomicBool,
}

impl ChannelLease {
    pub fn acquire(bus: Arc<dyn EventBus>, channel: String, sender: ChannelSender) -> Result<Self> {
        bus.register_channel(&channel, sender)?;
        metrics::channel_opened();
        tracing::debug!(channel = %channel, "Channel registered");
        Ok(Self {
            bus,
            channel,
            released: AtomicBool::new(false),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Deregister the channel. Later calls are no-ops.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus.deregister_channel(&self.channel);
        metrics::channel_closed();
        tracing::debug!(channel = %self.channel, "Channel deregistered");
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelLease")
            .field("channel", &self.channel)
            .field("released", &self.is_released())
            .finish()
    }
}

// =============================================================================
// In-memory bus
// =============================================================================

/// Traffic from the relay toward the worker
#[derive(Debug)]
pub enum BusEnvelope {
    Emit {
        metadata: MetadataContext,
        event: Value,
    },
    Call {
        metadata: MetadataContext,
        event: Value,
        reply: oneshot::Sender<Value>,
    },
}

/// Process-local bus. The worker side is reached through the paired WorkerLink.
pub struct InMemoryEventBus {
    channels: Mutex<HashMap<String, ChannelSender>>,
    outbound: mpsc::UnboundedSender<BusEnvelope>,
}

impl InMemoryEventBus {
    pub fn new() -> (Arc<Self>, WorkerLink) {
        let (outbound, inbound) = mpsc::unbounded_channel();
        let bus = Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            outbound,
        });
        let link = WorkerLink {
            bus: bus.clone(),
            inbound,
        };
        (bus, link)
    }

    /// Push a worker message into `channel`; false when nobody is listening
    pub fn deliver(&self, channel: &str, message: Value) -> bool {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        match channels.get(channel) {
            Some(sender) => sender.send(message).is_ok(),
            None => {
                tracing::debug!(channel = %channel, "Dropping message for unknown channel");
                false
            }
        }
    }

    pub fn is_registered(&self, channel: &str) -> bool {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(channel)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl EventSink for InMemoryEventBus {
    async fn emit(&self, metadata: &MetadataContext, event: Value) -> Result<()> {
        let envelope = BusEnvelope::Emit {
            metadata: metadata.clone(),
            event,
        };
        if self.outbound.send(envelope).is_err() {
            tracing::debug!("No worker attached, event dropped");
        }
        Ok(())
    }

    async fn call(&self, metadata: &MetadataContext, event: Value) -> Result<Value> {
        let (reply, ack) = oneshot::channel();
        self.outbound
            .send(BusEnvelope::Call {
                metadata: metadata.clone(),
                event,
                reply,
            })
            .map_err(|_| anyhow::anyhow!("No worker attached"))?;
        ack.await
            .context("Worker went away before acknowledging the call")
    }
}

impl EventBus for InMemoryEventBus {
    fn register_channel(&self, channel: &str, sender: ChannelSender) -> Result<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if channels.contains_key(channel) {
            bail!("Channel already registered: {}", channel);
        }
        channels.insert(channel.to_string(), sender);
        Ok(())
    }

    fn deregister_channel(&self, channel: &str) -> bool {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(channel)
            .is_some()
    }
}

/// Worker end of an InMemoryEventBus
pub struct WorkerLink {
    bus: Arc<InMemoryEventBus>,
    inbound: mpsc::UnboundedReceiver<BusEnvelope>,
}

impl WorkerLink {
    /// Next emit or call addressed to the worker
    pub async fn recv(&mut self) -> Option<BusEnvelope> {
        self.inbound.recv().await
    }

    /// Push a message into one of the relay's registered channels
    pub fn deliver(&self, channel: &str, message: Value) -> bool {
        self.bus.deliver(channel, message)
    }

    pub fn bus(&self) -> &Arc<InMemoryEventBus> {
        &self.bus
    }
}

impl fmt::Debug for WorkerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLink")
            .field("channels", &self.bus.channel_count())
            .finish()
    }
}
