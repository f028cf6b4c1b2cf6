// ABOUTME: Shared test fixtures: stub completion service, scripted worker, counting bus.
// ABOUTME: Each integration test binary pulls in only what it uses.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::Router;
use chatrelay_core::bus::{BusEnvelope, ChannelSender, EventBus, InMemoryEventBus, WorkerLink};
use chatrelay_core::catalog::StaticModelCatalog;
use chatrelay_core::config::RelayConfig;
use chatrelay_core::services::RelayServices;
use chatrelay_plugin::{EventSink, InMemoryFunctionStore, MetadataContext, ModelDescriptor};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// Stub completion service
// =============================================================================

/// Serve `app` on an ephemeral local port and return its base URL
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("Stub server error: {}", e);
        }
    });
    format!("http://{}", addr)
}

/// A URL nothing is listening on
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let port = listener.local_addr().expect("probe address").port();
    drop(listener);
    format!("http://127.0.0.1:{}/api/chat", port)
}

/// Requests a stub received: headers and JSON body
#[derive(Clone, Default)]
pub struct Captured {
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

impl Captured {
    pub fn push(&self, headers: HeaderMap, body: Value) {
        self.requests.lock().unwrap().push((headers, body));
    }

    pub fn all(&self) -> Vec<(HeaderMap, Value)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_body(&self) -> Value {
        self.all().last().map(|(_, body)| body.clone()).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Scripted worker
// =============================================================================

/// What the worker answers to one call, and what it then pushes into the call's channel
pub struct WorkerReply {
    pub ack: Value,
    pub chunks: Vec<Value>,
}

impl WorkerReply {
    pub fn ack(ack: Value) -> Self {
        Self {
            ack,
            chunks: Vec::new(),
        }
    }

    pub fn streaming(ack: Value, chunks: Vec<Value>) -> Self {
        Self { ack, chunks }
    }
}

/// Events the worker saw: calls and emits, in arrival order
#[derive(Clone, Default)]
pub struct WorkerLog {
    pub calls: Arc<Mutex<Vec<(MetadataContext, Value)>>>,
    pub emits: Arc<Mutex<Vec<(MetadataContext, Value)>>>,
}

impl WorkerLog {
    pub fn calls(&self) -> Vec<(MetadataContext, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn emits(&self) -> Vec<(MetadataContext, Value)> {
        self.emits.lock().unwrap().clone()
    }
}

/// Run a worker that answers every call with `script(event)`
pub fn spawn_worker<F>(mut link: WorkerLink, script: F) -> WorkerLog
where
    F: Fn(&Value) -> WorkerReply + Send + 'static,
{
    let log = WorkerLog::default();
    let seen = log.clone();
    tokio::spawn(async move {
        while let Some(envelope) = link.recv().await {
            match envelope {
                BusEnvelope::Emit { metadata, event } => {
                    seen.emits.lock().unwrap().push((metadata, event));
                }
                BusEnvelope::Call {
                    metadata,
                    event,
                    reply,
                } => {
                    seen.calls.lock().unwrap().push((metadata, event.clone()));
                    let WorkerReply { ack, chunks } = script(&event);
                    let _ = reply.send(ack);
                    let channel = event["data"]["channel"].as_str().unwrap_or_default();
                    for chunk in chunks {
                        link.deliver(channel, chunk);
                    }
                }
            }
        }
    });
    log
}

// =============================================================================
// Counting bus
// =============================================================================

/// Wraps the in-memory bus and counts channel registrations
pub struct CountingBus {
    inner: Arc<InMemoryEventBus>,
    registered: AtomicUsize,
    released: Mutex<Vec<String>>,
}

impl CountingBus {
    pub fn new() -> (Arc<Self>, WorkerLink) {
        let (inner, link) = InMemoryEventBus::new();
        let bus = Arc::new(Self {
            inner,
            registered: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
        });
        (bus, link)
    }

    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    pub fn open_channels(&self) -> usize {
        self.inner.channel_count()
    }
}

#[async_trait]
impl EventSink for CountingBus {
    async fn emit(&self, metadata: &MetadataContext, event: Value) -> Result<()> {
        self.inner.emit(metadata, event).await
    }

    async fn call(&self, metadata: &MetadataContext, event: Value) -> Result<Value> {
        self.inner.call(metadata, event).await
    }
}

impl EventBus for CountingBus {
    fn register_channel(&self, channel: &str, sender: ChannelSender) -> Result<()> {
        self.inner.register_channel(channel, sender)?;
        self.registered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deregister_channel(&self, channel: &str) -> bool {
        self.released.lock().unwrap().push(channel.to_string());
        self.inner.deregister_channel(channel)
    }
}

// =============================================================================
// Services
// =============================================================================

pub fn services_with_bus<B: EventBus + 'static>(
    config: RelayConfig,
    models: Vec<ModelDescriptor>,
    store: InMemoryFunctionStore,
    bus: Arc<B>,
) -> Arc<RelayServices> {
    Arc::new(RelayServices::new(
        config,
        Arc::new(StaticModelCatalog::new(models)),
        Arc::new(store),
        bus,
    ))
}

pub fn services(
    config: RelayConfig,
    models: Vec<ModelDescriptor>,
    store: InMemoryFunctionStore,
) -> (Arc<RelayServices>, WorkerLink) {
    let (bus, link) = InMemoryEventBus::new();
    (services_with_bus(config, models, store, bus), link)
}

/// Default config with a single `m1` model around a shared store
pub fn services_with_store(store: Arc<InMemoryFunctionStore>) -> (Arc<RelayServices>, WorkerLink) {
    let (bus, link) = InMemoryEventBus::new();
    let services = Arc::new(RelayServices::new(
        RelayConfig::default(),
        Arc::new(StaticModelCatalog::new(vec![ModelDescriptor::new("m1")])),
        store,
        bus,
    ));
    (services, link)
}
