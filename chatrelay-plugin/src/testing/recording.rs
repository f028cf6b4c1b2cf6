// ABOUTME: Recording entrypoints and sinks for plugin invocation tests.
// ABOUTME: Captures exactly which context a plugin received and in what order it ran.

use crate::binder::{BoundArgs, ContextParam};
use crate::context::MetadataContext;
use crate::event::EventSink;
use crate::module::{Entrypoint, Valves};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

/// One invocation as seen by a recording entrypoint
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub label: String,
    pub body: Value,
    pub bound: Vec<ContextParam>,
    pub id: Option<String>,
    pub valves: Option<Valves>,
    pub user: Option<Map<String, Value>>,
}

/// Shared log of recorded invocations, in call order
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: &str, args: &BoundArgs) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                label: label.to_string(),
                body: args.body.clone(),
                bound: args.bound(),
                id: args.id.clone(),
                valves: args.valves.clone(),
                user: args.user.clone(),
            });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.label).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entrypoint that records its arguments and returns the body unchanged
pub fn recording(label: &str, params: &[&str], log: &CallLog) -> Entrypoint {
    recording_with(label, params, log, Ok)
}

/// Entrypoint that records its arguments, then transforms the body with `f`
pub fn recording_with<F>(label: &str, params: &[&str], log: &CallLog, f: F) -> Entrypoint
where
    F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
{
    let label = label.to_string();
    let log = log.clone();
    Entrypoint::asynchronous(params.to_vec(), move |args: BoundArgs| {
        log.record(&label, &args);
        let result = f(args.body);
        async move { result }
    })
}

/// Entrypoint that records its arguments and then fails with `message`
pub fn failing(label: &str, params: &[&str], log: &CallLog, message: &str) -> Entrypoint {
    let message = message.to_string();
    recording_with(label, params, log, move |_| Err(anyhow!(message.clone())))
}

/// Body transform that appends `tag` to a `trace` array, creating it if needed
pub fn append_trace(tag: &str) -> impl Fn(Value) -> Result<Value> + Send + Sync + 'static {
    let tag = tag.to_string();
    move |mut body: Value| {
        let Some(map) = body.as_object_mut() else {
            return Err(anyhow!("body is not an object"));
        };
        let trace = map.entry("trace").or_insert_with(|| json!([]));
        match trace.as_array_mut() {
            Some(items) => items.push(json!(tag)),
            None => return Err(anyhow!("trace is not an array")),
        }
        Ok(body)
    }
}

/// EventSink that records traffic and answers calls with a fixed acknowledgement
#[derive(Debug, Default)]
pub struct RecordingSink {
    ack: Value,
    emitted: Mutex<Vec<(MetadataContext, Value)>>,
    calls: Mutex<Vec<(MetadataContext, Value)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            ack: json!({"status": true}),
            ..Default::default()
        }
    }

    pub fn acknowledge_with(mut self, ack: Value) -> Self {
        self.ack = ack;
        self
    }

    pub fn emitted(&self) -> Vec<(MetadataContext, Value)> {
        self.emitted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls(&self) -> Vec<(MetadataContext, Value)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, metadata: &MetadataContext, event: Value) -> Result<()> {
        self.emitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((metadata.clone(), event));
        Ok(())
    }

    async fn call(&self, metadata: &MetadataContext, event: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((metadata.clone(), event));
        Ok(self.ack.clone())
    }
}
