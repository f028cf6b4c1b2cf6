// ABOUTME: In-memory form of a loaded plugin function module and its entrypoints.
// ABOUTME: Entrypoints carry their declared signature; valves shapes instantiate per call.

use crate::binder::{BoundArgs, Signature};
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

// =============================================================================
// Entrypoints
// =============================================================================

pub type BlockingHandler = Arc<dyn Fn(BoundArgs) -> Result<Value> + Send + Sync>;
pub type AsyncHandler = Arc<dyn Fn(BoundArgs) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Clone)]
pub enum Handler {
    /// Runs inline on the calling task
    Blocking(BlockingHandler),
    /// Awaited by the caller
    Async(AsyncHandler),
}

/// A callable plugin entrypoint together with the parameter names it declares
#[derive(Clone)]
pub struct Entrypoint {
    signature: Signature,
    handler: Handler,
}

impl Entrypoint {
    pub fn blocking<I, S, F>(params: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(BoundArgs) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            signature: Signature::new(params),
            handler: Handler::Blocking(Arc::new(f)),
        }
    }

    pub fn asynchronous<I, S, F, Fut>(params: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(BoundArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            signature: Signature::new(params),
            handler: Handler::Async(Arc::new(move |args| f(args).boxed())),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn is_async(&self) -> bool {
        matches!(self.handler, Handler::Async(_))
    }

    pub async fn invoke(&self, args: BoundArgs) -> Result<Value> {
        match &self.handler {
            Handler::Blocking(f) => f(args),
            Handler::Async(f) => f(args).await,
        }
    }
}

impl fmt::Debug for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entrypoint")
            .field("signature", &self.signature)
            .field("async", &self.is_async())
            .finish()
    }
}

// =============================================================================
// Function Modules
// =============================================================================

/// Kind recorded for a function when it was installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Filter,
    Action,
    Pipe,
}

/// Which side of the completion a filter runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Inlet,
    Outlet,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inlet => "inlet",
            Self::Outlet => "outlet",
        }
    }
}

/// A loaded plugin. Every entrypoint and configuration shape is optional.
#[derive(Debug, Clone)]
pub struct FunctionModule {
    id: String,
    kind: FunctionKind,
    inlet: Option<Entrypoint>,
    outlet: Option<Entrypoint>,
    action: Option<Entrypoint>,
    valves: Option<ValvesSpec>,
    user_valves: Option<ValvesSpec>,
}

impl FunctionModule {
    pub fn new(id: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inlet: None,
            outlet: None,
            action: None,
            valves: None,
            user_valves: None,
        }
    }

    pub fn filter(id: impl Into<String>) -> Self {
        Self::new(id, FunctionKind::Filter)
    }

    pub fn action(id: impl Into<String>) -> Self {
        Self::new(id, FunctionKind::Action)
    }

    pub fn with_inlet(mut self, entrypoint: Entrypoint) -> Self {
        self.inlet = Some(entrypoint);
        self
    }

    pub fn with_outlet(mut self, entrypoint: Entrypoint) -> Self {
        self.outlet = Some(entrypoint);
        self
    }

    pub fn with_action(mut self, entrypoint: Entrypoint) -> Self {
        self.action = Some(entrypoint);
        self
    }

    pub fn with_valves(mut self, spec: ValvesSpec) -> Self {
        self.valves = Some(spec);
        self
    }

    pub fn with_user_valves(mut self, spec: ValvesSpec) -> Self {
        self.user_valves = Some(spec);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn filter_entrypoint(&self, kind: FilterKind) -> Option<&Entrypoint> {
        match kind {
            FilterKind::Inlet => self.inlet.as_ref(),
            FilterKind::Outlet => self.outlet.as_ref(),
        }
    }

    pub fn action_entrypoint(&self) -> Option<&Entrypoint> {
        self.action.as_ref()
    }

    pub fn valves_spec(&self) -> Option<&ValvesSpec> {
        self.valves.as_ref()
    }

    pub fn user_valves_spec(&self) -> Option<&ValvesSpec> {
        self.user_valves.as_ref()
    }
}

// =============================================================================
// Valves
// =============================================================================

/// Configuration shape declared by a plugin: field names with their defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValvesSpec {
    fields: Vec<(String, Value)>,
}

impl ValvesSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, default: Value) -> Self {
        self.fields.push((name.into(), default));
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Overlay stored values on the declared defaults.
    ///
    /// Unknown stored keys are ignored. A stored value whose JSON type differs
    /// from a non-null default is rejected.
    pub fn instantiate(&self, stored: Option<&Map<String, Value>>) -> Result<Valves> {
        let mut values = Map::new();
        for (name, default) in &self.fields {
            let value = match stored.and_then(|s| s.get(name)) {
                Some(value) => {
                    if !compatible(default, value) {
                        bail!(
                            "valve '{}' expects {} but got {}",
                            name,
                            json_kind(default),
                            json_kind(value)
                        );
                    }
                    value.clone()
                }
                None => default.clone(),
            };
            values.insert(name.clone(), value);
        }
        Ok(Valves(values))
    }
}

fn compatible(default: &Value, value: &Value) -> bool {
    default.is_null() || value.is_null() || json_kind(default) == json_kind(value)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Instantiated configuration handed to one invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Valves(Map<String, Value>);

impl Valves {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}
