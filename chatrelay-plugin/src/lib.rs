// ABOUTME: Plugin contract for chatrelay: contextual values, event handles, capability binding.
// ABOUTME: Loaded function modules declare which context they accept; the binder supplies only that.

pub mod binder;
pub mod context;
pub mod event;
pub mod module;
pub mod registry;
pub mod testing;

pub use binder::{BoundArgs, CapabilityBinder, ContextParam, ContextValues, Signature};
pub use context::{MetadataContext, ModelDescriptor, RequestContext, UserInfo};
pub use event::{EventCaller, EventEmitter, EventSink};
pub use module::{Entrypoint, FilterKind, FunctionKind, FunctionModule, Valves, ValvesSpec};
pub use registry::{FunctionStore, InMemoryFunctionStore};
