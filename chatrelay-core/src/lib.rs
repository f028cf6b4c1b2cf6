// ABOUTME: Completion dispatch and streaming relay for chat requests
// ABOUTME: Transports, filter chains, and action invocation over loaded plugin functions

pub mod action;
pub mod bus;
pub mod catalog;
pub mod completion;
pub mod config;
pub mod direct;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod payload;
pub mod remote;
pub mod services;
pub mod sse;

pub use action::{parse_action_id, ActionDispatcher};
pub use bus::{BusEnvelope, ChannelLease, EventBus, InMemoryEventBus, WorkerLink};
pub use catalog::{ModelCatalog, ModelMap, ModelResolver, StaticModelCatalog};
pub use completion::{Completion, CompletionStream};
pub use config::{RelayConfig, TransportMode};
pub use direct::DirectWorkerBridge;
pub use dispatcher::CompletionDispatcher;
pub use error::{HookOutcome, RelayError};
pub use filter::{
    ChainOutput, DefaultFilterOrdering, FilterChainProcessor, FilterOrdering, FilterSelection,
};
pub use payload::{ChatMessage, ChatPayload};
pub use remote::RemoteCompletionBridge;
pub use services::RelayServices;

// Re-export the plugin contract
pub use chatrelay_plugin::{
    FunctionModule, FunctionStore, InMemoryFunctionStore, MetadataContext, ModelDescriptor,
    RequestContext, UserInfo,
};
