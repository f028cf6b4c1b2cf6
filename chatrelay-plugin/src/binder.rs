// ABOUTME: CapabilityBinder - supplies plugin entrypoints only the context they declare.
// ABOUTME: Declared parameter names are matched against a fixed table of contextual values.

use crate::context::{MetadataContext, ModelDescriptor, RequestContext, UserInfo};
use crate::event::{EventCaller, EventEmitter};
use crate::module::Valves;
use anyhow::Result;
use serde_json::{Map, Value};
use std::future::Future;

/// Contextual values an entrypoint may ask for by parameter name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextParam {
    Model,
    Id,
    EventEmitter,
    EventCall,
    Request,
    Metadata,
    User,
}

impl ContextParam {
    /// Binding order. `User` stays last since building it can fail part-way.
    pub const ALL: [ContextParam; 7] = [
        ContextParam::Model,
        ContextParam::Id,
        ContextParam::EventEmitter,
        ContextParam::EventCall,
        ContextParam::Request,
        ContextParam::Metadata,
        ContextParam::User,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Model => "__model__",
            Self::Id => "__id__",
            Self::EventEmitter => "__event_emitter__",
            Self::EventCall => "__event_call__",
            Self::Request => "__request__",
            Self::Metadata => "__metadata__",
            Self::User => "__user__",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|param| param.name() == name)
    }
}

/// Parameter names an entrypoint declares
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<String>,
}

impl Signature {
    pub fn new<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn declares(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    pub fn accepts(&self, param: ContextParam) -> bool {
        self.declares(param.name())
    }
}

/// Everything the caller has on hand for one invocation
#[derive(Debug, Clone, Default)]
pub struct ContextValues {
    pub model: Option<ModelDescriptor>,
    pub id: Option<String>,
    pub event_emitter: Option<EventEmitter>,
    pub event_call: Option<EventCaller>,
    pub request: Option<RequestContext>,
    pub metadata: Option<MetadataContext>,
    pub user: Option<UserInfo>,
}

/// Arguments handed to an entrypoint. Contextual fields stay `None` unless declared.
#[derive(Debug, Clone, Default)]
pub struct BoundArgs {
    pub body: Value,
    /// Deployment-level configuration resolved for this call
    pub valves: Option<Valves>,
    pub model: Option<ModelDescriptor>,
    pub id: Option<String>,
    pub event_emitter: Option<EventEmitter>,
    pub event_call: Option<EventCaller>,
    pub request: Option<RequestContext>,
    pub metadata: Option<MetadataContext>,
    /// Serialized user; carries `valves` when per-user configuration resolved
    pub user: Option<Map<String, Value>>,
}

impl BoundArgs {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    pub fn with_valves(mut self, valves: Option<Valves>) -> Self {
        self.valves = valves;
        self
    }

    /// Contextual values that ended up bound
    pub fn bound(&self) -> Vec<ContextParam> {
        ContextParam::ALL
            .into_iter()
            .filter(|param| match param {
                ContextParam::Model => self.model.is_some(),
                ContextParam::Id => self.id.is_some(),
                ContextParam::EventEmitter => self.event_emitter.is_some(),
                ContextParam::EventCall => self.event_call.is_some(),
                ContextParam::Request => self.request.is_some(),
                ContextParam::Metadata => self.metadata.is_some(),
                ContextParam::User => self.user.is_some(),
            })
            .collect()
    }

    pub fn user_valves(&self) -> Option<&Value> {
        self.user.as_ref()?.get("valves")
    }
}

pub struct CapabilityBinder;

impl CapabilityBinder {
    /// Start from `explicit` and add each contextual value the signature declares.
    ///
    /// `user_valves` runs only when `__user__` is declared. A failure there is
    /// logged and the user is bound without valves.
    pub async fn bind<F, Fut>(
        signature: &Signature,
        explicit: BoundArgs,
        available: &ContextValues,
        user_valves: F,
    ) -> BoundArgs
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Valves>>>,
    {
        let mut args = explicit;

        for param in ContextParam::ALL {
            if param == ContextParam::User || !signature.accepts(param) {
                continue;
            }
            match param {
                ContextParam::Model => args.model = available.model.clone(),
                ContextParam::Id => args.id = available.id.clone(),
                ContextParam::EventEmitter => args.event_emitter = available.event_emitter.clone(),
                ContextParam::EventCall => args.event_call = available.event_call.clone(),
                ContextParam::Request => args.request = available.request.clone(),
                ContextParam::Metadata => args.metadata = available.metadata.clone(),
                ContextParam::User => {}
            }
        }

        if signature.accepts(ContextParam::User) {
            let mut user = available
                .user
                .as_ref()
                .map(UserInfo::to_context_map)
                .unwrap_or_default();
            match user_valves().await {
                Ok(Some(valves)) => {
                    user.insert("valves".to_string(), valves.to_value());
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to get user valves");
                }
            }
            args.user = Some(user);
        }

        args
    }
}
