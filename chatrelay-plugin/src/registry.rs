// ABOUTME: FunctionStore seam - resolves loaded plugin modules and their stored valves.
// ABOUTME: InMemoryFunctionStore backs tests and embedders that load plugins themselves.

use crate::context::UserInfo;
use crate::module::{FunctionModule, Valves};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Where loaded plugins and their persisted configuration come from
#[async_trait]
pub trait FunctionStore: Send + Sync {
    /// Currently loaded module for `id`
    async fn resolve(&self, id: &str) -> Option<Arc<FunctionModule>>;

    /// Stored deployment-level valves for `id`
    async fn valves(&self, id: &str) -> Result<Option<Map<String, Value>>>;

    /// Stored valves for `id` as configured by one user
    async fn user_valves(&self, id: &str, user_id: &str) -> Result<Option<Map<String, Value>>>;

    /// Instantiate the module's deployment valves for a single call
    async fn instantiate_valves(&self, module: &FunctionModule) -> Result<Option<Valves>> {
        let Some(spec) = module.valves_spec() else {
            return Ok(None);
        };
        let stored = self.valves(module.id()).await?;
        spec.instantiate(stored.as_ref()).map(Some)
    }

    /// Instantiate the module's per-user valves, if it declares any
    async fn instantiate_user_valves(
        &self,
        module: &FunctionModule,
        user: Option<&UserInfo>,
    ) -> Result<Option<Valves>> {
        let (Some(spec), Some(user)) = (module.user_valves_spec(), user) else {
            return Ok(None);
        };
        let stored = self.user_valves(module.id(), &user.id).await?;
        spec.instantiate(stored.as_ref()).map(Some)
    }
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryFunctionStore {
    modules: RwLock<HashMap<String, Arc<FunctionModule>>>,
    valves: RwLock<HashMap<String, Map<String, Value>>>,
    user_valves: RwLock<HashMap<(String, String), Map<String, Value>>>,
}

impl InMemoryFunctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn register(self, module: FunctionModule) -> Self {
        self.insert(module);
        self
    }

    /// Load or replace a module
    pub fn insert(&self, module: FunctionModule) {
        let id = module.id().to_string();
        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(module));
    }

    pub fn remove(&self, id: &str) -> bool {
        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    pub fn set_valves(&self, id: &str, values: Map<String, Value>) {
        self.valves
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), values);
    }

    pub fn set_user_valves(&self, id: &str, user_id: &str, values: Map<String, Value>) {
        self.user_valves
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((id.to_string(), user_id.to_string()), values);
    }

    /// Loaded module ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl FunctionStore for InMemoryFunctionStore {
    async fn resolve(&self, id: &str) -> Option<Arc<FunctionModule>> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    async fn valves(&self, id: &str) -> Result<Option<Map<String, Value>>> {
        Ok(self
            .valves
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn user_valves(&self, id: &str, user_id: &str) -> Result<Option<Map<String, Value>>> {
        Ok(self
            .user_valves
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(id.to_string(), user_id.to_string()))
            .cloned())
    }
}
