// ABOUTME: Model catalog seam and the resolver that caches its listing.
// ABOUTME: Direct-connection requests resolve against their single attached model instead.

use crate::error::RelayError;
use anyhow::Result;
use async_trait::async_trait;
use chatrelay_plugin::{ModelDescriptor, RequestContext, UserInfo};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub type ModelMap = HashMap<String, ModelDescriptor>;

/// Where model descriptors and access decisions come from
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>>;

    /// Fail when `user` may not use `model`. Allows everything by default.
    async fn check_access(&self, _model: &ModelDescriptor, _user: &UserInfo) -> Result<()> {
        Ok(())
    }
}

/// Fixed listing, optionally restricted to an allow-list of user ids per model
#[derive(Debug, Clone, Default)]
pub struct StaticModelCatalog {
    models: Vec<ModelDescriptor>,
    allowed_users: HashMap<String, Vec<String>>,
}

impl StaticModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            models,
            allowed_users: HashMap::new(),
        }
    }

    /// Only the listed user ids may use `model_id`
    pub fn restrict(mut self, model_id: impl Into<String>, users: Vec<String>) -> Self {
        self.allowed_users.insert(model_id.into(), users);
        self
    }
}

#[async_trait]
impl ModelCatalog for StaticModelCatalog {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(self.models.clone())
    }

    async fn check_access(&self, model: &ModelDescriptor, user: &UserInfo) -> Result<()> {
        match self.allowed_users.get(&model.id) {
            Some(users) if !users.iter().any(|id| id == &user.id) => {
                anyhow::bail!("User {} may not use model {}", user.id, model.id)
            }
            _ => Ok(()),
        }
    }
}

pub struct ModelResolver {
    catalog: Arc<dyn ModelCatalog>,
    cache: RwLock<Arc<ModelMap>>,
}

impl ModelResolver {
    pub fn new(catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            catalog,
            cache: RwLock::new(Arc::new(ModelMap::new())),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn ModelCatalog> {
        &self.catalog
    }

    pub fn cached(&self) -> Arc<ModelMap> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reload the listing from the catalog
    pub async fn refresh(&self) -> Result<Arc<ModelMap>, RelayError> {
        let models = self.catalog.list_models().await?;
        let map: Arc<ModelMap> = Arc::new(
            models
                .into_iter()
                .map(|model| (model.id.clone(), model))
                .collect(),
        );
        tracing::debug!(count = map.len(), "Model catalog refreshed");
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = map.clone();
        Ok(map)
    }

    /// Cached listing, loading it first if nothing is cached yet
    pub async fn ensure_loaded(&self) -> Result<Arc<ModelMap>, RelayError> {
        let cached = self.cached();
        if cached.is_empty() {
            self.refresh().await
        } else {
            Ok(cached)
        }
    }

    /// Models visible to this request
    pub async fn models_for(&self, ctx: &RequestContext) -> Result<Arc<ModelMap>, RelayError> {
        match ctx.direct_target() {
            Some(model) => {
                let mut map = ModelMap::new();
                map.insert(model.id.clone(), model.clone());
                Ok(Arc::new(map))
            }
            None => self.ensure_loaded().await,
        }
    }

    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        model_id: &str,
    ) -> Result<(ModelDescriptor, Arc<ModelMap>), RelayError> {
        let models = self.models_for(ctx).await?;
        let model = models
            .get(model_id)
            .cloned()
            .ok_or_else(RelayError::model_not_found)?;
        Ok((model, models))
    }
}
