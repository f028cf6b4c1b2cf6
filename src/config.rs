// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Wraps the core relay config with server binding and the static model catalog
use anyhow::{Context, Result};
use chatrelay_core::catalog::StaticModelCatalog;
use chatrelay_core::config::{RelayConfig, TransportMode};
use chatrelay_plugin::ModelDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Env var naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "CHATRELAY_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "chatrelay.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(flatten)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token a worker must present on `/ws/worker`. Unset leaves the route open,
    /// so the authenticating proxy has to guard it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            worker_token: None,
        }
    }
}

/// One `[[models]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
    /// When set, only these user ids pass the access check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_users: Option<Vec<String>>,
}

impl ModelEntry {
    pub fn descriptor(&self) -> ModelDescriptor {
        let mut model = ModelDescriptor::new(self.id.clone());
        model.name = self.name.clone();
        model.owned_by = self.owned_by.clone();
        model.info = self.info.clone();
        model
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load from `CHATRELAY_CONFIG_PATH` or ./chatrelay.toml, falling back to defaults
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(explicit.as_deref())
    }

    /// Like `load`, but an explicit path must exist
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Self::from_file(path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse without env overrides or validation
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(content)?)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("CHATRELAY_REMOTE_URL") {
            self.relay.remote.url = val;
        }
        if let Ok(val) = std::env::var("CHATRELAY_TRANSPORT") {
            self.relay.transport.mode = val
                .parse::<TransportMode>()
                .with_context(|| format!("CHATRELAY_TRANSPORT is invalid, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("CHATRELAY_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("CHATRELAY_PORT") {
            self.server.port = val.parse().with_context(|| {
                format!("CHATRELAY_PORT must be a valid port number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("CHATRELAY_WORKER_TOKEN") {
            self.server.worker_token = Some(val).filter(|token| !token.trim().is_empty());
        }
        if let Ok(val) = std::env::var("BYPASS_MODEL_ACCESS_CONTROL") {
            self.relay.bypass_model_access_control = val.trim().eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.relay.validate()?;

        if self.server.host.trim().is_empty() {
            anyhow::bail!("server.host must not be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self
            .server
            .worker_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            anyhow::bail!("server.worker_token must not be empty when set");
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                anyhow::bail!("models entries need a non-empty id");
            }
            if !seen.insert(model.id.as_str()) {
                anyhow::bail!("Duplicate model id in models: {}", model.id);
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Model catalog described by the `[[models]]` table
    pub fn catalog(&self) -> StaticModelCatalog {
        let descriptors = self.models.iter().map(ModelEntry::descriptor).collect();
        self.models
            .iter()
            .fold(StaticModelCatalog::new(descriptors), |catalog, model| {
                match &model.allowed_users {
                    Some(users) => catalog.restrict(model.id.clone(), users.clone()),
                    None => catalog,
                }
            })
    }
}
