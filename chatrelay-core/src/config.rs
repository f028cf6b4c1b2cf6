// ABOUTME: Relay configuration: remote endpoint, transport mode, access-control bypass.
// ABOUTME: Parsed from TOML; the binary layers env overrides on top before validating.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Every completion goes to the remote HTTP service
    #[default]
    Remote,
    /// Honor direct-connection flags, arena models and access checks
    Auto,
}

impl FromStr for TransportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "auto" => Ok(Self::Auto),
            other => bail!("Unknown transport mode: {} (expected remote or auto)", other),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_url")]
    pub url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: default_remote_url(),
        }
    }
}

fn default_remote_url() -> String {
    "http://localhost:8000/api/v1/chat/completions".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Skip per-model access checks for plain users
    #[serde(default)]
    pub bypass_model_access_control: bool,
}

impl RelayConfig {
    pub fn parse(contents: &str) -> Result<Self> {
        let config: RelayConfig =
            toml::from_str(contents).context("Failed to parse relay config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.remote.url.trim();
        if url.is_empty() {
            bail!("remote.url must not be empty");
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("remote.url must start with http:// or https://, got {}", url);
        }
        Ok(())
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote.url = url.into();
        self
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.transport.mode = mode;
        self
    }
}
