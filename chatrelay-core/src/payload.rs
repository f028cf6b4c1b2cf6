// ABOUTME: Chat completion request payload and its metadata handling.
// ABOUTME: Typed where routing needs it; every other field passes through untouched.

use crate::error::RelayError;
use chatrelay_plugin::MetadataContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata keys forwarded to the remote completion service
pub const FORWARDED_METADATA_KEYS: [&str; 4] = ["user_id", "chat_id", "message_id", "session_id"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Empty when the caller sent none; resolution then fails as not found
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatPayload {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn from_value(value: Value) -> Result<Self, RelayError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value, RelayError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Overlay request-scoped metadata; scoped values win on key collision
    pub fn merge_metadata(&mut self, scoped: Option<&Map<String, Value>>) {
        let Some(scoped) = scoped else {
            return;
        };
        let metadata = self.metadata.get_or_insert_with(Map::new);
        for (key, value) in scoped {
            metadata.insert(key.clone(), value.clone());
        }
    }

    pub fn metadata_context(&self) -> MetadataContext {
        self.metadata
            .as_ref()
            .map(MetadataContext::from_map)
            .unwrap_or_default()
    }

    /// Remove and return the metadata mapping
    pub fn take_metadata(&mut self) -> Map<String, Value> {
        self.metadata.take().unwrap_or_default()
    }

    /// The subset of metadata the remote service is allowed to see
    pub fn forwarded_metadata(&self) -> Option<Map<String, Value>> {
        let metadata = self.metadata.as_ref().filter(|m| !m.is_empty())?;
        Some(
            FORWARDED_METADATA_KEYS
                .iter()
                .map(|key| {
                    (
                        key.to_string(),
                        metadata.get(*key).cloned().unwrap_or(Value::Null),
                    )
                })
                .collect(),
        )
    }
}
