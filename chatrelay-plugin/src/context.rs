// ABOUTME: Request-scoped values handed to plugins: request, user, model, metadata.
// ABOUTME: MetadataContext is derived once per request and threaded through every stage.

use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// User Identity
// =============================================================================

/// Authenticated caller, as resolved by the layer in front of the relay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "user".to_string()
}

impl UserInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            email: None,
            role: default_role(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Plain users are subject to model access checks; admins are not
    pub fn is_plain_user(&self) -> bool {
        self.role == "user"
    }

    /// Serialized form injected as `__user__`
    pub fn to_context_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

// =============================================================================
// Model Descriptor
// =============================================================================

/// Model catalog entry. Only the routing-relevant fields are typed; the rest passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Provider that serves the model ("arena" for arena models)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,
    /// Present when the model is itself backed by a pipe plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            owned_by: None,
            pipe: None,
            info: None,
            extra: Map::new(),
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owned_by = Some(owner.into());
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = Some(info);
        self
    }

    pub fn is_arena(&self) -> bool {
        self.owned_by.as_deref() == Some("arena")
    }

    pub fn is_pipe(&self) -> bool {
        self.pipe.is_some()
    }

    /// Lookup into `info.meta`
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.info.as_ref()?.get("meta")?.get(key)
    }
}

// =============================================================================
// Metadata Context
// =============================================================================

/// Identifiers for one request/response cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataContext {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub filter_ids: Vec<String>,
}

impl MetadataContext {
    /// Build from a payload `metadata` mapping; non-string values are ignored
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            user_id: text("user_id"),
            chat_id: text("chat_id"),
            message_id: text("message_id"),
            session_id: text("session_id"),
            filter_ids: string_list(map.get("filter_ids")),
        }
    }
}

/// Collect the string members of a JSON array, skipping anything else
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Request Context
// =============================================================================

/// The inbound call as the relay sees it: headers plus state set by upstream middleware.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: HeaderMap,
    /// Request-scoped metadata; wins over payload metadata on key collision
    pub metadata: Option<Map<String, Value>>,
    /// Direct-connection flag; only takes effect together with `model`
    pub direct: bool,
    pub model: Option<ModelDescriptor>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Add a header; invalid names or values are dropped
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Mark the request as a direct connection to `model`
    pub fn direct_to(mut self, model: ModelDescriptor) -> Self {
        self.direct = true;
        self.model = Some(model);
        self
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
    }

    /// The attached model when the request is a direct connection
    pub fn direct_target(&self) -> Option<&ModelDescriptor> {
        if self.direct {
            self.model.as_ref()
        } else {
            None
        }
    }
}
