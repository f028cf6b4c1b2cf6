// ABOUTME: RemoteCompletionBridge - forwards completions to the remote HTTP completion service.
// ABOUTME: Streams are reframed line by line into event-stream framing as they arrive.

use crate::completion::{Completion, CompletionStream};
use crate::error::RelayError;
use crate::payload::ChatPayload;
use crate::sse::{frame_remote_line, LineBuffer};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

/// Ceiling on one whole remote exchange, streaming included
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RemoteCompletionBridge {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteCompletionBridge {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RelayError> {
        Self::with_timeout(endpoint, REMOTE_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Canonical body sent upstream
    pub fn request_body(payload: &ChatPayload) -> Value {
        let mut body = json!({
            "messages": payload.messages,
            "model": payload.model,
            "stream": payload.stream,
        });
        if let Some(params) = &payload.params {
            body["params"] = params.clone();
        }
        if let Some(metadata) = payload.forwarded_metadata() {
            body["metadata"] = Value::Object(metadata);
        }
        body
    }

    pub async fn complete(
        &self,
        authorization: Option<&str>,
        payload: &ChatPayload,
    ) -> Result<Completion, RelayError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(&Self::request_body(payload));
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            model = %payload.model,
            stream = payload.stream,
            "Forwarding completion"
        );

        let response = request.send().await.map_err(|e| {
            tracing::error!(endpoint = %self.endpoint, error = %e, "Remote completion request failed");
            classify(e)
        })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            let message = error_detail(&text).unwrap_or(text);
            tracing::error!(status = status.as_u16(), message = %message, "Remote completion rejected");
            return Err(RelayError::UpstreamRejected {
                status: status.as_u16(),
                message,
            });
        }

        if payload.stream {
            Ok(Completion::Stream(reframe(response.bytes_stream().boxed())))
        } else {
            let value = response.json::<Value>().await.map_err(classify)?;
            Ok(Completion::Json(value))
        }
    }
}

/// `detail` from an error body, when the body is JSON and carries one
fn error_detail(text: &str) -> Option<String> {
    let body: Value = serde_json::from_str(text).ok()?;
    match body.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn classify(e: reqwest::Error) -> RelayError {
    if e.is_builder() {
        RelayError::Internal(format!("Invalid remote request: {}", e))
    } else if e.is_decode() {
        RelayError::Internal(format!("Invalid remote response: {}", e))
    } else {
        RelayError::UpstreamUnreachable(e.to_string())
    }
}

struct Reframer {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    lines: LineBuffer,
    ready: VecDeque<Bytes>,
    finished: bool,
}

impl Reframer {
    fn queue(&mut self, raw: &[u8]) {
        match std::str::from_utf8(raw) {
            Ok(line) => {
                if let Some(frame) = frame_remote_line(line) {
                    self.ready.push_back(Bytes::from(frame));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Skipping undecodable stream line");
            }
        }
    }
}

fn reframe(body: BoxStream<'static, reqwest::Result<Bytes>>) -> CompletionStream {
    let state = Reframer {
        body,
        lines: LineBuffer::new(),
        ready: VecDeque::new(),
        finished: false,
    };
    CompletionStream::new(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for raw in state.lines.push(&chunk) {
                        state.queue(&raw);
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Remote stream failed");
                    state.finished = true;
                    return Some((Err(classify(e)), state));
                }
                None => {
                    state.finished = true;
                    if let Some(raw) = state.lines.finish() {
                        state.queue(&raw);
                    }
                }
            }
        }
    }))
}
