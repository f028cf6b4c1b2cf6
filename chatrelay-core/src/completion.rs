// ABOUTME: Normalized completion result shared by both transports.
// ABOUTME: Either a single JSON document or a single-pass stream of event-stream bytes.

use crate::error::RelayError;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

pub enum Completion {
    Json(Value),
    Stream(CompletionStream),
}

impl Completion {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<CompletionStream> {
        match self {
            Self::Json(_) => None,
            Self::Stream(stream) => Some(stream),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Event-stream bytes. Dropping it tears down whatever feeds it.
pub struct CompletionStream {
    inner: BoxStream<'static, Result<Bytes, RelayError>>,
}

impl CompletionStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Emit `chunk` before everything else
    pub fn prepend(self, chunk: impl Into<Bytes>) -> Self {
        let head = stream::once(futures::future::ready(Ok(chunk.into())));
        Self::new(head.chain(self.inner))
    }

    /// Drain into one string; stops at the first error
    pub async fn collect_text(mut self) -> Result<String, RelayError> {
        let mut text = String::new();
        while let Some(chunk) = self.inner.next().await {
            text.push_str(&String::from_utf8_lossy(&chunk?));
        }
        Ok(text)
    }
}

impl Stream for CompletionStream {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
