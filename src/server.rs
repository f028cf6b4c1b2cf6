// ABOUTME: HTTP surface wiring the completion core to the network
// ABOUTME: Chat completion, completed-hook and action endpoints plus worker websocket, health, metrics

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{ws::rejection::WebSocketUpgradeRejection, Path, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chatrelay_core::{
    ActionDispatcher, ChatPayload, Completion, CompletionDispatcher, InMemoryEventBus,
    RelayError, RelayServices,
};
use chatrelay_plugin::{FunctionStore, ModelDescriptor, RequestContext, UserInfo};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::worker_socket::{run_worker_session, WorkerHub};

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub completions: Arc<CompletionDispatcher>,
    pub actions: Arc<ActionDispatcher>,
    pub worker: Arc<WorkerHub>,
    pub worker_token: Option<Arc<str>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the dispatchers over a fresh event bus. Must run inside a tokio runtime.
    pub fn new(
        config: &Config,
        functions: Arc<dyn FunctionStore>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self> {
        let (bus, link) = InMemoryEventBus::new();
        let services = Arc::new(RelayServices::new(
            config.relay.clone(),
            Arc::new(config.catalog()),
            functions,
            bus,
        ));
        let completions = CompletionDispatcher::new(services.clone())
            .context("Failed to build completion dispatcher")?;

        Ok(Self {
            completions: Arc::new(completions),
            actions: Arc::new(ActionDispatcher::new(services)),
            worker: WorkerHub::spawn(link),
            worker_token: config.server.worker_token.as_deref().map(Arc::from),
            metrics,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/completions", post(completions_handler))
        .route("/api/chat/completed", post(completed_handler))
        .route("/api/chat/actions/{action_id}", post(action_handler))
        .route("/ws/worker", get(worker_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process stops
pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Relay listening");
    axum::serve(listener, router(state))
        .await
        .context("HTTP server failed")
}

// =============================================================================
// Errors
// =============================================================================

/// `{"detail": message}` with the status of the failure kind
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        let status =
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

// =============================================================================
// Request Extraction
// =============================================================================

/// Caller identity as forwarded by the authenticating proxy
pub fn user_from_headers(headers: &HeaderMap) -> Result<UserInfo, ApiError> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let id = text("x-user-id")
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Not authenticated"))?;
    let mut user = UserInfo::new(id);
    if let Some(name) = text("x-user-name") {
        user = user.with_name(name);
    }
    if let Some(role) = text("x-user-role") {
        user = user.with_role(role);
    }
    user.email = text("x-user-email");
    Ok(user)
}

/// Pull a direct `model_item` out of the body and attach it to the request context
pub fn take_direct_model(
    ctx: RequestContext,
    body: &mut Value,
) -> Result<RequestContext, ApiError> {
    let Some(item) = body.as_object_mut().and_then(|map| map.remove("model_item")) else {
        return Ok(ctx);
    };
    if !item.get("direct").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(ctx);
    }
    let model: ModelDescriptor = serde_json::from_value(item).map_err(|e| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid model_item: {}", e))
    })?;
    Ok(ctx.direct_to(model))
}

// =============================================================================
// Handlers
// =============================================================================

async fn completions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Result<Response, ApiError> {
    let user = user_from_headers(&headers)?;
    let ctx = take_direct_model(RequestContext::new().with_headers(headers), &mut body)?;
    let payload: ChatPayload = serde_json::from_value(body).map_err(|e| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid chat payload: {}", e))
    })?;

    let payload = state.completions.process_inlet(&ctx, payload, &user).await?;
    let completion = state
        .completions
        .dispatch(&ctx, payload, &user, false)
        .await?;

    match completion {
        Completion::Json(value) => Ok(Json(value).into_response()),
        Completion::Stream(stream) => Response::builder()
            .header(header::CONTENT_TYPE, chatrelay_core::sse::EVENT_STREAM)
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(stream))
            .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn completed_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let user = user_from_headers(&headers)?;
    let ctx = RequestContext::new().with_headers(headers);
    let outcome = state.completions.chat_completed(&ctx, body, &user).await?;
    Ok(Json(outcome.to_value()))
}

async fn action_handler(
    State(state): State<AppState>,
    Path(action_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let user = user_from_headers(&headers)?;
    let ctx = RequestContext::new().with_headers(headers);
    let outcome = state.actions.invoke(&ctx, &action_id, body, &user).await?;
    Ok(Json(outcome.to_value()))
}

async fn worker_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.worker_token.as_deref() {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if presented != Some(expected) {
            tracing::warn!("Worker connection rejected: bad or missing token");
            return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid worker token"));
        }
    }
    match ws {
        Ok(ws) => Ok(ws.on_upgrade(move |socket| run_worker_session(socket, state.worker))),
        Err(rejection) => Ok(rejection.into_response()),
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": true,
        "worker_attached": state.worker.is_attached(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
