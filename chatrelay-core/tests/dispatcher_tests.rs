// ABOUTME: End-to-end tests for CompletionDispatcher across both transports.
// ABOUTME: Remote stub service and scripted worker stand in for the real backends.

mod common;

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chatrelay_core::catalog::{ModelCatalog, StaticModelCatalog};
use chatrelay_core::config::{RelayConfig, TransportMode};
use chatrelay_core::dispatcher::CompletionDispatcher;
use chatrelay_core::payload::{ChatMessage, ChatPayload};
use chatrelay_core::services::RelayServices;
use chatrelay_core::{Completion, HookOutcome, InMemoryEventBus, RelayError};
use chatrelay_plugin::testing::{append_trace, failing, recording_with, CallLog};
use chatrelay_plugin::{
    ContextParam, FunctionModule, InMemoryFunctionStore, ModelDescriptor, RequestContext, UserInfo,
};
use common::{serve, spawn_worker, Captured, WorkerReply};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn remote_stub(captured: Captured) -> String {
    let app = Router::new().route(
        "/api/chat",
        post(move |headers: HeaderMap, Json(request): Json<Value>| {
            let captured = captured.clone();
            async move {
                let stream = request["stream"].as_bool().unwrap_or(false);
                let model = request["model"].as_str().unwrap_or_default().to_string();
                captured.push(headers, request);
                if stream {
                    (
                        [(CONTENT_TYPE, "text/event-stream")],
                        format!("{{\"model\":\"{}\"}}\n[DONE]\n", model),
                    )
                } else {
                    (
                        [(CONTENT_TYPE, "application/json")],
                        json!({"choices": [{"message": {"content": "hello"}}]}).to_string(),
                    )
                }
            }
        }),
    );
    format!("{}/api/chat", serve(app).await)
}

fn models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("m1"),
        ModelDescriptor::new("m2"),
        ModelDescriptor::new("arena-1")
            .owned_by("arena")
            .with_info(json!({"meta": {"model_ids": ["m2"]}})),
    ]
}

struct Harness {
    dispatcher: CompletionDispatcher,
    captured: Captured,
    worker: common::WorkerLog,
}

async fn harness(mode: TransportMode, catalog: StaticModelCatalog, store: InMemoryFunctionStore) -> Harness {
    let captured = Captured::default();
    let url = remote_stub(captured.clone()).await;
    let (bus, link) = InMemoryEventBus::new();
    let worker = spawn_worker(link, |event| {
        let stream = event["data"]["form_data"]["stream"].as_bool().unwrap_or(false);
        if stream {
            WorkerReply::streaming(
                json!({"status": true}),
                vec![json!({"from": "worker"}), json!({"done": true})],
            )
        } else {
            WorkerReply::ack(json!({"from": "worker"}))
        }
    });
    let services = Arc::new(RelayServices::new(
        RelayConfig::default().with_remote_url(url).with_mode(mode),
        Arc::new(catalog),
        Arc::new(store),
        bus,
    ));
    Harness {
        dispatcher: CompletionDispatcher::new(services).unwrap(),
        captured,
        worker,
    }
}

fn hello(model: &str) -> ChatPayload {
    ChatPayload::new(model).with_message(ChatMessage::new("user", "hi"))
}

#[tokio::test]
async fn test_remote_result_returned_unchanged() {
    let h = harness(
        TransportMode::Remote,
        StaticModelCatalog::new(models()),
        InMemoryFunctionStore::new(),
    )
    .await;

    let result = h
        .dispatcher
        .dispatch(&RequestContext::new(), hello("m1"), &UserInfo::new("u1"), false)
        .await
        .unwrap();

    assert_eq!(
        result.into_json().unwrap(),
        json!({"choices": [{"message": {"content": "hello"}}]})
    );
}

#[tokio::test]
async fn test_unknown_model_fails_before_transport() {
    let h = harness(
        TransportMode::Remote,
        StaticModelCatalog::new(models()),
        InMemoryFunctionStore::new(),
    )
    .await;

    let err = h
        .dispatcher
        .dispatch(&RequestContext::new(), hello("ghost"), &UserInfo::new("u1"), false)
        .await
        .unwrap_err();

    assert_eq!(err, RelayError::model_not_found());
    assert!(h.captured.all().is_empty());
}

#[tokio::test]
async fn test_request_scoped_metadata_wins() {
    let h = harness(
        TransportMode::Remote,
        StaticModelCatalog::new(models()),
        InMemoryFunctionStore::new(),
    )
    .await;
    let mut body_metadata = Map::new();
    body_metadata.insert("chat_id".into(), json!("from-body"));
    body_metadata.insert("message_id".into(), json!("msg-1"));
    let mut scoped = Map::new();
    scoped.insert("chat_id".into(), json!("from-request"));
    let ctx = RequestContext::new()
        .with_metadata(scoped)
        .with_header("authorization", "Bearer t");

    h.dispatcher
        .dispatch(
            &ctx,
            hello("m1").with_metadata(body_metadata),
            &UserInfo::new("u1"),
            false,
        )
        .await
        .unwrap();

    let (headers, body) = h.captured.all().remove(0);
    assert_eq!(body["metadata"]["chat_id"], "from-request");
    assert_eq!(body["metadata"]["message_id"], "msg-1");
    assert_eq!(headers["authorization"], "Bearer t");
}

#[tokio::test]
async fn test_remote_mode_ignores_direct_flag() {
    let h = harness(
        TransportMode::Remote,
        StaticModelCatalog::new(models()),
        InMemoryFunctionStore::new(),
    )
    .await;
    let ctx = RequestContext::new().direct_to(ModelDescriptor::new("private"));

    let result = h
        .dispatcher
        .dispatch(&ctx, hello("private"), &UserInfo::new("u1"), false)
        .await
        .unwrap();

    assert!(result.into_json().unwrap().get("choices").is_some());
    assert!(h.worker.calls().is_empty());
}

#[tokio::test]
async fn test_auto_mode_direct_flag_uses_worker() {
    let h = harness(
        TransportMode::Auto,
        StaticModelCatalog::new(models()),
        InMemoryFunctionStore::new(),
    )
    .await;
    let ctx = RequestContext::new().direct_to(ModelDescriptor::new("private"));

    let json_result = h
        .dispatcher
        .dispatch(&ctx, hello("private"), &UserInfo::new("u1"), false)
        .await
        .unwrap();
    let stream_result = h
        .dispatcher
        .dispatch(&ctx, hello("private").streaming(true), &UserInfo::new("u1"), false)
        .await
        .unwrap();

    assert_eq!(json_result.into_json().unwrap(), json!({"from": "worker"}));
    let text = stream_result
        .into_stream()
        .unwrap()
        .collect_text()
        .await
        .unwrap();
    assert_eq!(text, "data: {\"from\":\"worker\"}\n\n");
    assert!(h.captured.all().is_empty());
    assert_eq!(h.worker.calls().len(), 2);
}

#[tokio::test]
async fn test_auto_mode_access_control() {
    let catalog =
        StaticModelCatalog::new(models()).restrict("m1", vec!["trusted".to_string()]);
    let h = harness(TransportMode::Auto, catalog, InMemoryFunctionStore::new()).await;
    let ctx = RequestContext::new();

    let denied = h
        .dispatcher
        .dispatch(&ctx, hello("m1"), &UserInfo::new("u1"), false)
        .await
        .unwrap_err();
    assert_eq!(denied, RelayError::model_not_found());

    // Trusted users, admins, and internal re-dispatch all get through
    for (user, bypass) in [
        (UserInfo::new("trusted"), false),
        (UserInfo::new("u1").with_role("admin"), false),
        (UserInfo::new("u1"), true),
    ] {
        h.dispatcher
            .dispatch(&ctx, hello("m1"), &user, bypass)
            .await
            .unwrap();
    }
    assert_eq!(h.captured.all().len(), 3);
}

#[tokio::test]
async fn test_arena_tags_json_result() {
    let h = harness(
        TransportMode::Auto,
        StaticModelCatalog::new(models()),
        InMemoryFunctionStore::new(),
    )
    .await;

    let result = h
        .dispatcher
        .dispatch(&RequestContext::new(), hello("arena-1"), &UserInfo::new("u1"), false)
        .await
        .unwrap()
        .into_json()
        .unwrap();

    assert_eq!(result["selected_model_id"], "m2");
    assert_eq!(h.captured.last_body()["model"], "m2");
}

#[tokio::test]
async fn test_arena_listing_unknown_model_is_not_found() {
    let mut catalog = models();
    catalog.push(
        ModelDescriptor::new("arena-ghost")
            .owned_by("arena")
            .with_info(json!({"meta": {"model_ids": ["ghost"]}})),
    );
    let h = harness(
        TransportMode::Auto,
        StaticModelCatalog::new(catalog),
        InMemoryFunctionStore::new(),
    )
    .await;

    let err = h
        .dispatcher
        .dispatch(&RequestContext::new(), hello("arena-ghost"), &UserInfo::new("u1"), false)
        .await
        .unwrap_err();

    assert_eq!(err, RelayError::model_not_found());
    assert!(h.captured.all().is_empty());
}

#[tokio::test]
async fn test_arena_prefixes_stream() {
    let h = harness(
        TransportMode::Auto,
        StaticModelCatalog::new(models()),
        InMemoryFunctionStore::new(),
    )
    .await;

    let Completion::Stream(stream) = h
        .dispatcher
        .dispatch(
            &RequestContext::new(),
            hello("arena-1").streaming(true),
            &UserInfo::new("u1"),
            false,
        )
        .await
        .unwrap()
    else {
        panic!("expected a stream");
    };
    let text = stream.collect_text().await.unwrap();

    assert_eq!(
        text,
        "data: {\"selected_model_id\":\"m2\"}\n\n\
         data: {\"model\":\"m2\"}\n\n\
         data: [DONE]\n\n"
    );
}

#[tokio::test]
async fn test_inlet_filters_transform_before_dispatch() {
    let log = CallLog::new();
    let store = InMemoryFunctionStore::new().register(
        FunctionModule::filter("prefix").with_inlet(recording_with(
            "prefix",
            &["body", "__metadata__"],
            &log,
            |mut body: Value| {
                body["messages"][0]["content"] = json!("[ctx] hi");
                Ok(body)
            },
        )),
    );
    let h = harness(TransportMode::Remote, StaticModelCatalog::new(models()), store).await;
    let mut metadata = Map::new();
    metadata.insert("filter_ids".into(), json!(["prefix"]));
    metadata.insert("chat_id".into(), json!("c1"));

    let ctx = RequestContext::new();
    let user = UserInfo::new("u1");
    let payload = h
        .dispatcher
        .process_inlet(&ctx, hello("m1").with_metadata(metadata), &user)
        .await
        .unwrap();
    h.dispatcher.dispatch(&ctx, payload, &user, false).await.unwrap();

    assert_eq!(h.captured.last_body()["messages"][0]["content"], "[ctx] hi");
    let call = &log.calls()[0];
    assert_eq!(call.bound, vec![ContextParam::Metadata]);
}

#[tokio::test]
async fn test_inlet_abort_fails_request() {
    let log = CallLog::new();
    let store = InMemoryFunctionStore::new().register(
        FunctionModule::filter("guard").with_inlet(failing("guard", &["body"], &log, "blocked")),
    );
    let h = harness(TransportMode::Remote, StaticModelCatalog::new(models()), store).await;
    let mut metadata = Map::new();
    metadata.insert("filter_ids".into(), json!(["guard"]));

    let err = h
        .dispatcher
        .process_inlet(
            &RequestContext::new(),
            hello("m1").with_metadata(metadata),
            &UserInfo::new("u1"),
        )
        .await
        .unwrap_err();

    assert_eq!(err, RelayError::ChainAborted("blocked".to_string()));
}

#[tokio::test]
async fn test_chat_completed_runs_outlets_in_order() {
    let log = CallLog::new();
    let store = InMemoryFunctionStore::new()
        .register(
            FunctionModule::filter("a")
                .with_outlet(recording_with("a", &["body", "__metadata__"], &log, append_trace("a"))),
        )
        .register(FunctionModule::filter("b").with_outlet(recording_with(
            "b",
            &["body"],
            &log,
            append_trace("b"),
        )));
    let h = harness(TransportMode::Remote, StaticModelCatalog::new(models()), store).await;
    let body = json!({
        "model": "m1",
        "chat_id": "c1",
        "id": "msg-9",
        "session_id": "s1",
        "filter_ids": ["b", "a"],
        "messages": []
    });

    let outcome = h
        .dispatcher
        .chat_completed(&RequestContext::new(), body, &UserInfo::new("u1"))
        .await
        .unwrap();

    assert_eq!(outcome.payload().unwrap()["trace"], json!(["b", "a"]));
    assert_eq!(log.labels(), vec!["b", "a"]);
    assert!(log.calls()[1].bound.contains(&ContextParam::Metadata));
}

#[tokio::test]
async fn test_chat_completed_failure_is_a_value() {
    let log = CallLog::new();
    let store = InMemoryFunctionStore::new().register(
        FunctionModule::filter("bad").with_outlet(failing("bad", &["body"], &log, "nope")),
    );
    let h = harness(TransportMode::Remote, StaticModelCatalog::new(models()), store).await;
    let body = json!({"model": "m1", "id": "x", "filter_ids": ["bad"]});

    let outcome = h
        .dispatcher
        .chat_completed(&RequestContext::new(), body, &UserInfo::new("u1"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        HookOutcome::Failed(RelayError::ChainAborted("nope".to_string()))
    );

    let err = h
        .dispatcher
        .chat_completed(
            &RequestContext::new(),
            json!({"model": "ghost"}),
            &UserInfo::new("u1"),
        )
        .await
        .unwrap_err();
    assert_eq!(err, RelayError::model_not_found());
}

struct CountingCatalog {
    lists: AtomicUsize,
}

#[async_trait::async_trait]
impl ModelCatalog for CountingCatalog {
    async fn list_models(&self) -> anyhow::Result<Vec<ModelDescriptor>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(models())
    }
}

#[tokio::test]
async fn test_chat_completed_loads_catalog_on_demand() {
    let catalog = Arc::new(CountingCatalog {
        lists: AtomicUsize::new(0),
    });
    let (bus, _link) = InMemoryEventBus::new();
    let services = Arc::new(RelayServices::new(
        RelayConfig::default(),
        catalog.clone(),
        Arc::new(InMemoryFunctionStore::new()),
        bus,
    ));
    let dispatcher = CompletionDispatcher::new(services).unwrap();
    let body = json!({"model": "m1", "id": "x"});

    for _ in 0..3 {
        let outcome = dispatcher
            .chat_completed(&RequestContext::new(), body.clone(), &UserInfo::new("u1"))
            .await
            .unwrap();
        assert_eq!(outcome, HookOutcome::Completed(body.clone()));
    }
    assert_eq!(catalog.lists.load(Ordering::SeqCst), 1);
}
