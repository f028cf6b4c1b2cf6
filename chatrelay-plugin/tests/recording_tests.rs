// ABOUTME: Tests for the recording test helpers themselves
// ABOUTME: Call logs, failing entrypoints, trace transforms, and the recording sink

use chatrelay_plugin::testing::{append_trace, failing, recording_with, CallLog, RecordingSink};
use chatrelay_plugin::{BoundArgs, EventCaller, EventEmitter, EventSink, MetadataContext};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_call_log_keeps_invocation_order() {
    let log = CallLog::new();
    let first = recording_with("first", &["body"], &log, append_trace("first"));
    let second = recording_with("second", &["body"], &log, append_trace("second"));

    let body = first.invoke(BoundArgs::new(json!({}))).await.unwrap();
    let body = second.invoke(BoundArgs::new(body)).await.unwrap();

    assert_eq!(body["trace"], json!(["first", "second"]));
    assert_eq!(log.labels(), vec!["first", "second"]);
    assert_eq!(log.calls()[1].body["trace"], json!(["first"]));
}

#[tokio::test]
async fn test_failing_entrypoint_records_then_errors() {
    let log = CallLog::new();
    let entry = failing("boom", &["body"], &log, "refused");

    let err = entry.invoke(BoundArgs::new(json!({}))).await.unwrap_err();

    assert_eq!(err.to_string(), "refused");
    assert_eq!(log.len(), 1);
}

#[test]
fn test_append_trace_rejects_non_object_body() {
    let tag = append_trace("t");
    assert!(tag(json!([1, 2])).is_err());
    assert!(tag(json!({"trace": "flat"})).is_err());
}

#[tokio::test]
async fn test_recording_sink_acknowledges_calls() {
    let sink = Arc::new(RecordingSink::new().acknowledge_with(json!({"ok": 1})));
    let metadata = MetadataContext {
        chat_id: Some("c1".to_string()),
        ..Default::default()
    };
    let emitter = EventEmitter::new(sink.clone(), metadata.clone());
    let caller = EventCaller::new(sink.clone(), metadata);

    emitter.emit(json!({"type": "status"})).await.unwrap();
    let ack = caller.call(json!({"type": "input"})).await.unwrap();

    assert_eq!(ack, json!({"ok": 1}));
    assert_eq!(sink.emitted().len(), 1);
    assert_eq!(sink.calls()[0].0.chat_id.as_deref(), Some("c1"));
    assert_eq!(sink.calls()[0].1["type"], "input");
    // Direct use of the trait object works the same
    let direct: Arc<dyn EventSink> = sink.clone();
    direct.emit(&MetadataContext::default(), json!({})).await.unwrap();
    assert_eq!(sink.emitted().len(), 2);
}
