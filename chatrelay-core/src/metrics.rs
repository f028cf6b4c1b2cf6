// ABOUTME: Metric names and recording helpers for the relay core.
// ABOUTME: Uses the metrics facade; the binary installs the Prometheus recorder.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register descriptions once at startup
pub fn describe() {
    describe_counter!(
        "chatrelay_completions_total",
        "Completions dispatched, by transport and stream mode"
    );
    describe_counter!(
        "chatrelay_upstream_errors_total",
        "Transport failures, by error kind"
    );
    describe_gauge!(
        "chatrelay_worker_channels_open",
        "Direct worker channels currently registered"
    );
    describe_counter!(
        "chatrelay_filter_aborts_total",
        "Filter chains aborted by a raising filter, by filter kind"
    );
    describe_counter!(
        "chatrelay_actions_total",
        "Action invocations, by outcome"
    );
}

pub fn record_completion(transport: &'static str, stream: bool) {
    counter!(
        "chatrelay_completions_total",
        "transport" => transport,
        "stream" => if stream { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_upstream_error(kind: &'static str) {
    counter!("chatrelay_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn channel_opened() {
    gauge!("chatrelay_worker_channels_open").increment(1.0);
}

pub fn channel_closed() {
    gauge!("chatrelay_worker_channels_open").decrement(1.0);
}

pub fn record_filter_abort(kind: &'static str) {
    counter!("chatrelay_filter_aborts_total", "kind" => kind).increment(1);
}

pub fn record_action(outcome: &'static str) {
    counter!("chatrelay_actions_total", "outcome" => outcome).increment(1);
}
