// ABOUTME: Test helpers for code that invokes plugins.
// ABOUTME: Recording entrypoints, call logs, and a recording event sink.

mod recording;

pub use recording::{
    append_trace, failing, recording, recording_with, CallLog, RecordedCall, RecordingSink,
};
