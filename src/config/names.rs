// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Well-known bucket names, subjects, header keys, and name derivation rules
// shared by the recording, buffering, and playback flows.

use std::time::Duration;

/// Default JetStream bucket holding session metadata.
pub const SESSION_BUCKET: &str = "streams_session";
/// Default JetStream bucket holding device profiles.
pub const DEVICE_BUCKET: &str = "streams_devices";
/// Default JetStream bucket holding controller state snapshots.
pub const STATE_BUCKET: &str = "streams_record_state";

/// Default subject the controller answers commands on.
pub const RECORD_RPC_SUBJECT: &str = "streams.record.rpc";
/// Queue group shared by controller instances on the command subject.
pub const RECORD_CONTROLLER_QUEUE_GROUP: &str = "streams-record-controller";
/// Base subject carrying live device telemetry.
pub const MONITOR_SUBJECT: &str = "monitor";
/// Prefix of per-session stream subjects.
pub const SESSION_SUBJECT_PREFIX: &str = "session";
/// Prefix of per-device buffer subjects.
pub const BUFFER_SUBJECT_PREFIX: &str = "buffer";
/// Default target subject for session playback.
pub const PLAYBACK_SUBJECT: &str = "streams.playback";
/// Default subject the replay relay consumes ObjectLink frames from.
pub const REPLAY_OLINK_SUBJECT: &str = "replay.olink";

// Header keys stamped onto captured, buffered, and replayed messages.
pub const HEADER_DEVICE: &str = "X-Streams-Device";
pub const HEADER_SESSION: &str = "X-Streams-Session";
pub const HEADER_FILE: &str = "X-Streams-File";
pub const HEADER_RECORDED_AT: &str = "X-Streams-Recorded-At";
pub const HEADER_REPLAYED_AT: &str = "X-Streams-Replayed-At";
pub const HEADER_BUFFERED_AT: &str = "X-Streams-Buffered-At";
pub const HEADER_DEADLINE: &str = "X-Streams-Deadline";
pub const HEADER_PRE_ROLL: &str = "X-Streams-PreRoll";

/// Interval at which the buffer runner reloads device windows.
pub const BUFFER_REFRESH: Duration = Duration::from_secs(15);

/// Uppercases an identifier and maps `-` and `.` to `_` so it is safe in
/// stream and consumer names.
pub fn sanitize_id(id: &str) -> String {
    id.to_uppercase().replace(['-', '.'], "_")
}

/// Subject a session's messages are persisted under.
pub fn session_subject(session_id: &str) -> String {
    if session_id.is_empty() {
        return SESSION_SUBJECT_PREFIX.to_string();
    }
    format!("{SESSION_SUBJECT_PREFIX}.{session_id}")
}

/// Device-scoped subject under the given base subject.
pub fn device_subject(base: &str, device_id: &str) -> String {
    if base.is_empty() || device_id.is_empty() {
        return base.to_string();
    }
    format!("{base}.{device_id}")
}

pub fn subject_join(parts: &[&str]) -> String {
    parts.join(".")
}

/// Stream name for a session.
pub fn session_stream_name(session_id: &str) -> String {
    format!("STREAMS_{}", sanitize_id(session_id))
}

/// Subject of a device's rolling buffer.
pub fn buffer_subject_name(device_id: &str) -> String {
    format!("{BUFFER_SUBJECT_PREFIX}.{}", sanitize_id(device_id))
}

/// Stream name of a device's rolling buffer.
pub fn buffer_stream_name(device_id: &str) -> String {
    format!("STREAMS_BUFFER_{}", sanitize_id(device_id))
}

/// Durable consumer name for a session export.
pub fn export_consumer_name(session_id: &str) -> String {
    format!("EXP_{}", sanitize_id(session_id))
}

/// Durable consumer name for a playback pass. The nanosecond suffix keeps
/// repeated playbacks of the same session from colliding.
pub fn playback_consumer_name(session_id: &str) -> String {
    format!("PB_{}_{}", sanitize_id(session_id), now_nanos())
}

/// Durable consumer name for a buffer replay pass.
pub fn buffer_replay_consumer_name(device_id: &str) -> String {
    format!("BUFREP_{}_{}", sanitize_id(device_id), now_nanos())
}

fn now_nanos() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}
