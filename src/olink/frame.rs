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

// ObjectLink protocol frames. On the wire a frame is a heterogeneous JSON
// array whose first element tags the message type, either as the protocol's
// numeric code or as a lowercase name. The relay only needs decoding, the
// target object id, and a canonical re-encoding.

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};

// Numeric message-type codes of the ObjectLink core protocol.
const MSG_LINK: i64 = 10;
const MSG_INIT: i64 = 11;
const MSG_UNLINK: i64 = 12;
const MSG_SET_PROPERTY: i64 = 20;
const MSG_PROPERTY_CHANGE: i64 = 21;
const MSG_INVOKE: i64 = 30;
const MSG_INVOKE_REPLY: i64 = 31;
const MSG_SIGNAL: i64 = 40;
const MSG_ERROR: i64 = 90;

/// A decoded ObjectLink frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Link { object_id: String },
    Unlink { object_id: String },
    Init { object_id: String, props: Map<String, Value> },
    SetProperty { property_id: String, value: Value },
    PropertyChange { property_id: String, value: Value },
    Invoke { request_id: i64, method_id: String, args: Vec<Value> },
    InvokeReply { request_id: i64, method_id: String, value: Value },
    Signal { signal_id: String, args: Vec<Value> },
    Error { msg_type: i64, request_id: i64, error: String },
}

/// Splits a symbol id of the form `<objectId>/<member>`; an id without a
/// member part yields the whole id and an empty member.
pub fn symbol_to_parts(symbol_id: &str) -> (&str, &str) {
    match symbol_id.split_once('/') {
        Some((object, member)) => (object, member),
        None => (symbol_id, ""),
    }
}

impl Frame {
    /// Decodes a frame from its JSON wire form.
    pub fn decode(data: &[u8]) -> Result<Frame> {
        let value: Value = serde_json::from_slice(data)?;
        let Value::Array(items) = value else {
            bail!("frame must be an array");
        };
        if items.is_empty() {
            bail!("frame is empty");
        }
        let code = tag_code(&items[0])?;

        match code {
            MSG_LINK => Ok(Frame::Link {
                object_id: as_string(items.get(1), "object id")?,
            }),
            MSG_UNLINK => Ok(Frame::Unlink {
                object_id: as_string(items.get(1), "object id")?,
            }),
            MSG_INIT => Ok(Frame::Init {
                object_id: as_string(items.get(1), "object id")?,
                props: as_map(items.get(2))?,
            }),
            MSG_SET_PROPERTY => Ok(Frame::SetProperty {
                property_id: as_string(items.get(1), "property id")?,
                value: items.get(2).cloned().unwrap_or(Value::Null),
            }),
            MSG_PROPERTY_CHANGE => Ok(Frame::PropertyChange {
                property_id: as_string(items.get(1), "property id")?,
                value: items.get(2).cloned().unwrap_or(Value::Null),
            }),
            MSG_INVOKE => Ok(Frame::Invoke {
                request_id: as_i64(items.get(1), "request id")?,
                method_id: as_string(items.get(2), "method id")?,
                args: as_vec(items.get(3)),
            }),
            MSG_INVOKE_REPLY => Ok(Frame::InvokeReply {
                request_id: as_i64(items.get(1), "request id")?,
                method_id: as_string(items.get(2), "method id")?,
                value: items.get(3).cloned().unwrap_or(Value::Null),
            }),
            MSG_SIGNAL => Ok(Frame::Signal {
                signal_id: as_string(items.get(1), "signal id")?,
                args: as_vec(items.get(2)),
            }),
            MSG_ERROR => Ok(Frame::Error {
                msg_type: as_i64(items.get(1), "message type")?,
                request_id: as_i64(items.get(2), "request id")?,
                error: as_string(items.get(3), "error")?,
            }),
            other => bail!("unknown message type {other}"),
        }
    }

    /// Encodes the frame into its JSON wire form with numeric type codes.
    pub fn encode(&self) -> Vec<u8> {
        let value = match self {
            Frame::Link { object_id } => json!([MSG_LINK, object_id]),
            Frame::Unlink { object_id } => json!([MSG_UNLINK, object_id]),
            Frame::Init { object_id, props } => json!([MSG_INIT, object_id, props]),
            Frame::SetProperty { property_id, value } => {
                json!([MSG_SET_PROPERTY, property_id, value])
            }
            Frame::PropertyChange { property_id, value } => {
                json!([MSG_PROPERTY_CHANGE, property_id, value])
            }
            Frame::Invoke {
                request_id,
                method_id,
                args,
            } => json!([MSG_INVOKE, request_id, method_id, args]),
            Frame::InvokeReply {
                request_id,
                method_id,
                value,
            } => json!([MSG_INVOKE_REPLY, request_id, method_id, value]),
            Frame::Signal { signal_id, args } => json!([MSG_SIGNAL, signal_id, args]),
            Frame::Error {
                msg_type,
                request_id,
                error,
            } => json!([MSG_ERROR, msg_type, request_id, error]),
        };
        serde_json::to_vec(&value).unwrap_or_default()
    }

    /// The id of the object the frame targets; None for error frames.
    pub fn object_id(&self) -> Option<&str> {
        match self {
            Frame::Link { object_id }
            | Frame::Unlink { object_id }
            | Frame::Init { object_id, .. } => Some(object_id),
            Frame::SetProperty { property_id, .. }
            | Frame::PropertyChange { property_id, .. } => {
                Some(symbol_to_parts(property_id).0)
            }
            Frame::Invoke { method_id, .. } | Frame::InvokeReply { method_id, .. } => {
                Some(symbol_to_parts(method_id).0)
            }
            Frame::Signal { signal_id, .. } => Some(symbol_to_parts(signal_id).0),
            Frame::Error { .. } => None,
        }
    }
}

fn tag_code(tag: &Value) -> Result<i64> {
    match tag {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| anyhow::anyhow!("invalid message type {n}")),
        Value::String(name) => match name.as_str() {
            "link" => Ok(MSG_LINK),
            "unlink" => Ok(MSG_UNLINK),
            "init" => Ok(MSG_INIT),
            "set" => Ok(MSG_SET_PROPERTY),
            "change" => Ok(MSG_PROPERTY_CHANGE),
            "invoke" => Ok(MSG_INVOKE),
            "reply" => Ok(MSG_INVOKE_REPLY),
            "signal" => Ok(MSG_SIGNAL),
            "error" => Ok(MSG_ERROR),
            other => bail!("unknown message type {other:?}"),
        },
        other => bail!("invalid message type tag {other}"),
    }
}

fn as_string(value: Option<&Value>, what: &str) -> Result<String> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => bail!("missing or invalid {what}"),
    }
}

fn as_i64(value: Option<&Value>, what: &str) -> Result<i64> {
    match value.and_then(Value::as_i64) {
        Some(n) => Ok(n),
        None => bail!("missing or invalid {what}"),
    }
}

fn as_map(value: Option<&Value>) -> Result<Map<String, Value>> {
    match value {
        Some(Value::Object(map)) => Ok(map.clone()),
        None => Ok(Map::new()),
        _ => bail!("invalid property map"),
    }
}

fn as_vec(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}
