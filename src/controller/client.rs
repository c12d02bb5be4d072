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

// Thin client side of the control plane: request/reply commands and direct
// reads of the durable state bucket.

use anyhow::{bail, Context as _, Result};
use async_nats::jetstream;
use async_nats::Client;
use bytes::Bytes;

use crate::bus::BusError;
use crate::config::names;

use super::command::{RpcRequest, RpcResponse, StateSnapshot};

/// Issues a controller command over request/reply.
pub async fn send_command(
    client: &Client,
    subject: &str,
    request: &RpcRequest,
) -> Result<RpcResponse> {
    let subject = if subject.is_empty() {
        names::RECORD_RPC_SUBJECT
    } else {
        subject
    };

    let data = serde_json::to_vec(request)?;
    let reply = client
        .request(subject.to_string(), Bytes::from(data))
        .await
        .with_context(|| format!("request {subject}"))?;

    let resp: RpcResponse =
        serde_json::from_slice(&reply.payload).context("decode controller response")?;
    Ok(resp)
}

/// Retrieves a session state snapshot from the controller state bucket.
pub async fn fetch_state(
    js: &jetstream::Context,
    bucket: &str,
    session_id: &str,
) -> Result<StateSnapshot> {
    let bucket = if bucket.is_empty() {
        names::STATE_BUCKET
    } else {
        bucket
    };
    let kv = js
        .get_key_value(bucket)
        .await
        .map_err(|_| BusError::BucketNotFound(bucket.to_string()))?;
    let entry = kv
        .entry(session_id)
        .await
        .map_err(|err| BusError::Other(err.to_string()))?;
    let Some(entry) = entry else {
        bail!(BusError::KeyNotFound(session_id.to_string()));
    };
    let snap: StateSnapshot =
        serde_json::from_slice(&entry.value).context("decode state snapshot")?;
    Ok(snap)
}
