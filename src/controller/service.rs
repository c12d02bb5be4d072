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

// Request/reply controller owning the recording-job lifecycle. Listens on a
// well-known command subject, drives per-session recorder tasks, and keeps a
// durable state snapshot per session in a key-value bucket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_nats::jetstream;
use async_nats::jetstream::kv::Store;
use async_nats::{Client, Message};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{self, BusError};
use crate::config::names;
use crate::session::{self, Metadata};
use crate::store::DeviceStore;

use super::command::{
    RpcRequest, RpcResponse, StartCommand, StateSnapshot, Status, ACTION_START, ACTION_STOP,
};

/// Configures the controller runtime.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub server_url: String,
    pub command_subject: String,
    pub state_bucket: String,
}

impl ControllerOptions {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            command_subject: names::RECORD_RPC_SUBJECT.to_string(),
            state_bucket: names::STATE_BUCKET.to_string(),
        }
    }
}

struct RecordJob {
    cancel: CancellationToken,
    done: CancellationToken,
}

struct Inner {
    client: Client,
    js: jetstream::Context,
    opts: ControllerOptions,
    state_kv: Store,
    jobs: Mutex<HashMap<String, RecordJob>>,
}

/// The record controller. Cheap to clone; all clones share one job table.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
    loop_cancel: CancellationToken,
}

impl Controller {
    /// Creates a controller, ensuring the state bucket exists.
    pub async fn new(
        client: Client,
        js: jetstream::Context,
        mut opts: ControllerOptions,
    ) -> Result<Self> {
        if opts.server_url.is_empty() {
            bail!("server URL is required");
        }
        if opts.command_subject.is_empty() {
            opts.command_subject = names::RECORD_RPC_SUBJECT.to_string();
        }
        if opts.state_bucket.is_empty() {
            opts.state_bucket = names::STATE_BUCKET.to_string();
        }

        let state_kv = bus::ensure_key_value(&js, &opts.state_bucket)
            .await
            .with_context(|| format!("state bucket {}", opts.state_bucket))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                js,
                opts,
                state_kv,
                jobs: Mutex::new(HashMap::new()),
            }),
            loop_cancel: CancellationToken::new(),
        })
    }

    /// Begins listening for RPC commands on the configured subject. Returns
    /// once the subscription is established; command handling continues in a
    /// background task until [`Controller::close`].
    pub async fn start(&self) -> Result<()> {
        let subject = self.inner.opts.command_subject.clone();
        let mut sub = self
            .inner
            .client
            .queue_subscribe(subject.clone(), names::RECORD_CONTROLLER_QUEUE_GROUP.to_string())
            .await
            .with_context(|| format!("subscribe {subject}"))?;

        let inner = self.inner.clone();
        let cancel = self.loop_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = sub.unsubscribe().await;
                        break;
                    }
                    msg = sub.next() => {
                        let Some(msg) = msg else { break };
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            handle_msg(inner, msg).await;
                        });
                    }
                }
            }
        });

        info!("record controller started subject={}", subject);
        Ok(())
    }

    /// Gracefully shuts down the controller: stops listening and cancels all
    /// in-flight jobs, awaiting their completion.
    pub async fn close(&self) {
        self.loop_cancel.cancel();
        stop_all(&self.inner).await;
    }

    /// Reads the durable state snapshot of a session.
    pub async fn state(&self, session_id: &str) -> Result<StateSnapshot> {
        load_state(&self.inner, session_id).await
    }
}

async fn stop_all(inner: &Arc<Inner>) {
    let drained: Vec<RecordJob> = {
        let mut jobs = inner.jobs.lock().await;
        jobs.drain().map(|(_, job)| job).collect()
    };
    for job in drained {
        job.cancel.cancel();
        job.done.cancelled().await;
    }
}

async fn handle_msg(inner: Arc<Inner>, msg: Message) {
    let req: RpcRequest = match serde_json::from_slice(&msg.payload) {
        Ok(req) => req,
        Err(err) => {
            error!("invalid command payload: {}", err);
            respond(
                &inner,
                &msg,
                RpcResponse::error(format!("invalid command payload: {err}"), ""),
            )
            .await;
            return;
        }
    };

    match req.action.to_lowercase().as_str() {
        ACTION_START => {
            debug!(
                "handling start command session={} device={}",
                req.session_id, req.device_id
            );
            let resp = handle_start(&inner, req).await;
            respond(&inner, &msg, resp).await;
        }
        ACTION_STOP => {
            debug!("handling stop command session={}", req.session_id);
            let resp = handle_stop(&inner, req).await;
            respond(&inner, &msg, resp).await;
        }
        other => {
            warn!("unknown controller action {:?}", other);
            respond(
                &inner,
                &msg,
                RpcResponse::error(format!("unknown action {other:?}"), req.session_id),
            )
            .await;
        }
    }
}

async fn handle_start(inner: &Arc<Inner>, req: RpcRequest) -> RpcResponse {
    let start = match req.normalize_start() {
        Ok(start) => start,
        Err(err) => {
            warn!("start command invalid: {}", err);
            return RpcResponse::error(err.to_string(), req.session_id.trim());
        }
    };

    if let Some(pre_roll) = start.pre_roll {
        let window = match lookup_buffer_window(inner, &start.device_bucket, &start.device_id).await
        {
            Ok(window) => window,
            Err(err) => return RpcResponse::error(err.to_string(), start.session_id),
        };
        if pre_roll > window {
            return RpcResponse::error(
                format!(
                    "pre-roll {} exceeds buffer window {}",
                    humantime::format_duration(pre_roll),
                    humantime::format_duration(window)
                ),
                start.session_id,
            );
        }
    }

    let job = RecordJob {
        cancel: CancellationToken::new(),
        done: CancellationToken::new(),
    };
    let cancel = job.cancel.clone();
    let done = job.done.clone();

    {
        let mut jobs = inner.jobs.lock().await;
        if jobs.contains_key(&start.session_id) {
            warn!(
                "start command rejected: session {} already running",
                start.session_id
            );
            return RpcResponse::error(
                format!("session {} already running", start.session_id),
                start.session_id,
            );
        }
        jobs.insert(start.session_id.clone(), job);
    }

    let started = Utc::now();
    let state = StateSnapshot {
        session_id: start.session_id.clone(),
        device_id: start.device_id.clone(),
        subject: start.subject.clone(),
        status: Status::Running,
        message_count: 0,
        started_at: Some(started),
        ..Default::default()
    };
    if let Err(err) = write_state(inner, state.clone()).await {
        error!("write state failed session={}: {}", start.session_id, err);
    }

    {
        let inner = inner.clone();
        let start_cmd = start.clone();
        tokio::spawn(async move {
            run_record(inner, cancel, done, start_cmd, started).await;
        });
    }

    info!(
        "recording job launched session={} device={}",
        start.session_id, start.device_id
    );
    RpcResponse {
        ok: true,
        message: "recording started".to_string(),
        session_id: start.session_id,
        state: Some(state),
    }
}

async fn run_record(
    inner: Arc<Inner>,
    cancel: CancellationToken,
    done: CancellationToken,
    start: StartCommand,
    started: chrono::DateTime<Utc>,
) {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<Metadata>();

    let progress_task = {
        let inner = inner.clone();
        tokio::spawn(async move {
            while let Some(meta) = progress_rx.recv().await {
                let snap = StateSnapshot {
                    session_id: meta.session_id.clone(),
                    device_id: meta.device_id.clone(),
                    subject: meta.source_subject.clone(),
                    status: Status::Running,
                    message_count: meta.message_count,
                    started_at: Some(started),
                    last_message_at: Some(meta.end),
                    ..Default::default()
                };
                if let Err(err) = write_state(&inner, snap).await {
                    error!("progress state write failed: {}", err);
                }
            }
        })
    };

    let opts = session::RecordOptions {
        server_url: inner.opts.server_url.clone(),
        subject: start.subject.clone(),
        device_id: start.device_id.clone(),
        session_id: start.session_id.clone(),
        retention: start.retention,
        pre_roll: start.pre_roll,
        session_bucket: start.session_bucket.clone(),
        device_bucket: start.device_bucket.clone(),
        device: start.device.clone(),
        verbose: start.verbose,
        progress: Some(progress_tx),
    };

    let result = session::record(cancel, opts).await;
    let _ = progress_task.await;

    let mut state = StateSnapshot {
        session_id: start.session_id.clone(),
        device_id: start.device_id.clone(),
        subject: start.subject.clone(),
        started_at: Some(started),
        last_message_at: Some(Utc::now()),
        ..Default::default()
    };

    match result {
        Ok(meta) => {
            state.status = Status::Stopped;
            state.message_count = meta.message_count;
            state.device_id = meta.device_id;
            state.subject = meta.source_subject;
            state.last_message_at = Some(meta.end);
        }
        Err(err) => {
            if matches!(err.downcast_ref::<BusError>(), Some(BusError::Canceled)) {
                state.status = Status::Stopped;
            } else {
                state.status = Status::Error;
                state.last_error = err.to_string();
            }
        }
    }

    if let Err(err) = write_state(&inner, state).await {
        error!("final state write failed session={}: {}", start.session_id, err);
    }

    {
        let mut jobs = inner.jobs.lock().await;
        jobs.remove(&start.session_id);
    }
    done.cancel();
}

async fn lookup_buffer_window(
    inner: &Arc<Inner>,
    bucket: &str,
    device_id: &str,
) -> Result<Duration> {
    let devices = DeviceStore::new(&inner.js, bucket)
        .await
        .context("buffer lookup")?;
    let info = match devices.get(device_id).await {
        Ok(info) => info,
        Err(_) => bail!("device buffer not configured"),
    };
    if info.buffer_duration.is_empty() {
        bail!("device buffer not configured");
    }
    let window = match humantime::parse_duration(&info.buffer_duration) {
        Ok(window) => window,
        Err(err) => bail!("invalid device buffer duration: {err}"),
    };
    if window.is_zero() {
        bail!("device buffer duration not positive");
    }
    Ok(window)
}

async fn handle_stop(inner: &Arc<Inner>, req: RpcRequest) -> RpcResponse {
    let session_id = req.session_id.trim().to_string();
    if session_id.is_empty() {
        return RpcResponse::error("session-id cannot be empty", "");
    }

    let job = {
        let jobs = inner.jobs.lock().await;
        jobs.get(&session_id)
            .map(|job| (job.cancel.clone(), job.done.clone()))
    };

    let Some((cancel, done)) = job else {
        // Nothing running, but transition the durable state to stopped.
        let mut snap = match load_state(inner, &session_id).await {
            Ok(snap) => snap,
            Err(err) => {
                error!("load state failed session={}: {}", session_id, err);
                return RpcResponse::error(format!("load state: {err}"), session_id);
            }
        };
        snap.status = Status::Stopped;
        snap.last_error = String::new();
        if snap.started_at.is_none() {
            snap.started_at = Some(Utc::now());
        }
        if let Err(err) = write_state(inner, snap).await {
            error!("write state failed session={}: {}", session_id, err);
        }
        return RpcResponse {
            ok: true,
            message: "no active recording".to_string(),
            session_id,
            state: None,
        };
    };

    cancel.cancel();
    done.cancelled().await;

    info!("recording job signaled to stop session={}", session_id);
    RpcResponse {
        ok: true,
        message: "recording stopped".to_string(),
        session_id,
        state: None,
    }
}

async fn respond(inner: &Arc<Inner>, msg: &Message, mut resp: RpcResponse) {
    if !resp.ok && resp.message.is_empty() {
        resp.message = "command failed".to_string();
    }
    let Some(reply) = msg.reply.clone() else {
        debug!("command without reply subject session={}", resp.session_id);
        return;
    };
    let data = match serde_json::to_vec(&resp) {
        Ok(data) => data,
        Err(err) => {
            error!("encode response failed: {}", err);
            return;
        }
    };
    debug!("command response session={} ok={}", resp.session_id, resp.ok);
    if let Err(err) = inner.client.publish(reply, Bytes::from(data)).await {
        error!("send response failed: {}", err);
    }
}

/// Persists a state snapshot, merging in previously stored fields the writer
/// did not populate. Writes come from several code paths; the merge keeps a
/// partial writer from blanking the snapshot.
async fn write_state(inner: &Arc<Inner>, mut state: StateSnapshot) -> Result<()> {
    if state.session_id.is_empty() {
        bail!("state missing session id");
    }
    if state.subject.is_empty() || state.device_id.is_empty() {
        if let Ok(prev) = load_state(inner, &state.session_id).await {
            if state.subject.is_empty() {
                state.subject = prev.subject;
            }
            if state.device_id.is_empty() {
                state.device_id = prev.device_id;
            }
            if state.message_count == 0 {
                state.message_count = prev.message_count;
            }
            if state.started_at.is_none() {
                state.started_at = prev.started_at;
            }
            if state.last_message_at.is_none() {
                state.last_message_at = prev.last_message_at;
            }
        }
    }
    state.updated_at = Some(Utc::now());
    let data = Bytes::from(serde_json::to_vec(&state)?);
    inner
        .state_kv
        .put(&state.session_id, data)
        .await
        .map_err(|err| BusError::Other(err.to_string()))?;
    Ok(())
}

async fn load_state(inner: &Arc<Inner>, session_id: &str) -> Result<StateSnapshot> {
    let entry = inner
        .state_kv
        .entry(session_id)
        .await
        .map_err(|err| BusError::Other(err.to_string()))?;
    let Some(entry) = entry else {
        return Ok(StateSnapshot {
            session_id: session_id.to_string(),
            ..Default::default()
        });
    };
    let snap: StateSnapshot =
        serde_json::from_slice(&entry.value).context("decode state snapshot")?;
    Ok(snap)
}
