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

// The per-session recording job: captures a live device subject into a
// dedicated durable stream, maintaining session metadata transactionally.

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_nats::jetstream;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::buffer;
use crate::bus::{self, BusError};
use crate::config::names;
use crate::store::{DeviceInfo, DeviceStore};

use super::store::{stream_name, Metadata, SessionStore};

/// Controls how a live device stream is captured into JetStream.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub server_url: String,
    pub subject: String,
    pub device_id: String,
    /// Generated when empty.
    pub session_id: String,
    pub retention: Option<Duration>,
    pub pre_roll: Option<Duration>,
    pub session_bucket: String,
    pub device_bucket: String,
    pub device: DeviceInfo,
    pub verbose: bool,
    /// Receives a metadata snapshot after every successful metadata write.
    pub progress: Option<mpsc::UnboundedSender<Metadata>>,
}

/// Subscribes to `subject.device_id` and persists messages into a dedicated
/// stream, tracking metadata in the session bucket. Cancellation is the
/// expected way to stop a recording and is not an error.
pub async fn record(cancel: CancellationToken, opts: RecordOptions) -> Result<Metadata> {
    if opts.server_url.is_empty() {
        bail!("server URL cannot be empty");
    }
    let base_subject = opts.subject.trim().to_string();
    if base_subject.is_empty() {
        bail!("subject cannot be empty");
    }
    let device_id = opts.device_id.trim().to_string();
    if device_id.is_empty() {
        bail!("device-id cannot be empty");
    }
    let session_id = {
        let trimmed = opts.session_id.trim();
        if trimmed.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            trimmed.to_string()
        }
    };
    let session_bucket = {
        let trimmed = opts.session_bucket.trim();
        if trimmed.is_empty() {
            names::SESSION_BUCKET.to_string()
        } else {
            trimmed.to_string()
        }
    };

    let (client, js) = bus::connect_jetstream(&opts.server_url).await?;

    let sessions = SessionStore::new(&js, &session_bucket).await?;
    match sessions.load(&session_id).await {
        Ok(_) => {
            warn!("session {} already exists", session_id);
            bail!("session {} already exists", session_id);
        }
        Err(err) if bus::is_key_not_found(&err) => {}
        Err(err) => return Err(err),
    }

    let devices = DeviceStore::new(&js, &opts.device_bucket).await?;
    if opts.device.is_empty() {
        devices
            .ensure(&device_id)
            .await
            .context("ensure device")?;
    } else {
        devices
            .upsert(&device_id, &opts.device)
            .await
            .context("upsert device")?;
    }

    let source_subject = names::device_subject(&base_subject, &device_id);
    let session_subject = names::session_subject(&session_id);
    let stream = stream_name(&session_id);

    bus::create_exclusive_stream(
        &js,
        &bus::StreamSpec {
            name: stream.clone(),
            subjects: vec![session_subject.clone()],
            max_age: opts.retention.filter(|r| !r.is_zero()),
        },
    )
    .await
    .context("add stream")?;

    info!("record stream created session={} device={}", session_id, device_id);

    let now = Utc::now();
    let mut meta = Metadata {
        session_id: session_id.clone(),
        device_id: device_id.clone(),
        source_subject: source_subject.clone(),
        session_subject: session_subject.clone(),
        stream,
        bucket: session_bucket,
        start: now,
        end: now,
        message_count: 0,
        retention: opts
            .retention
            .filter(|r| !r.is_zero())
            .map(|r| humantime::format_duration(r).to_string())
            .unwrap_or_default(),
    };

    if let Some(pre_roll) = opts.pre_roll.filter(|p| !p.is_zero()) {
        match replay_pre_roll(&js, &device_id, &session_id, &session_subject, pre_roll).await {
            Ok(outcome) if outcome.count > 0 => {
                meta.message_count = outcome.count as u64;
                if let Some(last) = outcome.last {
                    meta.end = last;
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!("pre-roll replay failed session={}: {}", session_id, err);
            }
        }
    }

    let mut revision = sessions.put(&meta, 0).await?;
    send_progress(&opts.progress, &meta);

    let mut sub = client.subscribe(source_subject.clone()).await.context("subscribe source")?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                meta.end = Utc::now();
                // Best effort; a conflicting final stamp does not fail the stop.
                if sessions.put(&meta, revision).await.is_ok() {
                    send_progress(&opts.progress, &meta);
                }
                let _ = sub.unsubscribe().await;
                info!("record canceled session={}", session_id);
                return Ok(meta);
            }
            msg = sub.next() => {
                let Some(msg) = msg else {
                    info!("record subscription closed session={}", session_id);
                    return Ok(meta);
                };

                let recorded_at = Utc::now();
                let mut headers = bus::clone_headers(msg.headers.as_ref());
                headers.insert("Content-Type", "application/json");
                headers.insert(names::HEADER_DEVICE, device_id.as_str());
                headers.insert(names::HEADER_SESSION, session_id.as_str());
                headers.insert(
                    names::HEADER_RECORDED_AT,
                    bus::format_timestamp(recorded_at).as_str(),
                );

                if let Err(err) =
                    publish_to_stream(&js, &session_subject, headers, msg.payload.clone()).await
                {
                    error!("publish to stream failed session={}: {}", session_id, err);
                    return Err(err);
                }

                meta.message_count += 1;
                meta.end = recorded_at;
                match sessions.put(&meta, revision).await {
                    Ok(rev) => {
                        revision = rev;
                        send_progress(&opts.progress, &meta);
                    }
                    Err(err) => {
                        error!("update metadata failed session={}: {}", session_id, err);
                        return Err(err);
                    }
                }
            }
        }
    }
}

/// Drains the device buffer for the pre-roll window into the session stream.
/// Runs under its own deadline of the window plus one second.
async fn replay_pre_roll(
    js: &jetstream::Context,
    device_id: &str,
    session_id: &str,
    session_subject: &str,
    pre_roll: Duration,
) -> Result<buffer::ReplayOutcome> {
    let deadline = CancellationToken::new();
    let timer = deadline.clone();
    let guard = tokio::spawn(async move {
        tokio::time::sleep(pre_roll + Duration::from_secs(1)).await;
        timer.cancel();
    });

    let now = Utc::now();
    let since = now
        - chrono::Duration::from_std(pre_roll).unwrap_or_else(|_| chrono::Duration::zero());

    let result = buffer::replay(&deadline, js, device_id, since, now, |buffered| {
        let js = js.clone();
        let session_subject = session_subject.to_string();
        let device_id = device_id.to_string();
        let session_id = session_id.to_string();
        async move {
            let recorded_at = buffered.buffered_at.unwrap_or_else(Utc::now);
            let mut headers = async_nats::HeaderMap::new();
            headers.insert("Content-Type", "application/json");
            headers.insert(names::HEADER_DEVICE, device_id.as_str());
            headers.insert(names::HEADER_SESSION, session_id.as_str());
            headers.insert(
                names::HEADER_RECORDED_AT,
                bus::format_timestamp(recorded_at).as_str(),
            );
            headers.insert(names::HEADER_PRE_ROLL, "true");
            publish_to_stream(&js, &session_subject, headers, buffered.payload).await
        }
    })
    .await;

    guard.abort();
    result
}

async fn publish_to_stream(
    js: &jetstream::Context,
    subject: &str,
    headers: async_nats::HeaderMap,
    payload: Bytes,
) -> Result<()> {
    js.publish_with_headers(subject.to_string(), headers, payload)
        .await
        .map_err(|err| BusError::Other(err.to_string()))?
        .await
        .map_err(|err| BusError::Other(err.to_string()))?;
    Ok(())
}

fn send_progress(progress: &Option<mpsc::UnboundedSender<Metadata>>, meta: &Metadata) {
    if let Some(tx) = progress {
        let _ = tx.send(meta.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_rejects_empty_server_url() {
        let err = record(CancellationToken::new(), RecordOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("server URL"));
    }

    #[tokio::test]
    async fn test_record_rejects_empty_subject() {
        let opts = RecordOptions {
            server_url: "nats://127.0.0.1:4222".to_string(),
            subject: "  ".to_string(),
            device_id: "d1".to_string(),
            ..Default::default()
        };
        let err = record(CancellationToken::new(), opts).await.unwrap_err();
        assert!(err.to_string().contains("subject"));
    }

    #[tokio::test]
    async fn test_record_rejects_empty_device() {
        let opts = RecordOptions {
            server_url: "nats://127.0.0.1:4222".to_string(),
            subject: "monitor".to_string(),
            device_id: "".to_string(),
            ..Default::default()
        };
        let err = record(CancellationToken::new(), opts).await.unwrap_err();
        assert!(err.to_string().contains("device-id"));
    }
}
