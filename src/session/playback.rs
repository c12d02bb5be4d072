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

// Replays a recorded session onto a target subject, preserving the
// inter-message timing scaled by the requested speed.

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::{self, BusError};
use crate::config::names;

use super::store::SessionStore;

const PLAYBACK_BATCH: usize = 50;
const FETCH_MAX_WAIT: Duration = Duration::from_millis(250);

/// Controls replay of a recorded session.
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub server_url: String,
    pub session_id: String,
    pub bucket: String,
    /// Defaults to `streams.playback` when empty.
    pub target_subject: String,
    /// Defaults to 1.0 when zero.
    pub speed: f64,
    pub verbose: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            session_id: String::new(),
            bucket: String::new(),
            target_subject: String::new(),
            speed: 1.0,
            verbose: false,
        }
    }
}

/// Replays a recorded session at the requested speed.
pub async fn playback(cancel: CancellationToken, opts: PlaybackOptions) -> Result<()> {
    if opts.server_url.is_empty() {
        bail!("server URL cannot be empty");
    }
    if opts.session_id.trim().is_empty() {
        bail!("session-id cannot be empty");
    }
    let speed = if opts.speed == 0.0 { 1.0 } else { opts.speed };
    if speed <= 0.0 || speed.is_nan() || speed.is_infinite() {
        bail!("invalid speed {speed}");
    }

    let (client, js) = bus::connect_jetstream(&opts.server_url).await?;

    let sessions = SessionStore::new(&js, &opts.bucket).await?;
    let meta = sessions
        .info(&opts.session_id)
        .await
        .context("load metadata")?;

    let target_subject = {
        let trimmed = opts.target_subject.trim();
        if trimmed.is_empty() {
            names::PLAYBACK_SUBJECT.to_string()
        } else {
            trimmed.to_string()
        }
    };

    let durable = names::playback_consumer_name(&meta.session_id);
    let stream = bus::get_stream(&js, &meta.stream).await?;
    let consumer = bus::create_pull_consumer(&stream, &durable, &meta.session_subject).await?;

    let result = playback_loop(
        &cancel,
        &client,
        &consumer,
        &target_subject,
        speed,
        meta.message_count,
    )
    .await;
    bus::delete_consumer(&js, &meta.stream, &durable).await;
    result
}

async fn playback_loop(
    cancel: &CancellationToken,
    client: &async_nats::Client,
    consumer: &async_nats::jetstream::consumer::Consumer<
        async_nats::jetstream::consumer::pull::Config,
    >,
    target_subject: &str,
    speed: f64,
    message_count: u64,
) -> Result<()> {
    let mut prev_time: Option<DateTime<Utc>> = None;
    let mut played: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(BusError::Canceled.into());
        }

        let mut batch = consumer
            .fetch()
            .max_messages(PLAYBACK_BATCH)
            .expires(FETCH_MAX_WAIT)
            .messages()
            .await
            .map_err(|err| BusError::Other(err.to_string()))?;

        let mut received = 0usize;
        while let Some(msg) = batch.next().await {
            let msg = msg.map_err(|err| BusError::Other(err.to_string()))?;
            received += 1;
            if cancel.is_cancelled() {
                return Err(BusError::Canceled.into());
            }

            let mut headers = bus::clone_headers(msg.headers.as_ref());
            let recorded_at = bus::header_timestamp(&headers, names::HEADER_RECORDED_AT)
                .unwrap_or_else(Utc::now);

            if let Some(prev) = prev_time {
                let delay = (recorded_at - prev).to_std().unwrap_or(Duration::ZERO);
                let scaled = delay.div_f64(speed);
                if !scaled.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(scaled) => {}
                        _ = cancel.cancelled() => return Err(BusError::Canceled.into()),
                    }
                }
            }

            headers.insert(
                names::HEADER_REPLAYED_AT,
                bus::format_timestamp(Utc::now()).as_str(),
            );

            client
                .publish_with_headers(target_subject.to_string(), headers, msg.payload.clone())
                .await
                .context("publish replay")?;

            msg.ack()
                .await
                .map_err(|err| anyhow::anyhow!("ack: {err}"))?;

            prev_time = Some(recorded_at);
            played += 1;
        }

        if received == 0 {
            break;
        }

        if message_count > 0 && played >= message_count {
            break;
        }
    }

    info!("played {} messages to {}", played, target_subject);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_playback_rejects_bad_speed() {
        for speed in [-1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let opts = PlaybackOptions {
                server_url: "nats://127.0.0.1:4222".to_string(),
                session_id: "s1".to_string(),
                speed,
                ..Default::default()
            };
            let err = playback(CancellationToken::new(), opts).await.unwrap_err();
            assert!(err.to_string().contains("invalid speed"), "speed {speed}");
        }
    }

    #[tokio::test]
    async fn test_playback_rejects_empty_session() {
        let opts = PlaybackOptions {
            server_url: "nats://127.0.0.1:4222".to_string(),
            ..Default::default()
        };
        let err = playback(CancellationToken::new(), opts).await.unwrap_err();
        assert!(err.to_string().contains("session-id"));
    }
}
