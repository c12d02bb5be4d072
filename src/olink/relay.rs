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

// Replay relay: consumes recorded ObjectLink frames from a bus subject and
// dispatches them to the per-object playback sources.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_nats::Client;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::names;

use super::frame::Frame;
use super::source::PlaybackRegistry;

/// Subscribes to the playback-channel subject and fans decoded frames out to
/// the registry. Undecodable frames are logged and skipped; the relay runs
/// until the token is cancelled.
pub async fn run_relay(
    cancel: CancellationToken,
    client: Client,
    registry: Arc<PlaybackRegistry>,
    subject: &str,
) -> Result<()> {
    let subject = if subject.is_empty() {
        names::REPLAY_OLINK_SUBJECT
    } else {
        subject
    };

    let mut sub = client
        .subscribe(subject.to_string())
        .await
        .with_context(|| format!("subscribe {subject}"))?;

    info!("playback relay subscribed subject={}", subject);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sub.unsubscribe().await;
                info!("playback relay stopped");
                return Ok(());
            }
            msg = sub.next() => {
                let Some(msg) = msg else {
                    info!("playback relay subscription closed");
                    return Ok(());
                };
                match Frame::decode(&msg.payload) {
                    Ok(frame) => registry.dispatch(frame).await,
                    Err(err) => error!("playback relay: decode failed: {}", err),
                }
            }
        }
    }
}
