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

// Per-device rolling buffers: capped-age streams mirroring monitor traffic,
// and time-bounded replay of the buffered slice.

pub mod runner;

pub use runner::{run_buffer, BufferOptions};

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use async_nats::jetstream;
use async_nats::HeaderMap;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::bus::{self, BusError};
use crate::config::names;

const REPLAY_BATCH: usize = 64;
const REPLAY_MAX_WAIT: Duration = Duration::from_millis(250);

/// A message drained from a device buffer during replay.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub subject: String,
    pub headers: HeaderMap,
    pub payload: Bytes,
    /// Parsed `X-Streams-Buffered-At`, when present and valid.
    pub buffered_at: Option<DateTime<Utc>>,
}

/// Result of draining a buffer window.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOutcome {
    pub count: usize,
    pub last: Option<DateTime<Utc>>,
}

/// Creates or updates the capped-age buffer stream for a device. Returns the
/// stream and subject names.
pub async fn ensure_stream(
    js: &jetstream::Context,
    device_id: &str,
    window: Duration,
) -> Result<(String, String)> {
    if window.is_zero() {
        bail!("buffer window must be positive");
    }
    let stream_name = names::buffer_stream_name(device_id);
    let subject = names::buffer_subject_name(device_id);

    bus::ensure_stream(
        js,
        &bus::StreamSpec {
            name: stream_name.clone(),
            subjects: vec![subject.clone()],
            max_age: Some(window),
        },
    )
    .await?;
    Ok((stream_name, subject))
}

/// Stores a monitor message in the device buffer. Headers are deep-copied and
/// stamped with the buffering time; an optional deadline of the surrounding
/// operation is carried along.
pub async fn append(
    js: &jetstream::Context,
    device_id: &str,
    window: Duration,
    headers: Option<&HeaderMap>,
    payload: Bytes,
    deadline: Option<DateTime<Utc>>,
) -> Result<()> {
    if window.is_zero() {
        return Ok(());
    }
    let (_, subject) = ensure_stream(js, device_id, window).await?;

    let mut buffered = bus::clone_headers(headers);
    buffered.insert(
        names::HEADER_BUFFERED_AT,
        bus::format_timestamp(Utc::now()).as_str(),
    );
    if let Some(deadline) = deadline {
        buffered.insert(names::HEADER_DEADLINE, bus::format_timestamp(deadline).as_str());
    }

    js.publish_with_headers(subject, buffered, payload)
        .await
        .map_err(|err| BusError::Other(err.to_string()))?
        .await
        .map_err(|err| BusError::Other(err.to_string()))?;
    Ok(())
}

/// Streams buffered messages whose buffering time falls within
/// `[since, until]` into `emit`. Messages without a parseable buffering time
/// are always included; messages outside the window are acknowledged
/// silently. The durable consumer created for the pass is deleted on return.
pub async fn replay<F, Fut>(
    cancel: &CancellationToken,
    js: &jetstream::Context,
    device_id: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    emit: F,
) -> Result<ReplayOutcome>
where
    F: FnMut(BufferedMessage) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let stream_name = names::buffer_stream_name(device_id);
    let subject = names::buffer_subject_name(device_id);
    let durable = names::buffer_replay_consumer_name(device_id);

    let stream = match bus::get_stream(js, &stream_name).await {
        Ok(stream) => stream,
        // A device without a buffer simply has nothing to replay.
        Err(_) => return Ok(ReplayOutcome::default()),
    };
    let consumer = bus::create_pull_consumer(&stream, &durable, &subject).await?;

    let result = replay_loop(cancel, &consumer, &subject, since, until, emit).await;
    bus::delete_consumer(js, &stream_name, &durable).await;
    result
}

async fn replay_loop<F, Fut>(
    cancel: &CancellationToken,
    consumer: &jetstream::consumer::Consumer<jetstream::consumer::pull::Config>,
    subject: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    mut emit: F,
) -> Result<ReplayOutcome>
where
    F: FnMut(BufferedMessage) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    use futures::StreamExt;

    let mut outcome = ReplayOutcome::default();

    loop {
        if cancel.is_cancelled() {
            return Err(BusError::Canceled.into());
        }

        let mut batch = consumer
            .fetch()
            .max_messages(REPLAY_BATCH)
            .expires(REPLAY_MAX_WAIT)
            .messages()
            .await
            .map_err(|err| BusError::Other(err.to_string()))?;

        let mut processed = 0usize;
        while let Some(msg) = batch.next().await {
            let msg = msg.map_err(|err| BusError::Other(err.to_string()))?;
            processed += 1;

            let headers = bus::clone_headers(msg.headers.as_ref());
            let ts = bus::header_timestamp(&headers, names::HEADER_BUFFERED_AT);
            if let Some(ts) = ts {
                if ts < since || ts > until {
                    let _ = msg.ack().await;
                    continue;
                }
            }

            let buffered = BufferedMessage {
                subject: subject.to_string(),
                headers,
                payload: msg.payload.clone(),
                buffered_at: ts,
            };

            emit(buffered).await?;
            outcome.count += 1;
            if let Some(ts) = ts {
                outcome.last = Some(ts);
            }
            msg.ack()
                .await
                .map_err(|err| BusError::Other(err.to_string()))?;
        }

        if processed == 0 {
            break;
        }
    }

    Ok(outcome)
}
