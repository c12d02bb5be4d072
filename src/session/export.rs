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

// Bulk export of a recorded session as JSONL: one payload per line, in
// stored order.

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::{self, BusError};
use crate::config::names;

use super::store::SessionStore;

const EXPORT_BATCH: usize = 128;
const FETCH_MAX_WAIT: Duration = Duration::from_millis(250);

/// Controls exporting a recorded session to JSONL.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub server_url: String,
    pub session_id: String,
    pub bucket: String,
    pub verbose: bool,
}

/// Writes the messages of a recorded session to the provided writer as
/// JSONL. Returns the number of lines written.
pub async fn export<W>(
    cancel: CancellationToken,
    opts: ExportOptions,
    writer: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    if opts.server_url.is_empty() {
        bail!("server URL cannot be empty");
    }
    if opts.session_id.trim().is_empty() {
        bail!("session-id cannot be empty");
    }

    let (_client, js) = bus::connect_jetstream(&opts.server_url).await?;

    let sessions = SessionStore::new(&js, &opts.bucket).await?;
    let meta = sessions
        .info(&opts.session_id)
        .await
        .context("load metadata")?;

    let durable = names::export_consumer_name(&meta.session_id);
    let stream = bus::get_stream(&js, &meta.stream).await?;
    let consumer = bus::create_pull_consumer(&stream, &durable, &meta.session_subject).await?;

    let result = export_loop(&cancel, &consumer, meta.message_count, writer).await;
    bus::delete_consumer(&js, &meta.stream, &durable).await;
    result
}

async fn export_loop<W>(
    cancel: &CancellationToken,
    consumer: &async_nats::jetstream::consumer::Consumer<
        async_nats::jetstream::consumer::pull::Config,
    >,
    message_count: u64,
    writer: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut written: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(BusError::Canceled.into());
        }

        let mut batch = consumer
            .fetch()
            .max_messages(EXPORT_BATCH)
            .expires(FETCH_MAX_WAIT)
            .messages()
            .await
            .map_err(|err| BusError::Other(err.to_string()))?;

        let mut received = 0usize;
        while let Some(msg) = batch.next().await {
            let msg = msg.map_err(|err| BusError::Other(err.to_string()))?;
            received += 1;

            writer
                .write_all(&msg.payload)
                .await
                .context("write message")?;
            writer.write_all(b"\n").await.context("write message")?;
            written += 1;
            let _ = msg.ack().await;
        }

        if received == 0 {
            break;
        }

        if message_count > 0 && written >= message_count {
            break;
        }
    }

    writer.flush().await.context("flush output")?;
    info!("exported {} messages", written);
    Ok(written)
}
