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

// Durable stream and consumer helpers over JetStream. All streams in the
// system are file-backed with limits retention; the only variable parts are
// the name, subject, and optional age cap.

use std::time::Duration;

use anyhow::{Context as _, Result};
use async_nats::jetstream;
use async_nats::jetstream::consumer::{pull, AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::{RetentionPolicy, StorageType, Stream};
use tracing::debug;

use super::error::BusError;

/// Declarative shape of a durable stream.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub max_age: Option<Duration>,
}

impl StreamSpec {
    fn to_config(&self) -> jetstream::stream::Config {
        jetstream::stream::Config {
            name: self.name.clone(),
            subjects: self.subjects.clone(),
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_age: self.max_age.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Creates the stream or updates its configuration when it already exists.
pub async fn ensure_stream(js: &jetstream::Context, spec: &StreamSpec) -> Result<()> {
    let config = spec.to_config();
    if js.update_stream(&config).await.is_ok() {
        return Ok(());
    }
    debug!("creating stream {}", spec.name);
    js.create_stream(config)
        .await
        .with_context(|| format!("create stream {}", spec.name))?;
    Ok(())
}

/// Creates the stream, failing with [`BusError::StreamExists`] when a stream
/// of that name is already present.
pub async fn create_exclusive_stream(js: &jetstream::Context, spec: &StreamSpec) -> Result<()> {
    if js.get_stream(&spec.name).await.is_ok() {
        return Err(BusError::StreamExists(spec.name.clone()).into());
    }
    js.create_stream(spec.to_config())
        .await
        .with_context(|| format!("create stream {}", spec.name))?;
    Ok(())
}

/// Deletes a stream; a missing stream is tolerated and reported as `false`.
pub async fn delete_stream(js: &jetstream::Context, name: &str) -> Result<bool> {
    if js.get_stream(name).await.is_err() {
        return Ok(false);
    }
    js.delete_stream(name)
        .await
        .with_context(|| format!("delete stream {name}"))?;
    Ok(true)
}

/// Looks up a stream handle, mapping a miss to [`BusError::StreamNotFound`].
pub async fn get_stream(js: &jetstream::Context, name: &str) -> Result<Stream> {
    js.get_stream(name)
        .await
        .map_err(|_| BusError::StreamNotFound(name.to_string()).into())
}

/// Creates an explicit-ack, deliver-all pull consumer filtered to a subject.
pub async fn create_pull_consumer(
    stream: &Stream,
    durable: &str,
    filter_subject: &str,
) -> Result<jetstream::consumer::Consumer<pull::Config>> {
    stream
        .create_consumer(pull::Config {
            durable_name: Some(durable.to_string()),
            filter_subject: filter_subject.to_string(),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::All,
            ..Default::default()
        })
        .await
        .with_context(|| format!("create consumer {durable}"))
}

/// Deletes a durable consumer; failures are reported to the caller but a
/// missing consumer is not an error.
pub async fn delete_consumer(js: &jetstream::Context, stream_name: &str, durable: &str) {
    if let Ok(stream) = js.get_stream(stream_name).await {
        if let Err(err) = stream.delete_consumer(durable).await {
            debug!("delete consumer {} on {}: {}", durable, stream_name, err);
        }
    }
}
