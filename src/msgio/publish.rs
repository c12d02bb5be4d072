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

// JSONL feeder: streams a file line by line to a device's monitor subject.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::{self, BusError};
use crate::config::names;

const DEFAULT_MAX_LINE: usize = 8 * 1024 * 1024;

/// Controls how a JSONL file is streamed to the bus.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub server_url: String,
    pub subject: String,
    pub device_id: String,
    pub file_path: String,
    /// Pause between messages.
    pub interval: Duration,
    /// Maximum accepted line length; defaults to 8 MiB when zero.
    pub max_line: usize,
    /// Reject lines that are not valid JSON.
    pub validate: bool,
    /// Extra headers stamped onto every message.
    pub headers: HashMap<String, String>,
    pub verbose: bool,
    /// Mirror each published line to stdout.
    pub echo: bool,
}

/// Reads a JSONL file and publishes each line to the derived subject.
/// Returns the number of published messages.
pub async fn publish_from_file(cancel: CancellationToken, opts: PublishOptions) -> Result<u64> {
    if opts.file_path.is_empty() {
        bail!("file path cannot be empty");
    }
    let base_subject = opts.subject.trim();
    if base_subject.is_empty() {
        bail!("subject cannot be empty");
    }
    let device_id = opts.device_id.trim();
    if device_id.is_empty() {
        bail!("device-id cannot be empty");
    }
    if opts.server_url.is_empty() {
        bail!("server URL cannot be empty");
    }

    let full_subject = names::device_subject(base_subject, device_id);
    let max_line = if opts.max_line == 0 {
        DEFAULT_MAX_LINE
    } else {
        opts.max_line
    };

    let metadata = tokio::fs::metadata(&opts.file_path)
        .await
        .with_context(|| format!("stat file {}", opts.file_path))?;
    if metadata.is_dir() {
        bail!("{} is a directory", opts.file_path);
    }

    let file_name = Path::new(&opts.file_path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| opts.file_path.clone());

    let client = bus::connect(&opts.server_url).await?;

    let file = File::open(&opts.file_path)
        .await
        .with_context(|| format!("open file {}", opts.file_path))?;
    let mut lines = BufReader::new(file).lines();

    let mut published: u64 = 0;
    let mut line_no: u64 = 0;

    while let Some(line) = lines.next_line().await.context("read line")? {
        line_no += 1;
        if cancel.is_cancelled() {
            return Err(BusError::Canceled.into());
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.len() > max_line {
            bail!("line {line_no} exceeds maximum length {max_line}");
        }
        if opts.validate {
            serde_json::from_str::<serde_json::Value>(line)
                .with_context(|| format!("line {line_no}: invalid JSON"))?;
        }

        let mut headers = async_nats::HeaderMap::new();
        for (key, value) in &opts.headers {
            headers.insert(key.as_str(), value.as_str());
        }
        headers.insert(names::HEADER_DEVICE, device_id);
        headers.insert(names::HEADER_FILE, file_name.as_str());

        client
            .publish_with_headers(
                full_subject.clone(),
                headers,
                Bytes::from(line.as_bytes().to_vec()),
            )
            .await
            .context("publish")?;
        published += 1;

        if opts.echo {
            println!("{line}");
        }

        if !opts.interval.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(opts.interval) => {}
                _ = cancel.cancelled() => return Err(BusError::Canceled.into()),
            }
        }
    }

    client.flush().await.context("flush")?;
    if opts.verbose {
        info!("published {} messages to {}", published, full_subject);
    }
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_requires_file() {
        let err = publish_from_file(CancellationToken::new(), PublishOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("file path"));
    }

    #[tokio::test]
    async fn test_publish_requires_device() {
        let opts = PublishOptions {
            file_path: "data.jsonl".to_string(),
            subject: "monitor".to_string(),
            server_url: "nats://127.0.0.1:4222".to_string(),
            ..Default::default()
        };
        let err = publish_from_file(CancellationToken::new(), opts)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("device-id"));
    }

    #[tokio::test]
    async fn test_publish_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let opts = PublishOptions {
            file_path: dir.path().to_string_lossy().to_string(),
            subject: "monitor".to_string(),
            device_id: "d1".to_string(),
            server_url: "nats://127.0.0.1:4222".to_string(),
            ..Default::default()
        };
        let err = publish_from_file(CancellationToken::new(), opts)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("directory"));
    }
}
