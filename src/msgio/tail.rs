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

// Live monitor printer: subscribes to a device subject and writes each
// message as one line.

use anyhow::{bail, Result};
use async_nats::HeaderMap;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus;
use crate::config::names;

/// Controls how a monitoring subscription behaves.
#[derive(Debug, Clone, Default)]
pub struct TailOptions {
    pub server_url: String,
    /// Defaults to the monitor subject.
    pub subject: String,
    /// Defaults to the `>` wildcard.
    pub device_id: String,
    pub pretty: bool,
    pub headers: bool,
    pub verbose: bool,
}

impl TailOptions {
    fn validate(&mut self) -> Result<()> {
        self.server_url = self.server_url.trim().to_string();
        self.subject = self.subject.trim().to_string();
        self.device_id = self.device_id.trim().to_string();
        if self.server_url.is_empty() {
            bail!("server URL cannot be empty");
        }
        if self.subject.is_empty() {
            self.subject = names::MONITOR_SUBJECT.to_string();
        }
        if self.device_id.is_empty() {
            self.device_id = ">".to_string();
        }
        Ok(())
    }
}

/// Subscribes to the device stream and writes messages to the writer until
/// cancelled.
pub async fn tail<W>(cancel: CancellationToken, mut opts: TailOptions, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    opts.validate()?;

    let full_subject = names::subject_join(&[&opts.subject, &opts.device_id]);
    let client = bus::connect(&opts.server_url).await?;
    let mut sub = client.subscribe(full_subject.clone()).await?;

    if opts.verbose {
        info!("monitoring subject={}", full_subject);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sub.unsubscribe().await;
                if opts.verbose {
                    info!("monitor stopped");
                }
                return Ok(());
            }
            msg = sub.next() => {
                let Some(msg) = msg else { return Ok(()) };
                render_message(&opts, msg.headers.as_ref(), &msg.payload, writer).await?;
            }
        }
    }
}

async fn render_message<W>(
    opts: &TailOptions,
    headers: Option<&HeaderMap>,
    payload: &[u8],
    writer: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    if opts.headers {
        if let Some(headers) = headers {
            let mut entries: Vec<(String, String)> = headers
                .iter()
                .flat_map(|(name, values)| {
                    values
                        .iter()
                        .map(|value| (name.to_string(), value.as_str().to_string()))
                })
                .collect();
            entries.sort();
            for (key, value) in entries {
                writer
                    .write_all(format!("# header {key}={value}\n").as_bytes())
                    .await?;
            }
        }
    }

    let mut body = payload.to_vec();
    if opts.pretty {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => {
                if let Ok(pretty) = serde_json::to_vec_pretty(&value) {
                    body = pretty;
                }
            }
            Err(err) => {
                if opts.verbose {
                    warn!("pretty print failed: {}", err);
                }
            }
        }
    }

    let line = String::from_utf8_lossy(&body);
    writer
        .write_all(format!("{}\n", line.trim_end_matches('\n')).as_bytes())
        .await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_defaults() {
        let mut opts = TailOptions {
            server_url: "nats://127.0.0.1:4222".to_string(),
            ..Default::default()
        };
        opts.validate().unwrap();
        assert_eq!(opts.subject, "monitor");
        assert_eq!(opts.device_id, ">");
    }

    #[test]
    fn test_validate_requires_server() {
        let mut opts = TailOptions::default();
        assert!(opts.validate().is_err());
    }

    #[tokio::test]
    async fn test_render_plain_line() {
        let opts = TailOptions::default();
        let mut out = Vec::new();
        render_message(&opts, None, b"{\"i\":0}\n", &mut out)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"i\":0}\n");
    }

    #[tokio::test]
    async fn test_render_headers_sorted() {
        let opts = TailOptions {
            headers: true,
            ..Default::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert("X-Streams-Session", "s1");
        headers.insert("X-Streams-Device", "d1");

        let mut out = Vec::new();
        render_message(&opts, Some(&headers), b"{}", &mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# header X-Streams-Device=d1");
        assert_eq!(lines[1], "# header X-Streams-Session=s1");
        assert_eq!(lines[2], "{}");
    }

    #[tokio::test]
    async fn test_render_pretty_json() {
        let opts = TailOptions {
            pretty: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        render_message(&opts, None, b"{\"a\":1}", &mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"a\": 1"));
    }
}
