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

// Background mirror: forks monitor traffic into per-device buffer streams
// for every device with an active rolling-buffer window.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_nats::jetstream;
use async_nats::Client;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::names;
use crate::store::DeviceStore;

/// Controls the buffer runner behaviour.
#[derive(Debug, Clone)]
pub struct BufferOptions {
    pub device_bucket: String,
    pub monitor_subject: String,
    pub refresh_interval: Duration,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            device_bucket: names::DEVICE_BUCKET.to_string(),
            monitor_subject: names::MONITOR_SUBJECT.to_string(),
            refresh_interval: names::BUFFER_REFRESH,
        }
    }
}

/// Mirrors monitor traffic into device buffers based on device metadata.
/// Runs until the token is cancelled; per-message append failures are logged
/// and skipped.
pub async fn run_buffer(
    cancel: CancellationToken,
    client: Client,
    js: jetstream::Context,
    opts: BufferOptions,
) -> Result<()> {
    let bucket = if opts.device_bucket.is_empty() {
        names::DEVICE_BUCKET.to_string()
    } else {
        opts.device_bucket.clone()
    };
    let prefix = if opts.monitor_subject.is_empty() {
        names::MONITOR_SUBJECT.to_string()
    } else {
        opts.monitor_subject.clone()
    };
    let refresh = if opts.refresh_interval.is_zero() {
        names::BUFFER_REFRESH
    } else {
        opts.refresh_interval
    };

    let dev_store = DeviceStore::new(&js, &bucket).await?;

    let mut active = load_active_windows(&dev_store).await.unwrap_or_else(|err| {
        error!("buffer: list devices failed: {}", err);
        HashMap::new()
    });

    let pattern = format!("{prefix}.>");
    let mut sub = client.subscribe(pattern.clone()).await?;

    let mut ticker = tokio::time::interval(refresh);
    // The first tick fires immediately; the map was just loaded.
    ticker.tick().await;

    info!(
        "buffer runner started subject={} refresh={:?}",
        prefix, refresh
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sub.unsubscribe().await;
                info!("buffer runner stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                match load_active_windows(&dev_store).await {
                    Ok(windows) => active = windows,
                    // Keep the previous map on a failed refresh.
                    Err(err) => error!("buffer: list devices failed: {}", err),
                }
            }
            msg = sub.next() => {
                let Some(msg) = msg else {
                    info!("buffer runner subscription closed");
                    return Ok(());
                };
                let Some(device_id) = extract_device_id(&prefix, msg.subject.as_str()) else {
                    continue;
                };
                let window = active
                    .get(&device_id.to_lowercase())
                    .copied()
                    .unwrap_or(Duration::ZERO);
                if window.is_zero() {
                    continue;
                }
                if let Err(err) = super::append(
                    &js,
                    device_id,
                    window,
                    msg.headers.as_ref(),
                    msg.payload.clone(),
                    None,
                )
                .await
                {
                    error!("buffer append failed device={}: {}", device_id, err);
                }
            }
        }
    }
}

async fn load_active_windows(store: &DeviceStore) -> Result<HashMap<String, Duration>> {
    let entries = store.list().await?;
    let mut active = HashMap::with_capacity(entries.len());
    for entry in entries {
        if let Some(window) = entry.info.buffer_window() {
            active.insert(entry.device_id.to_lowercase(), window);
        }
    }
    Ok(active)
}

/// Extracts the device id as the first dot-segment after the monitor prefix.
fn extract_device_id<'a>(prefix: &str, subject: &'a str) -> Option<&'a str> {
    let rest = subject.strip_prefix(prefix)?.strip_prefix('.')?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.split('.').next().unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_device_id() {
        assert_eq!(extract_device_id("monitor", "monitor.device-1"), Some("device-1"));
        assert_eq!(
            extract_device_id("monitor", "monitor.device-1.extra"),
            Some("device-1")
        );
        assert_eq!(extract_device_id("monitor", "other.device-1"), None);
        assert_eq!(extract_device_id("monitor", "monitor."), None);
        assert_eq!(extract_device_id("monitor", "monitor"), None);
    }

    #[test]
    fn test_extract_device_id_nested_prefix() {
        assert_eq!(
            extract_device_id("apps.monitor", "apps.monitor.d1.t"),
            Some("d1")
        );
    }

    #[test]
    fn test_default_options() {
        let opts = BufferOptions::default();
        assert_eq!(opts.monitor_subject, "monitor");
        assert_eq!(opts.refresh_interval, Duration::from_secs(15));
    }
}
