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

// Serve supervisor: boots the bus (managed child process or external),
// wires the controller, buffer runner, replay relay, and fan-out proxy, and
// orchestrates graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::buffer::{self, BufferOptions};
use crate::bus::{self, NatsServer, ServerConfig};
use crate::config::ServeConfig;
use crate::controller::{Controller, ControllerOptions};
use crate::olink::{self, PlaybackRegistry};
use crate::proxy::{MessageMode, ProxyOptions, RouteConfig, WsProxy};

/// Runs every configured service until the token is cancelled.
pub async fn run(config: ServeConfig, cancel: CancellationToken) -> Result<()> {
    let (server, server_url) = match config.bus.mode.as_str() {
        "managed" => {
            let server = NatsServer::start(ServerConfig {
                host: config.bus.host.clone(),
                port: config.bus.port,
                store_dir: if config.bus.store_dir.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(&config.bus.store_dir))
                },
                ..Default::default()
            })
            .await
            .context("start managed bus")?;
            let url = server.client_url().to_string();
            (Some(server), url)
        }
        "external" => (None, config.bus.url.clone()),
        other => bail!("unknown bus mode {other:?}"),
    };

    let (client, js) = bus::connect_jetstream(&server_url).await?;

    let controller = Controller::new(
        client.clone(),
        js.clone(),
        ControllerOptions {
            server_url: server_url.clone(),
            command_subject: config.services.command_subject.clone(),
            state_bucket: config.services.state_bucket.clone(),
        },
    )
    .await?;
    controller.start().await?;

    let buffer_task = tokio::spawn(buffer::run_buffer(
        cancel.child_token(),
        client.clone(),
        js.clone(),
        BufferOptions {
            device_bucket: config.services.device_bucket.clone(),
            monitor_subject: config.services.monitor_subject.clone(),
            refresh_interval: config.services.buffer_refresh(),
        },
    ));

    let relay_task = match &config.relay {
        Some(relay) if relay.enabled => {
            let registry = Arc::new(PlaybackRegistry::new());
            let subject = relay.subject.clone();
            let client = client.clone();
            let token = cancel.child_token();
            Some(tokio::spawn(async move {
                olink::run_relay(token, client, registry, &subject).await
            }))
        }
        _ => None,
    };

    let proxy_task = match &config.proxy {
        Some(proxy_cfg) if proxy_cfg.enabled => {
            let proxy = WsProxy::new(ProxyOptions {
                base_path: proxy_cfg.base_path.clone(),
                routes: proxy_cfg
                    .routes
                    .iter()
                    .map(|route| RouteConfig {
                        path: route.path.clone(),
                        param: route.param.clone(),
                        targets: route.targets.clone(),
                        mode: if route.mode == "binary" {
                            MessageMode::Binary
                        } else {
                            MessageMode::Text
                        },
                    })
                    .collect(),
                reconnect_attempts: proxy_cfg.reconnect_attempts,
                reconnect_backoff: proxy_cfg.reconnect_backoff(),
                ..Default::default()
            })?;
            let addr = proxy_cfg.listen_addr.clone();
            let token = cancel.child_token();
            Some(tokio::spawn(
                async move { proxy.serve(&addr, token).await },
            ))
        }
        _ => None,
    };

    info!("services running (controller subject={})", config.services.command_subject);

    cancel.cancelled().await;
    info!("shutting down services");

    controller.close().await;

    if let Ok(Err(err)) = buffer_task.await {
        error!("buffer service error: {}", err);
    }
    if let Some(task) = relay_task {
        if let Ok(Err(err)) = task.await {
            error!("replay relay error: {}", err);
        }
    }
    if let Some(task) = proxy_task {
        if let Ok(Err(err)) = task.await {
            error!("wsproxy error: {}", err);
        }
    }

    if let Some(server) = server {
        server.shutdown().await;
    }

    info!("services stopped");
    Ok(())
}
