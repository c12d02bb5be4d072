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

// Managed nats-server child process with JetStream file storage. Used by the
// serve supervisor and by infrastructure tests that need a disposable bus.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Controls how the managed bus process is started.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    /// JetStream storage directory; a temp directory is created when None.
    pub store_dir: Option<PathBuf>,
    pub binary: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4222,
            store_dir: None,
            binary: "nats-server".to_string(),
        }
    }
}

/// Handle to a running nats-server process. Shutting down kills the child;
/// a temp store directory is removed with the handle.
pub struct NatsServer {
    child: Child,
    url: String,
    host: String,
    port: u16,
    _temp_store: Option<TempDir>,
}

impl NatsServer {
    /// Boots the server and waits until it accepts connections.
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let port = if config.port == 0 {
            free_port(&config.host)?
        } else {
            config.port
        };

        let (store_dir, temp_store) = match &config.store_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("create store dir {}", dir.display()))?;
                (dir.clone(), None)
            }
            None => {
                let temp = TempDir::with_prefix("streams-nats-")
                    .context("create temp store dir")?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        debug!(
            "starting nats-server on {}:{} store={}",
            config.host,
            port,
            store_dir.display()
        );

        let child = Command::new(&config.binary)
            .arg("-a")
            .arg(&config.host)
            .arg("-p")
            .arg(port.to_string())
            .arg("-js")
            .arg("-sd")
            .arg(&store_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {}", config.binary))?;

        let url = format!("nats://{}:{}", config.host, port);
        let server = Self {
            child,
            url,
            host: config.host,
            port,
            _temp_store: temp_store,
        };
        server.wait_ready(Duration::from_secs(5)).await?;
        info!("nats-server ready at {}", server.url);
        Ok(server)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let addr = format!("{}:{}", self.host, self.port);
        loop {
            if TcpStream::connect(&addr).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("nats server not ready in time at {addr}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// URL clients use to connect.
    pub fn client_url(&self) -> &str {
        &self.url
    }

    /// Stops the server process.
    pub async fn shutdown(mut self) {
        debug!("shutting down nats-server at {}", self.url);
        if let Err(err) = self.child.kill().await {
            warn!("failed to kill nats-server: {}", err);
        }
    }
}

fn free_port(host: &str) -> Result<u16> {
    let listener =
        TcpListener::bind((host, 0)).with_context(|| format!("bind free port on {host}"))?;
    Ok(listener.local_addr()?.port())
}

/// Reports whether a nats-server binary is available. Infrastructure tests
/// skip themselves when it is not.
pub fn server_binary_available() -> bool {
    std::process::Command::new("nats-server")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
