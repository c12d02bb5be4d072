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

// Configuration types for the serve supervisor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::names;

/// Main configuration structure for `serve`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServeConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub relay: Option<RelayConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bus configuration: either a managed local server or an external URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// "managed" boots a nats-server child process; "external" connects to `url`.
    #[serde(default = "default_bus_mode")]
    pub mode: String,

    #[serde(default = "default_bus_url")]
    pub url: String,

    #[serde(default = "default_bus_host")]
    pub host: String,

    #[serde(default = "default_bus_port")]
    pub port: u16,

    /// JetStream storage directory; a temp directory is used when empty.
    #[serde(default)]
    pub store_dir: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: default_bus_mode(),
            url: default_bus_url(),
            host: default_bus_host(),
            port: default_bus_port(),
            store_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServicesConfig {
    #[serde(default = "default_command_subject")]
    pub command_subject: String,

    #[serde(default = "default_state_bucket")]
    pub state_bucket: String,

    #[serde(default = "default_session_bucket")]
    pub session_bucket: String,

    #[serde(default = "default_device_bucket")]
    pub device_bucket: String,

    #[serde(default = "default_monitor_subject")]
    pub monitor_subject: String,

    #[serde(default = "default_buffer_refresh")]
    pub buffer_refresh_seconds: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            command_subject: default_command_subject(),
            state_bucket: default_state_bucket(),
            session_bucket: default_session_bucket(),
            device_bucket: default_device_bucket(),
            monitor_subject: default_monitor_subject(),
            buffer_refresh_seconds: default_buffer_refresh(),
        }
    }
}

impl ServicesConfig {
    pub fn buffer_refresh(&self) -> Duration {
        Duration::from_secs(self.buffer_refresh_seconds)
    }
}

/// WebSocket fan-out proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_proxy_listen")]
    pub listen_addr: String,

    #[serde(default = "default_proxy_base_path")]
    pub base_path: String,

    #[serde(default)]
    pub routes: Vec<ProxyRouteConfig>,

    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_proxy_listen(),
            base_path: default_proxy_base_path(),
            routes: Vec::new(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl ProxyConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// One proxied route: a path with colon-style parameters and the upstream
/// targets selected by the named parameter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyRouteConfig {
    pub path: String,

    #[serde(default)]
    pub param: String,

    #[serde(default)]
    pub targets: HashMap<String, String>,

    /// "text" or "binary".
    #[serde(default = "default_proxy_mode")]
    pub mode: String,
}

/// Replay relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_relay_subject")]
    pub subject: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            subject: default_relay_subject(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_bus_mode() -> String { "managed".to_string() }
fn default_bus_url() -> String { "nats://127.0.0.1:4222".to_string() }
fn default_bus_host() -> String { "127.0.0.1".to_string() }
fn default_bus_port() -> u16 { 4222 }
fn default_command_subject() -> String { names::RECORD_RPC_SUBJECT.to_string() }
fn default_state_bucket() -> String { names::STATE_BUCKET.to_string() }
fn default_session_bucket() -> String { names::SESSION_BUCKET.to_string() }
fn default_device_bucket() -> String { names::DEVICE_BUCKET.to_string() }
fn default_monitor_subject() -> String { names::MONITOR_SUBJECT.to_string() }
fn default_buffer_refresh() -> u64 { names::BUFFER_REFRESH.as_secs() }
fn default_proxy_listen() -> String { "127.0.0.1:5555".to_string() }
fn default_proxy_base_path() -> String { "/ws".to_string() }
fn default_proxy_mode() -> String { "text".to_string() }
fn default_reconnect_attempts() -> u32 { 3 }
fn default_reconnect_backoff_ms() -> u64 { 500 }
fn default_relay_subject() -> String { names::REPLAY_OLINK_SUBJECT.to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
