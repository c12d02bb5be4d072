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

// Device telemetry capture, buffering, and replay over NATS JetStream:
// - Records per-device monitor traffic into durable session streams
// - Keeps a capped-age rolling buffer per device for pre-roll capture
// - Replays or exports recorded sessions on demand
// - Drives recording jobs through a request/reply controller with durable state
// - Bridges client WebSockets to upstream targets with per-frame middleware

pub mod buffer;
pub mod bus;
pub mod cli;
pub mod config;
pub mod controller;
pub mod msgio;
pub mod olink;
pub mod proxy;
pub mod session;
pub mod store;
pub mod supervisor;

// Re-export main types
pub use buffer::{run_buffer, BufferOptions};
pub use bus::{BusError, NatsServer, ServerConfig};
pub use config::{load_config, ServeConfig};
pub use controller::{Controller, ControllerOptions, RpcRequest, RpcResponse, StateSnapshot};
pub use olink::{Frame, FrameSink, PlaybackRegistry, PlaybackSource};
pub use proxy::{ProxyMessage, ProxyMiddleware, ProxyOptions, RouteConfig, WsProxy};
pub use session::{Metadata, SessionStore};
pub use store::{DeviceInfo, DeviceStore};
