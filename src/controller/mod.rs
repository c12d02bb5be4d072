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

// Recording control plane: command wire types, the responder service, and
// the request/state client.

pub mod client;
pub mod command;
pub mod service;

pub use client::{fetch_state, send_command};
pub use command::{
    RpcRequest, RpcResponse, StartCommand, StateSnapshot, Status, ACTION_START, ACTION_STOP,
};
pub use service::{Controller, ControllerOptions};
