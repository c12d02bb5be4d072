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

// Bus adapter: connection handling, stream and key-value helpers, header
// utilities, and the managed server process.

pub mod connect;
pub mod error;
pub mod header;
pub mod kv;
pub mod server;
pub mod stream;

pub use connect::{connect, connect_jetstream, SUBSCRIPTION_CAPACITY};
pub use error::{is_key_not_found, BusError};
pub use header::{clone_headers, format_timestamp, header_str, header_timestamp, parse_timestamp};
pub use kv::ensure_key_value;
pub use server::{NatsServer, ServerConfig};
pub use stream::{
    create_exclusive_stream, create_pull_consumer, delete_consumer, delete_stream, ensure_stream,
    get_stream, StreamSpec,
};
