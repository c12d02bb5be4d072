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

// Connection establishment for core NATS and JetStream.

use anyhow::{Context as _, Result};
use async_nats::jetstream;
use async_nats::{Client, ConnectOptions};
use tracing::debug;

/// Capacity of the per-subscription delivery buffer. Slow consumers see
/// backpressure from the bus once this fills.
pub const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Connects to the bus and returns the core client.
pub async fn connect(server_url: &str) -> Result<Client> {
    let client = ConnectOptions::new()
        .subscription_capacity(SUBSCRIPTION_CAPACITY)
        .connect(server_url)
        .await
        .with_context(|| format!("connect to NATS at {server_url}"))?;
    debug!("NATS connection established to {}", server_url);
    Ok(client)
}

/// Connects to the bus and returns both the core client and a JetStream
/// context over it.
pub async fn connect_jetstream(server_url: &str) -> Result<(Client, jetstream::Context)> {
    let client = connect(server_url).await?;
    let js = jetstream::new(client.clone());
    debug!("JetStream context established to {}", server_url);
    Ok((client, js))
}
