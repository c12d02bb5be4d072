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

// Command-line surface: capture and playback utilities for NATS traffic.

pub mod data;
pub mod device;
pub mod recordings;
pub mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// Message capture and playback utilities for NATS.
#[derive(Parser, Debug)]
#[command(name = "streams-recorder", version, about, long_about = None)]
pub struct Cli {
    /// NATS server URL
    #[arg(long, global = true, default_value = "nats://127.0.0.1:4222")]
    pub server: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Tail and publish live monitor data
    #[command(subcommand)]
    Data(data::DataCommand),

    /// Manage recorded sessions
    #[command(subcommand)]
    Recordings(recordings::RecordingsCommand),

    /// Manage device profiles and buffers
    #[command(subcommand)]
    Device(device::DeviceCommand),

    /// Serve controller and buffer services and an optional managed bus
    Serve(serve::ServeArgs),
}

/// Dispatches the parsed command.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Data(ref cmd) => data::run(&cli, cmd).await,
        Command::Recordings(ref cmd) => recordings::run(&cli, cmd).await,
        Command::Device(ref cmd) => device::run(&cli, cmd).await,
        Command::Serve(ref args) => serve::run(&cli, args).await,
    }
}

/// Token cancelled when the process receives an interrupt.
pub fn signal_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}
