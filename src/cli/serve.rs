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

// serve verb: run controller + buffer services with a managed or external bus.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::config::{self, ServeConfig};
use crate::supervisor;

use super::{signal_token, Cli};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host interface for the managed bus
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the managed bus (0 picks a free port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for JetStream storage (defaults to temp)
    #[arg(long)]
    pub store: Option<String>,

    /// Use an external bus instead of starting one
    #[arg(long)]
    pub external: bool,

    /// Subject for controller commands
    #[arg(long)]
    pub command_subject: Option<String>,

    /// KV bucket for controller state
    #[arg(long)]
    pub state_bucket: Option<String>,

    /// Device metadata bucket
    #[arg(long)]
    pub device_bucket: Option<String>,

    /// Base monitor subject to buffer
    #[arg(long)]
    pub monitor_subject: Option<String>,

    /// Interval for refreshing buffer configuration
    #[arg(long, value_parser = humantime::parse_duration)]
    pub buffer_refresh: Option<Duration>,
}

pub async fn run(cli: &Cli, args: &ServeArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => ServeConfig::default(),
    };

    // Flags override file values.
    if args.external {
        config.bus.mode = "external".to_string();
        config.bus.url = cli.server.clone();
    }
    if let Some(host) = &args.host {
        config.bus.host = host.clone();
    }
    if let Some(port) = args.port {
        config.bus.port = port;
    }
    if let Some(store) = &args.store {
        config.bus.store_dir = store.clone();
    }
    if let Some(subject) = &args.command_subject {
        config.services.command_subject = subject.clone();
    }
    if let Some(bucket) = &args.state_bucket {
        config.services.state_bucket = bucket.clone();
    }
    if let Some(bucket) = &args.device_bucket {
        config.services.device_bucket = bucket.clone();
    }
    if let Some(subject) = &args.monitor_subject {
        config.services.monitor_subject = subject.clone();
    }
    if let Some(refresh) = args.buffer_refresh {
        config.services.buffer_refresh_seconds = refresh.as_secs().max(1);
    }

    println!(
        "services running (controller subject={})",
        config.services.command_subject
    );
    println!("press Ctrl+C to stop");

    supervisor::run(config, signal_token()).await
}
