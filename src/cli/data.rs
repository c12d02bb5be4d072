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

// data verbs: tail a monitor subject, publish a JSONL file.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::bus::BusError;
use crate::config::names;
use crate::msgio;

use super::{signal_token, Cli};

#[derive(Subcommand, Debug)]
pub enum DataCommand {
    /// Stream live monitor messages to stdout
    Tail(TailArgs),
    /// Publish a JSONL file to a device subject
    Publish(PublishArgs),
}

#[derive(Args, Debug)]
pub struct TailArgs {
    /// Base subject to monitor
    #[arg(long, default_value = names::MONITOR_SUBJECT)]
    pub subject: String,

    /// Device identifier (defaults to all devices)
    #[arg(long, default_value = "")]
    pub device_id: String,

    /// Indent JSON payloads
    #[arg(long)]
    pub pretty: bool,

    /// Print message headers
    #[arg(long)]
    pub headers: bool,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Base subject to publish under
    #[arg(long, default_value = names::MONITOR_SUBJECT)]
    pub subject: String,

    /// Device identifier
    #[arg(long)]
    pub device_id: String,

    /// JSONL file to publish
    #[arg(long)]
    pub file: String,

    /// Pause between messages (e.g. 100ms)
    #[arg(long, value_parser = humantime::parse_duration, default_value = "0s")]
    pub interval: Duration,

    /// Reject lines that are not valid JSON
    #[arg(long)]
    pub validate: bool,

    /// Mirror published lines to stdout
    #[arg(long)]
    pub echo: bool,

    /// Maximum accepted line length in bytes (0 = default)
    #[arg(long, default_value_t = 0)]
    pub max_line: usize,
}

pub async fn run(cli: &Cli, cmd: &DataCommand) -> Result<()> {
    match cmd {
        DataCommand::Tail(args) => {
            let mut stdout = tokio::io::stdout();
            let result = msgio::tail(
                signal_token(),
                msgio::TailOptions {
                    server_url: cli.server.clone(),
                    subject: args.subject.clone(),
                    device_id: args.device_id.clone(),
                    pretty: args.pretty,
                    headers: args.headers,
                    verbose: cli.verbose,
                },
                &mut stdout,
            )
            .await;
            swallow_cancel(result)
        }
        DataCommand::Publish(args) => {
            let result = msgio::publish_from_file(
                signal_token(),
                msgio::PublishOptions {
                    server_url: cli.server.clone(),
                    subject: args.subject.clone(),
                    device_id: args.device_id.clone(),
                    file_path: args.file.clone(),
                    interval: args.interval,
                    max_line: args.max_line,
                    validate: args.validate,
                    headers: HashMap::new(),
                    verbose: cli.verbose,
                    echo: args.echo,
                },
            )
            .await;
            match result {
                Ok(count) => {
                    println!("published {count} messages");
                    Ok(())
                }
                Err(err) => swallow_cancel::<u64>(Err(err)),
            }
        }
    }
}

/// An interrupt is the normal way to end a streaming command.
fn swallow_cancel<T>(result: Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if matches!(err.downcast_ref::<BusError>(), Some(BusError::Canceled)) => Ok(()),
        Err(err) => Err(err),
    }
}
