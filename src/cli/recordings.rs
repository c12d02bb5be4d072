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

// recordings verbs: drive the controller and read back sessions.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use tracing::info;

use crate::bus::{self, BusError};
use crate::config::names;
use crate::controller::{self, RpcRequest, ACTION_START, ACTION_STOP};
use crate::session::{self, SessionStore};

use super::{signal_token, Cli};

#[derive(Subcommand, Debug)]
pub enum RecordingsCommand {
    /// Start recording messages for a device
    Start(StartArgs),
    /// Stop an active recording
    Stop(StopArgs),
    /// Show the durable recording state of a session
    Status(StatusArgs),
    /// List recorded sessions
    List(ListArgs),
    /// Show session metadata
    Show(ShowArgs),
    /// Delete a session and its stream
    Delete(ShowArgs),
    /// Replay a recorded session onto a subject
    Play(PlayArgs),
    /// Export a recorded session as JSONL
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Base subject to record from
    #[arg(long, default_value = names::MONITOR_SUBJECT)]
    pub subject: String,

    /// Device identifier to record
    #[arg(long)]
    pub device_id: String,

    /// Optional session identifier (defaults to a UUID)
    #[arg(long, default_value = "")]
    pub session_id: String,

    /// Optional stream retention (e.g. 24h)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub retention: Option<Duration>,

    /// Key-value bucket for session metadata
    #[arg(long, default_value = names::SESSION_BUCKET)]
    pub session_bucket: String,

    /// Key-value bucket for device profiles
    #[arg(long, default_value = names::DEVICE_BUCKET)]
    pub device_bucket: String,

    /// Optional device description
    #[arg(long, default_value = "")]
    pub device_desc: String,

    /// Optional device location
    #[arg(long, default_value = "")]
    pub device_location: String,

    /// Optional device owner
    #[arg(long, default_value = "")]
    pub device_owner: String,

    /// Optional buffer window to include before start (e.g. 5m)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub pre_roll: Option<Duration>,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Session identifier
    #[arg(long)]
    pub session_id: String,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Session identifier
    #[arg(long)]
    pub session_id: String,

    /// KV bucket for controller state
    #[arg(long, default_value = names::STATE_BUCKET)]
    pub state_bucket: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Key-value bucket for session metadata
    #[arg(long, default_value = names::SESSION_BUCKET)]
    pub session_bucket: String,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Session identifier
    #[arg(long)]
    pub session_id: String,

    /// Key-value bucket for session metadata
    #[arg(long, default_value = names::SESSION_BUCKET)]
    pub session_bucket: String,
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Session identifier
    #[arg(long)]
    pub session_id: String,

    /// Target subject (defaults to the playback subject)
    #[arg(long, default_value = "")]
    pub target_subject: String,

    /// Playback speed factor
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Key-value bucket for session metadata
    #[arg(long, default_value = names::SESSION_BUCKET)]
    pub session_bucket: String,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Session identifier
    #[arg(long)]
    pub session_id: String,

    /// Output file ("-" for stdout)
    #[arg(long, default_value = "-")]
    pub output: String,

    /// Key-value bucket for session metadata
    #[arg(long, default_value = names::SESSION_BUCKET)]
    pub session_bucket: String,
}

pub async fn run(cli: &Cli, cmd: &RecordingsCommand) -> Result<()> {
    match cmd {
        RecordingsCommand::Start(args) => start(cli, args).await,
        RecordingsCommand::Stop(args) => stop(cli, args).await,
        RecordingsCommand::Status(args) => status(cli, args).await,
        RecordingsCommand::List(args) => list(cli, args).await,
        RecordingsCommand::Show(args) => show(cli, args).await,
        RecordingsCommand::Delete(args) => delete(cli, args).await,
        RecordingsCommand::Play(args) => play(cli, args).await,
        RecordingsCommand::Export(args) => export(cli, args).await,
    }
}

async fn start(cli: &Cli, args: &StartArgs) -> Result<()> {
    let request = RpcRequest {
        action: ACTION_START.to_string(),
        subject: args.subject.clone(),
        device_id: args.device_id.clone(),
        session_id: args.session_id.clone(),
        retention: args
            .retention
            .map(|d| humantime::format_duration(d).to_string())
            .unwrap_or_default(),
        session_bucket: args.session_bucket.clone(),
        device_bucket: args.device_bucket.clone(),
        device_description: args.device_desc.clone(),
        device_location: args.device_location.clone(),
        device_owner: args.device_owner.clone(),
        pre_roll: args
            .pre_roll
            .map(|d| humantime::format_duration(d).to_string())
            .unwrap_or_default(),
        verbose: cli.verbose,
    };

    let client = bus::connect(&cli.server).await?;
    info!(
        "record start request device={} subject={}",
        args.device_id, args.subject
    );
    let resp = controller::send_command(&client, names::RECORD_RPC_SUBJECT, &request).await?;
    if !resp.ok {
        if resp.message.is_empty() {
            bail!("record command failed");
        }
        bail!("{}", resp.message);
    }

    println!("recording started session={}", resp.session_id);
    if cli.verbose {
        if let Some(state) = &resp.state {
            println!(
                "state: {} (subject={} device={} messages={})",
                state.status, state.subject, state.device_id, state.message_count
            );
        }
    }
    Ok(())
}

async fn stop(cli: &Cli, args: &StopArgs) -> Result<()> {
    let request = RpcRequest {
        action: ACTION_STOP.to_string(),
        session_id: args.session_id.clone(),
        ..Default::default()
    };

    let client = bus::connect(&cli.server).await?;
    let resp = controller::send_command(&client, names::RECORD_RPC_SUBJECT, &request).await?;
    if !resp.ok {
        if resp.message.is_empty() {
            bail!("record command failed");
        }
        bail!("{}", resp.message);
    }
    println!("{}", resp.message);
    Ok(())
}

async fn status(cli: &Cli, args: &StatusArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let state = controller::fetch_state(&js, &args.state_bucket, &args.session_id).await?;
    println!(
        "session={} status={} device={} subject={} messages={} last_error={}",
        state.session_id,
        state.status,
        state.device_id,
        state.subject,
        state.message_count,
        if state.last_error.is_empty() {
            "-"
        } else {
            &state.last_error
        }
    );
    Ok(())
}

async fn list(cli: &Cli, args: &ListArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = SessionStore::new(&js, &args.session_bucket).await?;
    let sessions = store.list().await?;
    if sessions.is_empty() {
        println!("no sessions recorded");
        return Ok(());
    }
    for meta in sessions {
        println!(
            "{}  device={} messages={} start={} end={}",
            meta.session_id,
            meta.device_id,
            meta.message_count,
            meta.start.to_rfc3339(),
            meta.end.to_rfc3339()
        );
    }
    Ok(())
}

async fn show(cli: &Cli, args: &ShowArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = SessionStore::new(&js, &args.session_bucket).await?;
    let meta = store.info(&args.session_id).await?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

async fn delete(cli: &Cli, args: &ShowArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = SessionStore::new(&js, &args.session_bucket).await?;
    store.delete(&args.session_id).await?;
    println!("session {} deleted", args.session_id);
    Ok(())
}

async fn play(cli: &Cli, args: &PlayArgs) -> Result<()> {
    let result = session::playback(
        signal_token(),
        session::PlaybackOptions {
            server_url: cli.server.clone(),
            session_id: args.session_id.clone(),
            bucket: args.session_bucket.clone(),
            target_subject: args.target_subject.clone(),
            speed: args.speed,
            verbose: cli.verbose,
        },
    )
    .await;
    match result {
        Ok(()) => {
            println!("playback finished session={}", args.session_id);
            Ok(())
        }
        Err(err) if matches!(err.downcast_ref::<BusError>(), Some(BusError::Canceled)) => Ok(()),
        Err(err) => Err(err),
    }
}

async fn export(cli: &Cli, args: &ExportArgs) -> Result<()> {
    let opts = session::ExportOptions {
        server_url: cli.server.clone(),
        session_id: args.session_id.clone(),
        bucket: args.session_bucket.clone(),
        verbose: cli.verbose,
    };

    let written = if args.output == "-" {
        let mut stdout = tokio::io::stdout();
        session::export(signal_token(), opts, &mut stdout).await?
    } else {
        let mut file = tokio::fs::File::create(&args.output).await?;
        session::export(signal_token(), opts, &mut file).await?
    };

    if args.output != "-" {
        println!("exported {} messages to {}", written, args.output);
    }
    Ok(())
}
