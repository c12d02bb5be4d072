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

// device verbs: profile administration and rolling-buffer management.

use std::time::Duration;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::buffer;
use crate::bus;
use crate::config::names;
use crate::store::{DeviceInfo, DeviceStore};

use super::Cli;

#[derive(Subcommand, Debug)]
pub enum DeviceCommand {
    /// Create or update a device profile
    Set(SetArgs),
    /// Show a device profile
    Get(GetArgs),
    /// List device profiles
    List(ListArgs),
    /// Delete a device profile
    Delete(GetArgs),
    /// Manage the device rolling buffer
    #[command(subcommand)]
    Buffer(BufferCommand),
}

#[derive(Subcommand, Debug)]
pub enum BufferCommand {
    /// Enable buffering for a device
    Enable(EnableArgs),
    /// Disable buffering for a device
    Disable(GetArgs),
    /// Show the buffer window of a device
    Info(GetArgs),
    /// List devices with an active buffer
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Device identifier
    #[arg(long)]
    pub device_id: String,

    /// Device metadata bucket
    #[arg(long, default_value = names::DEVICE_BUCKET)]
    pub device_bucket: String,

    /// Device description
    #[arg(long, default_value = "")]
    pub description: String,

    /// Device location
    #[arg(long, default_value = "")]
    pub location: String,

    /// Device owner
    #[arg(long, default_value = "")]
    pub owner: String,

    /// Optional rolling buffer window (e.g. 5m)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub buffer: Option<Duration>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Device identifier
    #[arg(long)]
    pub device_id: String,

    /// Device metadata bucket
    #[arg(long, default_value = names::DEVICE_BUCKET)]
    pub device_bucket: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Device metadata bucket
    #[arg(long, default_value = names::DEVICE_BUCKET)]
    pub device_bucket: String,
}

#[derive(Args, Debug)]
pub struct EnableArgs {
    /// Device identifier
    #[arg(long)]
    pub device_id: String,

    /// Device metadata bucket
    #[arg(long, default_value = names::DEVICE_BUCKET)]
    pub device_bucket: String,

    /// Rolling buffer window (e.g. 5m)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub window: Duration,
}

pub async fn run(cli: &Cli, cmd: &DeviceCommand) -> Result<()> {
    match cmd {
        DeviceCommand::Set(args) => set(cli, args).await,
        DeviceCommand::Get(args) => get(cli, args).await,
        DeviceCommand::List(args) => list(cli, args).await,
        DeviceCommand::Delete(args) => delete(cli, args).await,
        DeviceCommand::Buffer(cmd) => match cmd {
            BufferCommand::Enable(args) => buffer_enable(cli, args).await,
            BufferCommand::Disable(args) => buffer_disable(cli, args).await,
            BufferCommand::Info(args) => buffer_info(cli, args).await,
            BufferCommand::List(args) => buffer_list(cli, args).await,
        },
    }
}

async fn set(cli: &Cli, args: &SetArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = DeviceStore::new(&js, &args.device_bucket).await?;
    let info = DeviceInfo {
        description: args.description.clone(),
        location: args.location.clone(),
        owner: args.owner.clone(),
        buffer_duration: args
            .buffer
            .map(|d| humantime::format_duration(d).to_string())
            .unwrap_or_default(),
        ..Default::default()
    };
    store.upsert(&args.device_id, &info).await?;
    println!("device {} updated", args.device_id);
    Ok(())
}

async fn get(cli: &Cli, args: &GetArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = DeviceStore::new(&js, &args.device_bucket).await?;
    let info = store.get(&args.device_id).await?;
    print_device(&args.device_id, &info);
    Ok(())
}

async fn list(cli: &Cli, args: &ListArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = DeviceStore::new(&js, &args.device_bucket).await?;
    let entries = store.list().await?;
    if entries.is_empty() {
        println!("no devices registered");
        return Ok(());
    }
    for entry in entries {
        print_device(&entry.device_id, &entry.info);
    }
    Ok(())
}

async fn delete(cli: &Cli, args: &GetArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = DeviceStore::new(&js, &args.device_bucket).await?;
    store.delete(&args.device_id).await?;
    println!("device {} deleted", args.device_id);
    Ok(())
}

async fn buffer_enable(cli: &Cli, args: &EnableArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = DeviceStore::new(&js, &args.device_bucket).await?;
    let info = DeviceInfo {
        buffer_duration: humantime::format_duration(args.window).to_string(),
        ..Default::default()
    };
    store.upsert(&args.device_id, &info).await?;
    let (stream, subject) = buffer::ensure_stream(&js, &args.device_id, args.window).await?;
    println!(
        "buffer enabled for {} window={} stream={} subject={}",
        args.device_id,
        humantime::format_duration(args.window),
        stream,
        subject
    );
    Ok(())
}

async fn buffer_disable(cli: &Cli, args: &GetArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = DeviceStore::new(&js, &args.device_bucket).await?;
    let mut info = store.get(&args.device_id).await?;
    info.buffer_duration = String::new();
    store.put(&args.device_id, info).await?;
    println!("buffer disabled for {}", args.device_id);
    Ok(())
}

async fn buffer_info(cli: &Cli, args: &GetArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = DeviceStore::new(&js, &args.device_bucket).await?;
    let info = store.get(&args.device_id).await?;
    match info.buffer_window() {
        Some(window) => println!(
            "device {} buffer window {}",
            args.device_id,
            humantime::format_duration(window)
        ),
        None => println!("device {} has no buffer configured", args.device_id),
    }
    Ok(())
}

async fn buffer_list(cli: &Cli, args: &ListArgs) -> Result<()> {
    let (_client, js) = bus::connect_jetstream(&cli.server).await?;
    let store = DeviceStore::new(&js, &args.device_bucket).await?;
    let entries = store.list().await?;
    let mut found = false;
    for entry in entries {
        if let Some(window) = entry.info.buffer_window() {
            println!(
                "{} window={}",
                entry.device_id,
                humantime::format_duration(window)
            );
            found = true;
        }
    }
    if !found {
        println!("no devices with buffering enabled");
    }
    Ok(())
}

fn print_device(device_id: &str, info: &DeviceInfo) {
    println!(
        "{}  desc={} location={} owner={} buffer={} updated={}",
        device_id,
        or_dash(&info.description),
        or_dash(&info.location),
        or_dash(&info.owner),
        or_dash(&info.buffer_duration),
        info.updated
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}
