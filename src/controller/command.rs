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

// Wire types of the recording control plane and start-command validation.

use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::names;
use crate::store::DeviceInfo;

pub const ACTION_START: &str = "start";
pub const ACTION_STOP: &str = "stop";

/// An RPC request sent to the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub retention: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_bucket: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_bucket: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_owner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pre_roll: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub verbose: bool,
}

/// Outcome of a controller command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSnapshot>,
}

impl RpcResponse {
    pub fn error(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            session_id: session_id.into(),
            state: None,
        }
    }
}

/// Recording job status as persisted in the state bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    #[default]
    Stopped,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Running => write!(f, "running"),
            Status::Stopped => write!(f, "stopped"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// Durable record of one session's recording state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    pub status: Status,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A validated controller start request with parsed fields.
#[derive(Debug, Clone)]
pub struct StartCommand {
    pub subject: String,
    pub device_id: String,
    pub session_id: String,
    pub retention: Option<Duration>,
    pub session_bucket: String,
    pub device_bucket: String,
    pub pre_roll: Option<Duration>,
    pub verbose: bool,
    pub device: DeviceInfo,
}

impl RpcRequest {
    pub fn normalize_start(&self) -> Result<StartCommand> {
        let subject = self.subject.trim().to_string();
        if subject.is_empty() {
            bail!("subject cannot be empty");
        }

        let device_id = self.device_id.trim().to_string();
        if device_id.is_empty() {
            bail!("device-id cannot be empty");
        }

        let session_id = {
            let trimmed = self.session_id.trim();
            if trimmed.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                trimmed.to_string()
            }
        };

        let retention = parse_retention(&self.retention)?;

        let session_bucket = {
            let trimmed = self.session_bucket.trim();
            if trimmed.is_empty() {
                names::SESSION_BUCKET.to_string()
            } else {
                trimmed.to_string()
            }
        };
        let device_bucket = {
            let trimmed = self.device_bucket.trim();
            if trimmed.is_empty() {
                names::DEVICE_BUCKET.to_string()
            } else {
                trimmed.to_string()
            }
        };

        let pre_roll = {
            let trimmed = self.pre_roll.trim();
            if trimmed.is_empty() {
                None
            } else {
                match humantime::parse_duration(trimmed) {
                    Ok(dur) => Some(dur),
                    Err(err) => bail!("invalid pre-roll: {err}"),
                }
            }
        };

        Ok(StartCommand {
            subject,
            device_id,
            session_id,
            retention,
            session_bucket,
            device_bucket,
            pre_roll,
            verbose: self.verbose,
            device: DeviceInfo {
                description: self.device_description.clone(),
                location: self.device_location.clone(),
                owner: self.device_owner.clone(),
                ..Default::default()
            },
        })
    }
}

fn parse_retention(value: &str) -> Result<Option<Duration>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match humantime::parse_duration(value) {
        Ok(dur) => Ok(Some(dur)),
        Err(err) => bail!("invalid retention duration: {err}"),
    }
}
