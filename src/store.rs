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

// Device profiles persisted in a key-value bucket.

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_nats::jetstream;
use async_nats::jetstream::kv::Store;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{self, BusError};
use crate::config::names;

/// Descriptive information about a device being monitored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub buffer_duration: String,
}

impl DeviceInfo {
    /// Reports whether the info carries any user-supplied metadata.
    pub fn is_empty(&self) -> bool {
        self.description.is_empty()
            && self.location.is_empty()
            && self.owner.is_empty()
            && self.buffer_duration.is_empty()
    }

    /// Parses the rolling buffer window; None when unset or invalid.
    pub fn buffer_window(&self) -> Option<Duration> {
        if self.buffer_duration.is_empty() {
            return None;
        }
        match humantime::parse_duration(&self.buffer_duration) {
            Ok(window) if window > Duration::ZERO => Some(window),
            _ => None,
        }
    }
}

/// A stored device profile together with its identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub device_id: String,
    pub info: DeviceInfo,
}

/// Manages device metadata in a key-value bucket. Keys are lowercased
/// trimmed device ids.
pub struct DeviceStore {
    bucket: String,
    kv: Store,
}

fn key(device_id: &str) -> String {
    device_id.trim().to_lowercase()
}

fn merge_info(base: DeviceInfo, update: &DeviceInfo) -> DeviceInfo {
    let mut info = base;
    if !update.description.is_empty() {
        info.description = update.description.clone();
    }
    if !update.location.is_empty() {
        info.location = update.location.clone();
    }
    if !update.owner.is_empty() {
        info.owner = update.owner.clone();
    }
    if !update.buffer_duration.is_empty() {
        info.buffer_duration = update.buffer_duration.clone();
    }
    info
}

impl DeviceStore {
    /// Ensures the device bucket exists and returns a store instance.
    pub async fn new(js: &jetstream::Context, bucket: &str) -> Result<Self> {
        let bucket = if bucket.is_empty() {
            names::DEVICE_BUCKET
        } else {
            bucket
        };
        let kv = bus::ensure_key_value(js, bucket)
            .await
            .with_context(|| format!("device bucket {bucket}"))?;
        Ok(Self {
            bucket: bucket.to_string(),
            kv,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Creates or updates a device profile. Non-empty fields of `update`
    /// overwrite the stored profile; `updated` is stamped to now.
    pub async fn upsert(&self, device_id: &str, update: &DeviceInfo) -> Result<()> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            bail!("device-id cannot be empty");
        }
        let (existing, revision) = match self.load_internal(device_id).await {
            Ok((info, revision)) => (info, revision),
            Err(err) if bus::is_key_not_found(&err) => (DeviceInfo::default(), 0),
            Err(err) => return Err(err),
        };

        let mut merged = merge_info(existing, update);
        if merged.is_empty() {
            bail!("no device information provided");
        }
        merged.updated = Some(Utc::now());

        let data = Bytes::from(serde_json::to_vec(&merged)?);
        let k = key(device_id);
        if revision == 0 {
            match self.kv.create(&k, data.clone()).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    let err = BusError::from_kv_create(&k, err);
                    if !matches!(err, BusError::KeyExists(_)) {
                        return Err(err.into());
                    }
                }
            }
        }
        self.kv
            .put(&k, data)
            .await
            .map_err(|err| BusError::Other(err.to_string()))?;
        Ok(())
    }

    /// Replaces a device profile without merging. Used by admin operations
    /// that clear fields, such as disabling the rolling buffer.
    pub async fn put(&self, device_id: &str, mut info: DeviceInfo) -> Result<()> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            bail!("device-id cannot be empty");
        }
        info.updated = Some(Utc::now());
        let data = Bytes::from(serde_json::to_vec(&info)?);
        self.kv
            .put(key(device_id), data)
            .await
            .map_err(|err| BusError::Other(err.to_string()))?;
        Ok(())
    }

    /// Guarantees a device entry exists, creating a minimal placeholder when
    /// missing. Idempotent.
    pub async fn ensure(&self, device_id: &str) -> Result<()> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            bail!("device-id cannot be empty");
        }
        match self.load_internal(device_id).await {
            Ok(_) => return Ok(()),
            Err(err) if bus::is_key_not_found(&err) => {}
            Err(err) => return Err(err),
        }

        let info = DeviceInfo {
            updated: Some(Utc::now()),
            ..Default::default()
        };
        let data = Bytes::from(serde_json::to_vec(&info)?);
        match self.kv.create(key(device_id), data).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = BusError::from_kv_create(device_id, err);
                if matches!(err, BusError::KeyExists(_)) {
                    Ok(())
                } else {
                    Err(err.into())
                }
            }
        }
    }

    /// Fetches a device profile.
    pub async fn get(&self, device_id: &str) -> Result<DeviceInfo> {
        let (info, _) = self.load_internal(device_id).await?;
        Ok(info)
    }

    /// Removes a device profile.
    pub async fn delete(&self, device_id: &str) -> Result<()> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            bail!("device-id cannot be empty");
        }
        self.kv
            .delete(key(device_id))
            .await
            .map_err(|err| BusError::Other(err.to_string()))?;
        Ok(())
    }

    /// Returns all device profiles. Entries that fail to decode are skipped.
    pub async fn list(&self) -> Result<Vec<DeviceEntry>> {
        let keys = bus::kv::keys(&self.kv).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for k in keys {
            match self.load_internal(&k).await {
                Ok((info, _)) => entries.push(DeviceEntry {
                    device_id: k,
                    info,
                }),
                Err(_) => continue,
            }
        }
        Ok(entries)
    }

    async fn load_internal(&self, device_id: &str) -> Result<(DeviceInfo, u64)> {
        let entry = self
            .kv
            .entry(key(device_id))
            .await
            .map_err(|err| BusError::Other(err.to_string()))?
            .ok_or_else(|| BusError::KeyNotFound(key(device_id)))?;
        let info: DeviceInfo = serde_json::from_slice(&entry.value)
            .with_context(|| format!("decode device {device_id}"))?;
        Ok((info, entry.revision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_info_overwrites_non_empty() {
        let base = DeviceInfo {
            description: "old".to_string(),
            location: "lab".to_string(),
            ..Default::default()
        };
        let update = DeviceInfo {
            description: "new".to_string(),
            owner: "ops".to_string(),
            ..Default::default()
        };

        let merged = merge_info(base, &update);
        assert_eq!(merged.description, "new");
        assert_eq!(merged.location, "lab");
        assert_eq!(merged.owner, "ops");
    }

    #[test]
    fn test_merge_info_keeps_buffer_duration() {
        let base = DeviceInfo {
            buffer_duration: "5m".to_string(),
            ..Default::default()
        };
        let merged = merge_info(base, &DeviceInfo::default());
        assert_eq!(merged.buffer_duration, "5m");
    }

    #[test]
    fn test_is_empty() {
        assert!(DeviceInfo::default().is_empty());
        let info = DeviceInfo {
            updated: Some(Utc::now()),
            ..Default::default()
        };
        assert!(info.is_empty());
        let info = DeviceInfo {
            owner: "ops".to_string(),
            ..Default::default()
        };
        assert!(!info.is_empty());
    }

    #[test]
    fn test_buffer_window_parsing() {
        let info = DeviceInfo {
            buffer_duration: "5m".to_string(),
            ..Default::default()
        };
        assert_eq!(info.buffer_window(), Some(Duration::from_secs(300)));

        let info = DeviceInfo {
            buffer_duration: "garbage".to_string(),
            ..Default::default()
        };
        assert_eq!(info.buffer_window(), None);

        assert_eq!(DeviceInfo::default().buffer_window(), None);
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(key(" Device-1 "), "device-1");
        assert_eq!(key("PRD1"), "prd1");
    }
}
