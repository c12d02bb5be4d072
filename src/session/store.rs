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

// Session metadata persisted in a key-value bucket with optimistic
// concurrency, plus the session stream lifecycle tied to it.

use anyhow::{bail, Context as _, Result};
use async_nats::jetstream;
use async_nats::jetstream::kv::Store;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{self, BusError};
use crate::config::names;

/// Information about a recorded session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub session_id: String,
    pub device_id: String,
    pub source_subject: String,
    pub session_subject: String,
    pub stream: String,
    pub bucket: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub message_count: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub retention: String,
}

/// Helper methods around session metadata backed by JetStream KV.
pub struct SessionStore {
    js: jetstream::Context,
    bucket: String,
    kv: Store,
}

impl SessionStore {
    /// Ensures the session bucket exists and returns a store instance.
    pub async fn new(js: &jetstream::Context, bucket: &str) -> Result<Self> {
        let bucket = if bucket.is_empty() {
            names::SESSION_BUCKET
        } else {
            bucket
        };
        let kv = bus::ensure_key_value(js, bucket)
            .await
            .with_context(|| format!("sessions bucket {bucket}"))?;
        Ok(Self {
            js: js.clone(),
            bucket: bucket.to_string(),
            kv,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Stores or updates session metadata. A zero revision creates the entry
    /// and fails when it already exists; otherwise the write is a
    /// compare-and-swap against the given revision. Returns the new revision.
    pub async fn put(&self, meta: &Metadata, revision: u64) -> Result<u64> {
        if meta.session_id.is_empty() {
            bail!("metadata missing session id");
        }
        let data = Bytes::from(serde_json::to_vec(meta)?);
        if revision == 0 {
            let rev = self
                .kv
                .create(&meta.session_id, data)
                .await
                .map_err(|err| BusError::from_kv_create(&meta.session_id, err))?;
            return Ok(rev);
        }
        let rev = self
            .kv
            .update(&meta.session_id, data, revision)
            .await
            .map_err(|err| BusError::from_kv_update(&meta.session_id, err))?;
        Ok(rev)
    }

    /// Retrieves metadata for a session along with its revision.
    pub async fn load(&self, session_id: &str) -> Result<(Metadata, u64)> {
        let entry = self
            .kv
            .entry(session_id)
            .await
            .map_err(|err| BusError::Other(err.to_string()))?
            .ok_or_else(|| BusError::KeyNotFound(session_id.to_string()))?;
        let mut meta: Metadata = serde_json::from_slice(&entry.value)
            .with_context(|| format!("decode session {session_id}"))?;
        if meta.session_id.is_empty() {
            meta.session_id = session_id.to_string();
        }
        if meta.bucket.is_empty() {
            meta.bucket = self.bucket.clone();
        }
        Ok((meta, entry.revision))
    }

    /// Retrieves metadata for a session without revision details.
    pub async fn info(&self, session_id: &str) -> Result<Metadata> {
        let (meta, _) = self.load(session_id).await?;
        Ok(meta)
    }

    /// Returns all metadata entries in the bucket. Undecodable entries are
    /// skipped.
    pub async fn list(&self) -> Result<Vec<Metadata>> {
        let keys = bus::kv::keys(&self.kv).await?;
        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            match self.load(&key).await {
                Ok((meta, _)) => sessions.push(meta),
                Err(_) => continue,
            }
        }
        Ok(sessions)
    }

    /// Removes a session's metadata and its JetStream stream. A missing
    /// stream is tolerated.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let (meta, _) = self.load(session_id).await?;
        bus::delete_stream(&self.js, &meta.stream)
            .await
            .context("delete stream")?;
        self.kv
            .delete(session_id)
            .await
            .map_err(|err| BusError::Other(err.to_string()))?;
        Ok(())
    }
}

/// Derives the sanitized stream name for a session identifier.
pub fn stream_name(session_id: &str) -> String {
    names::session_stream_name(session_id)
}
