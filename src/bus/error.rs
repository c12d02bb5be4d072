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

// Error conditions surfaced by the bus adapter. Callers match on these to
// distinguish expected states (missing key, empty fetch) from real failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("stream already exists: {0}")]
    StreamExists(String),

    #[error("no messages")]
    NoMessages,

    #[error("timed out")]
    Timeout,

    #[error("revision conflict on key {0}")]
    RevisionConflict(String),

    #[error("operation canceled")]
    Canceled,

    #[error("{0}")]
    Other(String),
}

impl BusError {
    /// Classifies a key-value update failure. The server reports a CAS
    /// mismatch as a "wrong last sequence" API error.
    pub fn from_kv_update(key: &str, err: impl std::fmt::Display) -> Self {
        let text = err.to_string();
        if text.contains("wrong last sequence") {
            BusError::RevisionConflict(key.to_string())
        } else {
            BusError::Other(text)
        }
    }

    /// Classifies a key-value create failure.
    pub fn from_kv_create(key: &str, err: impl std::fmt::Display) -> Self {
        let text = err.to_string();
        if text.contains("wrong last sequence") || text.to_lowercase().contains("already exists") {
            BusError::KeyExists(key.to_string())
        } else {
            BusError::Other(text)
        }
    }

    pub fn is_key_not_found(&self) -> bool {
        matches!(self, BusError::KeyNotFound(_))
    }

    pub fn is_revision_conflict(&self) -> bool {
        matches!(self, BusError::RevisionConflict(_))
    }
}

/// Reports whether an error chain bottoms out in a missing key.
pub fn is_key_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<BusError>(), Some(BusError::KeyNotFound(_)))
}
