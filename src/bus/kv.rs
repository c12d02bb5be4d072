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

// Key-value bucket helpers over JetStream.

use anyhow::{Context as _, Result};
use async_nats::jetstream;
use async_nats::jetstream::kv::Store;
use futures::TryStreamExt;
use tracing::debug;

/// Returns a key-value bucket, creating it if missing.
pub async fn ensure_key_value(js: &jetstream::Context, bucket: &str) -> Result<Store> {
    match js.get_key_value(bucket).await {
        Ok(store) => Ok(store),
        Err(_) => {
            debug!("creating key-value bucket {}", bucket);
            js.create_key_value(jetstream::kv::Config {
                bucket: bucket.to_string(),
                ..Default::default()
            })
            .await
            .with_context(|| format!("create bucket {bucket}"))
        }
    }
}

/// Collects all keys of a bucket. An empty bucket yields an empty list.
pub async fn keys(store: &Store) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stream = store.keys().await.context("list keys")?;
    while let Some(key) = stream.try_next().await.context("read key")? {
        out.push(key);
    }
    Ok(out)
}
