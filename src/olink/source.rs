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

// Per-object playback fan-out. A playback source caches the object's
// property state from the recorded frames and rebroadcasts every frame to
// its linked downstream observers. It is replay-only: invocations and
// property writes from downstream are rejected.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::frame::{symbol_to_parts, Frame};

/// A downstream observer receiving replayed frames.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Stable identifier of the observer, used for unlinking.
    fn sink_id(&self) -> &str;

    /// Delivers one frame. Failures are logged by the source and do not stop
    /// the fan-out to other observers.
    async fn send_frame(&self, frame: Frame) -> Result<()>;
}

#[derive(Default)]
struct SourceState {
    sinks: Vec<Arc<dyn FrameSink>>,
    props: Map<String, Value>,
    init: Option<Frame>,
}

/// Replays recorded frames of one object to every linked observer.
pub struct PlaybackSource {
    object_id: String,
    state: RwLock<SourceState>,
}

impl PlaybackSource {
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            state: RwLock::new(SourceState::default()),
        }
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Downstream invocations are not supported on a playback source.
    pub fn invoke(&self, _method_id: &str, _args: &[Value]) -> Result<Value> {
        bail!("playback source {}: invoke not supported", self.object_id);
    }

    /// Downstream property writes are not supported on a playback source.
    pub fn set_property(&self, _property_id: &str, _value: &Value) -> Result<()> {
        bail!(
            "playback source {}: set property not supported",
            self.object_id
        );
    }

    /// Current property cache.
    pub fn collect_properties(&self) -> Map<String, Value> {
        self.state
            .read()
            .map(|state| state.props.clone())
            .unwrap_or_default()
    }

    /// Registers an observer. A cached init frame is delivered immediately so
    /// late joiners catch up with the object state.
    pub async fn linked(&self, sink: Arc<dyn FrameSink>) {
        let init = {
            let mut state = self.state.write().expect("source lock poisoned");
            state.sinks.push(sink.clone());
            state.init.clone()
        };
        if let Some(init) = init {
            if let Err(err) = sink.send_frame(init).await {
                warn!(
                    "playback source {}: init delivery to {} failed: {}",
                    self.object_id,
                    sink.sink_id(),
                    err
                );
            }
        }
    }

    /// Removes an observer by id.
    pub fn unlinked(&self, sink_id: &str) {
        let mut state = self.state.write().expect("source lock poisoned");
        state.sinks.retain(|sink| sink.sink_id() != sink_id);
    }

    /// Number of linked observers.
    pub fn linked_count(&self) -> usize {
        self.state
            .read()
            .map(|state| state.sinks.len())
            .unwrap_or_default()
    }

    /// Updates the cached state from a frame and broadcasts it to every
    /// linked observer. The broadcast happens outside the lock on a snapshot
    /// of the observer set.
    pub async fn handle_frame(&self, frame: Frame) {
        let sinks = {
            let mut state = self.state.write().expect("source lock poisoned");
            self.update_state(&mut state, &frame);
            state.sinks.clone()
        };

        for sink in sinks {
            if let Err(err) = sink.send_frame(frame.clone()).await {
                warn!(
                    "playback source {}: delivery to {} failed: {}",
                    self.object_id,
                    sink.sink_id(),
                    err
                );
            }
        }
    }

    fn update_state(&self, state: &mut SourceState, frame: &Frame) {
        match frame {
            Frame::Init { object_id, props } if object_id == &self.object_id => {
                state.props = props.clone();
                state.init = Some(Frame::Init {
                    object_id: self.object_id.clone(),
                    props: props.clone(),
                });
            }
            Frame::PropertyChange { property_id, value }
            | Frame::SetProperty { property_id, value } => {
                let (object_id, name) = symbol_to_parts(property_id);
                if object_id == self.object_id && !name.is_empty() {
                    state.props.insert(name.to_string(), value.clone());
                }
            }
            _ => {}
        }
    }
}

/// Manages per-object playback sources and dispatches recorded frames to
/// them, creating a source on first use.
#[derive(Default)]
pub struct PlaybackRegistry {
    sources: RwLock<HashMap<String, Arc<PlaybackSource>>>,
}

impl PlaybackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes a decoded frame to the playback source of its target object.
    pub async fn dispatch(&self, frame: Frame) {
        let Some(object_id) = frame.object_id().map(str::to_string) else {
            warn!("playback: unable to resolve object id from frame");
            return;
        };
        let source = self.get_or_create(&object_id);
        source.handle_frame(frame).await;
    }

    /// Returns the source for an object, creating it when missing.
    pub fn get_or_create(&self, object_id: &str) -> Arc<PlaybackSource> {
        {
            let sources = self.sources.read().expect("registry lock poisoned");
            if let Some(source) = sources.get(object_id) {
                return source.clone();
            }
        }
        let mut sources = self.sources.write().expect("registry lock poisoned");
        sources
            .entry(object_id.to_string())
            .or_insert_with(|| {
                debug!("playback source created for {}", object_id);
                Arc::new(PlaybackSource::new(object_id))
            })
            .clone()
    }

    /// Looks up a source without creating one.
    pub fn get(&self, object_id: &str) -> Option<Arc<PlaybackSource>> {
        self.sources
            .read()
            .ok()
            .and_then(|sources| sources.get(object_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        id: String,
        frames: Mutex<Vec<Frame>>,
    }

    impl RecordingSink {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                frames: Mutex::new(Vec::new()),
            })
        }

        fn frames(&self) -> Vec<Frame> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        fn sink_id(&self) -> &str {
            &self.id
        }

        async fn send_frame(&self, frame: Frame) -> Result<()> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    fn init_frame(object_id: &str, count: i64) -> Frame {
        let mut props = Map::new();
        props.insert("count".to_string(), serde_json::json!(count));
        Frame::Init {
            object_id: object_id.to_string(),
            props,
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_linked_sinks() {
        let source = PlaybackSource::new("demo.Counter");
        let a = RecordingSink::new("a");
        let b = RecordingSink::new("b");
        source.linked(a.clone()).await;
        source.linked(b.clone()).await;

        source
            .handle_frame(Frame::PropertyChange {
                property_id: "demo.Counter/count".to_string(),
                value: serde_json::json!(3),
            })
            .await;

        assert_eq!(a.frames().len(), 1);
        assert_eq!(b.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_late_joiner_receives_cached_init() {
        let source = PlaybackSource::new("demo.Counter");
        source.handle_frame(init_frame("demo.Counter", 5)).await;

        let late = RecordingSink::new("late");
        source.linked(late.clone()).await;

        let frames = late.frames();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Init { object_id, props } => {
                assert_eq!(object_id, "demo.Counter");
                assert_eq!(props.get("count"), Some(&serde_json::json!(5)));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_property_cache_tracks_changes() {
        let source = PlaybackSource::new("demo.Counter");
        source.handle_frame(init_frame("demo.Counter", 1)).await;
        source
            .handle_frame(Frame::PropertyChange {
                property_id: "demo.Counter/count".to_string(),
                value: serde_json::json!(2),
            })
            .await;
        // A change for a different object leaves the cache alone.
        source
            .handle_frame(Frame::PropertyChange {
                property_id: "other.Object/count".to_string(),
                value: serde_json::json!(99),
            })
            .await;

        let props = source.collect_properties();
        assert_eq!(props.get("count"), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    async fn test_downstream_writes_rejected() {
        let source = PlaybackSource::new("demo.Counter");
        assert!(source.invoke("demo.Counter/increment", &[]).is_err());
        assert!(source
            .set_property("demo.Counter/count", &serde_json::json!(1))
            .is_err());
    }

    #[tokio::test]
    async fn test_unlinked_stops_delivery() {
        let source = PlaybackSource::new("demo.Counter");
        let sink = RecordingSink::new("a");
        source.linked(sink.clone()).await;
        source.unlinked("a");
        assert_eq!(source.linked_count(), 0);

        source.handle_frame(init_frame("demo.Counter", 1)).await;
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn test_registry_dispatch_creates_sources() {
        let registry = PlaybackRegistry::new();
        registry
            .dispatch(Frame::Link {
                object_id: "demo.Counter".to_string(),
            })
            .await;

        assert!(registry.get("demo.Counter").is_some());
        assert!(registry.get("other").is_none());

        let first = registry.get_or_create("demo.Counter");
        let second = registry.get_or_create("demo.Counter");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
