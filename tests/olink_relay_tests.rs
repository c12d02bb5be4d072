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

// Frame handling through the playback fan-out, driven with recorded wire
// payloads exactly as the relay receives them.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use streams_recorder::olink::{Frame, FrameSink, PlaybackRegistry};

struct CollectingSink {
    id: String,
    frames: Mutex<Vec<Frame>>,
}

impl CollectingSink {
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
impl FrameSink for CollectingSink {
    fn sink_id(&self) -> &str {
        &self.id
    }

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

async fn dispatch_raw(registry: &PlaybackRegistry, raw: &[u8]) {
    let frame = Frame::decode(raw).unwrap();
    registry.dispatch(frame).await;
}

#[tokio::test]
async fn test_recorded_sequence_fans_out() {
    let registry = PlaybackRegistry::new();

    // Link creates the source; attach an observer before state arrives.
    dispatch_raw(&registry, br#"[10, "demo.Counter"]"#).await;
    let sink = CollectingSink::new("observer-1");
    registry
        .get("demo.Counter")
        .unwrap()
        .linked(sink.clone())
        .await;

    dispatch_raw(&registry, br#"[11, "demo.Counter", {"count": 0}]"#).await;
    dispatch_raw(&registry, br#"[21, "demo.Counter/count", 1]"#).await;
    dispatch_raw(&registry, br#"[40, "demo.Counter/tick", ["a"]]"#).await;

    let frames = sink.frames();
    assert_eq!(frames.len(), 3);
    assert!(matches!(frames[0], Frame::Init { .. }));
    assert!(matches!(frames[1], Frame::PropertyChange { .. }));
    assert!(matches!(frames[2], Frame::Signal { .. }));

    let source = registry.get("demo.Counter").unwrap();
    let props = source.collect_properties();
    assert_eq!(props.get("count"), Some(&serde_json::json!(1)));
}

#[tokio::test]
async fn test_objects_are_isolated() {
    let registry = PlaybackRegistry::new();

    let counter_sink = CollectingSink::new("counter");
    let clock_sink = CollectingSink::new("clock");

    registry
        .get_or_create("demo.Counter")
        .linked(counter_sink.clone())
        .await;
    registry
        .get_or_create("demo.Clock")
        .linked(clock_sink.clone())
        .await;

    dispatch_raw(&registry, br#"[21, "demo.Counter/count", 5]"#).await;
    dispatch_raw(&registry, br#"[21, "demo.Clock/time", "12:00"]"#).await;

    assert_eq!(counter_sink.frames().len(), 1);
    assert_eq!(clock_sink.frames().len(), 1);
    assert_eq!(
        registry.get("demo.Counter").unwrap().collect_properties()["count"],
        serde_json::json!(5)
    );
    assert_eq!(
        registry.get("demo.Clock").unwrap().collect_properties()["time"],
        serde_json::json!("12:00")
    );
}

#[tokio::test]
async fn test_invoke_reply_routes_by_method_symbol() {
    let registry = PlaybackRegistry::new();
    let sink = CollectingSink::new("observer");
    registry
        .get_or_create("calc.Machine")
        .linked(sink.clone())
        .await;

    dispatch_raw(&registry, br#"[30, 7, "calc.Machine/add", [1, 2]]"#).await;
    dispatch_raw(&registry, br#"[31, 7, "calc.Machine/add", 3]"#).await;

    let frames = sink.frames();
    assert_eq!(frames.len(), 2);
    match &frames[1] {
        Frame::InvokeReply {
            request_id,
            method_id,
            value,
        } => {
            assert_eq!(*request_id, 7);
            assert_eq!(method_id, "calc.Machine/add");
            assert_eq!(value, &serde_json::json!(3));
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn test_string_tagged_frames_dispatch() {
    let registry = PlaybackRegistry::new();
    let sink = CollectingSink::new("observer");
    registry
        .get_or_create("demo.Counter")
        .linked(sink.clone())
        .await;

    dispatch_raw(&registry, br#"["change", "demo.Counter/count", 9]"#).await;
    assert_eq!(sink.frames().len(), 1);
}
