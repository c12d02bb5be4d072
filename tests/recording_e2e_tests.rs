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

// End-to-end recording tests against a managed nats-server. These are
// ignored by default; run them with `cargo test -- --ignored` on a machine
// with nats-server on PATH.

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use streams_recorder::buffer;
use streams_recorder::bus::{self, NatsServer, ServerConfig};
use streams_recorder::config::names;
use streams_recorder::controller::{
    fetch_state, send_command, Controller, ControllerOptions, RpcRequest, Status, ACTION_START,
    ACTION_STOP,
};
use streams_recorder::session::{self, SessionStore};
use streams_recorder::store::{DeviceInfo, DeviceStore};

async fn start_stack() -> Result<(NatsServer, async_nats::Client, async_nats::jetstream::Context, Controller)>
{
    let server = NatsServer::start(ServerConfig {
        port: 0,
        ..Default::default()
    })
    .await?;
    let url = server.client_url().to_string();
    let (client, js) = bus::connect_jetstream(&url).await?;
    let controller = Controller::new(client.clone(), js.clone(), ControllerOptions::new(url)).await?;
    controller.start().await?;
    Ok((server, client, js, controller))
}

fn start_request(session_id: &str, device_id: &str) -> RpcRequest {
    RpcRequest {
        action: ACTION_START.to_string(),
        subject: names::MONITOR_SUBJECT.to_string(),
        device_id: device_id.to_string(),
        session_id: session_id.to_string(),
        ..Default::default()
    }
}

async fn wait_for_count(
    js: &async_nats::jetstream::Context,
    session_id: &str,
    expected: u64,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(state) = fetch_state(js, names::STATE_BUCKET, session_id).await {
            if state.message_count >= expected {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for {expected} messages on {session_id}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
#[ignore = "requires nats-server on PATH"]
async fn test_happy_path_record_stop_export() -> Result<()> {
    let (server, client, js, controller) = start_stack().await?;

    let resp = send_command(&client, names::RECORD_RPC_SUBJECT, &start_request("s1", "device-1")).await?;
    assert!(resp.ok, "start failed: {}", resp.message);

    // Give the recorder a moment to subscribe before publishing.
    tokio::time::sleep(Duration::from_millis(500)).await;

    for i in 0..3 {
        client
            .publish(
                "monitor.device-1".to_string(),
                Bytes::from(format!("{{\"i\":{i}}}")),
            )
            .await?;
        client.flush().await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    wait_for_count(&js, "s1", 3).await?;

    let resp = send_command(
        &client,
        names::RECORD_RPC_SUBJECT,
        &RpcRequest {
            action: ACTION_STOP.to_string(),
            session_id: "s1".to_string(),
            ..Default::default()
        },
    )
    .await?;
    assert!(resp.ok);

    let state = fetch_state(&js, names::STATE_BUCKET, "s1").await?;
    assert_eq!(state.status, Status::Stopped);
    assert_eq!(state.message_count, 3);

    let sessions = SessionStore::new(&js, names::SESSION_BUCKET).await?;
    let (meta, _) = sessions.load("s1").await?;
    assert_eq!(meta.message_count, 3);

    let mut out: Vec<u8> = Vec::new();
    let written = session::export(
        CancellationToken::new(),
        session::ExportOptions {
            server_url: server.client_url().to_string(),
            session_id: "s1".to_string(),
            ..Default::default()
        },
        &mut out,
    )
    .await?;
    assert_eq!(written, 3);
    let lines: Vec<&str> = std::str::from_utf8(&out)?.trim_end().split('\n').collect();
    assert_eq!(lines, vec!["{\"i\":0}", "{\"i\":1}", "{\"i\":2}"]);

    controller.close().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires nats-server on PATH"]
async fn test_duplicate_start_rejected() -> Result<()> {
    let (server, client, _js, controller) = start_stack().await?;

    let resp = send_command(&client, names::RECORD_RPC_SUBJECT, &start_request("dup", "device-1")).await?;
    assert!(resp.ok);

    let resp = send_command(&client, names::RECORD_RPC_SUBJECT, &start_request("dup", "device-1")).await?;
    assert!(!resp.ok);
    assert!(resp.message.contains("already running"), "{}", resp.message);

    controller.close().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires nats-server on PATH"]
async fn test_stop_without_start() -> Result<()> {
    let (server, client, js, controller) = start_stack().await?;

    let resp = send_command(
        &client,
        names::RECORD_RPC_SUBJECT,
        &RpcRequest {
            action: ACTION_STOP.to_string(),
            session_id: "nope".to_string(),
            ..Default::default()
        },
    )
    .await?;
    assert!(resp.ok);
    assert_eq!(resp.message, "no active recording");

    let state = fetch_state(&js, names::STATE_BUCKET, "nope").await?;
    assert_eq!(state.status, Status::Stopped);

    controller.close().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires nats-server on PATH"]
async fn test_unknown_action_rejected() -> Result<()> {
    let (server, client, _js, controller) = start_stack().await?;

    let resp = send_command(
        &client,
        names::RECORD_RPC_SUBJECT,
        &RpcRequest {
            action: "frobnicate".to_string(),
            ..Default::default()
        },
    )
    .await?;
    assert!(!resp.ok);
    assert!(resp.message.contains("unknown action"), "{}", resp.message);

    controller.close().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires nats-server on PATH"]
async fn test_pre_roll_includes_buffered_messages() -> Result<()> {
    let (server, client, js, controller) = start_stack().await?;

    // Configure the device buffer and seed one message 30 seconds old.
    let devices = DeviceStore::new(&js, names::DEVICE_BUCKET).await?;
    devices
        .upsert(
            "prd1",
            &DeviceInfo {
                buffer_duration: "5m".to_string(),
                ..Default::default()
            },
        )
        .await?;
    buffer::ensure_stream(&js, "prd1", Duration::from_secs(300)).await?;

    let mut headers = async_nats::HeaderMap::new();
    headers.insert(
        names::HEADER_BUFFERED_AT,
        bus::format_timestamp(Utc::now() - chrono::Duration::seconds(30)).as_str(),
    );
    js.publish_with_headers(
        names::buffer_subject_name("prd1"),
        headers,
        Bytes::from_static(b"{\"buffered\":true}"),
    )
    .await?
    .await?;

    let mut req = start_request("preroll-1", "prd1");
    req.pre_roll = "2m".to_string();
    let resp = send_command(&client, names::RECORD_RPC_SUBJECT, &req).await?;
    assert!(resp.ok, "start failed: {}", resp.message);

    wait_for_count(&js, "preroll-1", 1).await?;

    let resp = send_command(
        &client,
        names::RECORD_RPC_SUBJECT,
        &RpcRequest {
            action: ACTION_STOP.to_string(),
            session_id: "preroll-1".to_string(),
            ..Default::default()
        },
    )
    .await?;
    assert!(resp.ok);

    controller.close().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires nats-server on PATH"]
async fn test_pre_roll_exceeding_window_rejected() -> Result<()> {
    let (server, client, js, controller) = start_stack().await?;

    let devices = DeviceStore::new(&js, names::DEVICE_BUCKET).await?;
    devices
        .upsert(
            "prd2",
            &DeviceInfo {
                buffer_duration: "1m".to_string(),
                ..Default::default()
            },
        )
        .await?;

    let mut req = start_request("preroll-2", "prd2");
    req.pre_roll = "10m".to_string();
    let resp = send_command(&client, names::RECORD_RPC_SUBJECT, &req).await?;
    assert!(!resp.ok);
    assert!(resp.message.contains("exceeds buffer window"), "{}", resp.message);

    // A device without any buffer is rejected as well.
    let mut req = start_request("preroll-3", "no-buffer-device");
    req.pre_roll = "1m".to_string();
    let resp = send_command(&client, names::RECORD_RPC_SUBJECT, &req).await?;
    assert!(!resp.ok);
    assert!(resp.message.contains("not configured"), "{}", resp.message);

    controller.close().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires nats-server on PATH"]
async fn test_playback_preserves_headers() -> Result<()> {
    use futures::StreamExt;

    let (server, client, js, controller) = start_stack().await?;

    let resp = send_command(&client, names::RECORD_RPC_SUBJECT, &start_request("pb1", "device-1")).await?;
    assert!(resp.ok, "start failed: {}", resp.message);
    tokio::time::sleep(Duration::from_millis(500)).await;

    for i in 0..3 {
        client
            .publish(
                "monitor.device-1".to_string(),
                Bytes::from(format!("{{\"i\":{i}}}")),
            )
            .await?;
        client.flush().await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    wait_for_count(&js, "pb1", 3).await?;

    let resp = send_command(
        &client,
        names::RECORD_RPC_SUBJECT,
        &RpcRequest {
            action: ACTION_STOP.to_string(),
            session_id: "pb1".to_string(),
            ..Default::default()
        },
    )
    .await?;
    assert!(resp.ok);

    let mut sub = client.subscribe("playback.test".to_string()).await?;
    session::playback(
        CancellationToken::new(),
        session::PlaybackOptions {
            server_url: server.client_url().to_string(),
            session_id: "pb1".to_string(),
            target_subject: "playback.test".to_string(),
            speed: 10.0,
            ..Default::default()
        },
    )
    .await?;

    for _ in 0..3 {
        let msg = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await?
            .expect("playback subject closed");
        let headers = msg.headers.expect("headers missing");
        assert!(headers.get(names::HEADER_RECORDED_AT).is_some());
        assert!(headers.get(names::HEADER_REPLAYED_AT).is_some());
    }

    controller.close().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires nats-server on PATH"]
async fn test_delete_removes_stream_and_metadata() -> Result<()> {
    let (server, client, js, controller) = start_stack().await?;

    let resp = send_command(&client, names::RECORD_RPC_SUBJECT, &start_request("del1", "device-1")).await?;
    assert!(resp.ok);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let resp = send_command(
        &client,
        names::RECORD_RPC_SUBJECT,
        &RpcRequest {
            action: ACTION_STOP.to_string(),
            session_id: "del1".to_string(),
            ..Default::default()
        },
    )
    .await?;
    assert!(resp.ok);

    let sessions = SessionStore::new(&js, names::SESSION_BUCKET).await?;
    let (meta, _) = sessions.load("del1").await?;
    sessions.delete("del1").await?;

    assert!(sessions.info("del1").await.is_err());
    assert!(bus::get_stream(&js, &meta.stream).await.is_err());

    controller.close().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires nats-server on PATH"]
async fn test_buffer_replay_repeatable() -> Result<()> {
    let (server, _client, js, controller) = start_stack().await?;

    buffer::ensure_stream(&js, "rep1", Duration::from_secs(300)).await?;
    buffer::append(
        &js,
        "rep1",
        Duration::from_secs(300),
        None,
        Bytes::from_static(b"{\"n\":1}"),
        None,
    )
    .await?;

    let since = Utc::now() - chrono::Duration::seconds(60);
    let until = Utc::now() + chrono::Duration::seconds(1);

    for _ in 0..2 {
        let outcome = buffer::replay(
            &CancellationToken::new(),
            &js,
            "rep1",
            since,
            until,
            |_msg| async move { Ok(()) },
        )
        .await?;
        assert_eq!(outcome.count, 1);
    }

    controller.close().await;
    server.shutdown().await;
    Ok(())
}
