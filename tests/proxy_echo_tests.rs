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

// End-to-end proxy tests against a local WebSocket echo upstream.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use streams_recorder::proxy::{
    ConnectionInfo, MessageMode, ProxyMessage, ProxyMiddleware, ProxyOptions, RouteConfig,
    SessionHooks, WsProxy,
};

async fn echo_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(msg)) = socket.recv().await {
            match msg {
                AxumMessage::Close(_) => break,
                AxumMessage::Text(_) | AxumMessage::Binary(_) => {
                    if socket.send(msg).await.is_err() {
                        break;
                    }
                }
                _ => {}
            }
        }
    })
}

async fn start_echo_server() -> SocketAddr {
    let app = Router::new().route("/", any(echo_handler));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn start_proxy(proxy: Arc<WsProxy>) -> SocketAddr {
    let app = proxy.router();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn text_route(echo: SocketAddr) -> RouteConfig {
    RouteConfig {
        path: "/ws/:id".to_string(),
        param: "id".to_string(),
        targets: HashMap::from([("abc".to_string(), format!("ws://{echo}/"))]),
        mode: MessageMode::Text,
    }
}

#[tokio::test]
async fn test_text_round_trip_through_proxy() -> Result<()> {
    let echo = start_echo_server().await;
    let proxy = WsProxy::new(ProxyOptions {
        routes: vec![text_route(echo)],
        ..Default::default()
    })?;
    let addr = start_proxy(proxy).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/abc")).await?;
    let payload = r#"{"hello":"world"}"#;
    ws.send(Message::Text(payload.into())).await?;

    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await?
        .expect("connection closed")?;
    match reply {
        Message::Text(text) => assert_eq!(text.as_str(), payload),
        other => panic!("unexpected reply {other:?}"),
    }

    ws.close(None).await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_target_rejected() {
    let echo = start_echo_server().await;
    let proxy = WsProxy::new(ProxyOptions {
        routes: vec![text_route(echo)],
        ..Default::default()
    })
    .unwrap();
    let addr = start_proxy(proxy).await;

    // The handshake fails because the proxy answers 404 before upgrading.
    let result = connect_async(format!("ws://{addr}/ws/zzz")).await;
    assert!(result.is_err());
}

struct DropMiddleware {
    dropped: AtomicUsize,
}

#[async_trait]
impl ProxyMiddleware for DropMiddleware {
    async fn handle(&self, msg: &mut ProxyMessage) -> Result<()> {
        if msg.data.windows(7).any(|window| window == b"drop-me") {
            msg.drop = true;
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_middleware_drops_frames() -> Result<()> {
    let echo = start_echo_server().await;
    let middleware = Arc::new(DropMiddleware {
        dropped: AtomicUsize::new(0),
    });
    let proxy = WsProxy::new(ProxyOptions {
        routes: vec![text_route(echo)],
        middlewares: vec![middleware.clone()],
        ..Default::default()
    })?;
    let addr = start_proxy(proxy).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/abc")).await?;
    ws.send(Message::Text("drop-me please".into())).await?;
    ws.send(Message::Text("keep me".into())).await?;

    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await?
        .expect("connection closed")?;
    match reply {
        Message::Text(text) => assert_eq!(text.as_str(), "keep me"),
        other => panic!("unexpected reply {other:?}"),
    }
    assert_eq!(middleware.dropped.load(Ordering::SeqCst), 1);

    ws.close(None).await?;
    Ok(())
}

struct RejectingHooks;

#[async_trait]
impl SessionHooks for RejectingHooks {
    async fn on_connect(&self, _info: &ConnectionInfo) -> Result<()> {
        anyhow::bail!("not on the list");
    }
}

#[tokio::test]
async fn test_connect_hook_rejects_session() -> Result<()> {
    let echo = start_echo_server().await;
    let proxy = WsProxy::new(ProxyOptions {
        routes: vec![text_route(echo)],
        hooks: Some(Arc::new(RejectingHooks)),
        ..Default::default()
    })?;
    let addr = start_proxy(proxy).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/abc")).await?;
    // The first frame from the proxy must be a policy-violation close.
    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await?
        .expect("connection closed")?;
    match reply {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1008);
        }
        other => panic!("unexpected reply {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_binary_frame_on_text_route_aborts() -> Result<()> {
    let echo = start_echo_server().await;
    let proxy = WsProxy::new(ProxyOptions {
        routes: vec![text_route(echo)],
        ..Default::default()
    })?;
    let addr = start_proxy(proxy).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/abc")).await?;
    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await?;

    // The session ends without echoing the frame back.
    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next()).await?;
    match reply {
        None => {}
        Some(Ok(Message::Close(_))) => {}
        Some(Ok(other)) => panic!("unexpected reply {other:?}"),
        Some(Err(_)) => {}
    }
    Ok(())
}

#[tokio::test]
async fn test_binary_route_round_trip() -> Result<()> {
    let echo = start_echo_server().await;
    let route = RouteConfig {
        path: "/bin/:id".to_string(),
        param: "id".to_string(),
        targets: HashMap::from([("abc".to_string(), format!("ws://{echo}/"))]),
        mode: MessageMode::Binary,
    };
    let proxy = WsProxy::new(ProxyOptions {
        routes: vec![route],
        ..Default::default()
    })?;
    let addr = start_proxy(proxy).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/bin/abc")).await?;
    let payload = vec![0u8, 1, 2, 254, 255];
    ws.send(Message::Binary(payload.clone().into())).await?;

    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await?
        .expect("connection closed")?;
    match reply {
        Message::Binary(data) => assert_eq!(data.to_vec(), payload),
        other => panic!("unexpected reply {other:?}"),
    }

    ws.close(None).await?;
    Ok(())
}
