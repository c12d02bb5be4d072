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

// WebSocket fan-out proxy: upgrades incoming requests and bridges them to
// configured upstream targets with per-frame middleware. Frames flow through
// two forwarders, one per direction; the first error on either side ends the
// session.

pub mod path;

pub use path::{build_route_path, convert_colon_params, normalize_base_path, PathPattern};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message as ClientMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::{SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Whether a proxy route operates on text or binary frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageMode {
    #[default]
    Text,
    Binary,
}

/// Movement of a proxied message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    ClientToUpstream,
    UpstreamToClient,
}

/// Configures how requests for a specific path are proxied.
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    /// HTTP route to match, supporting colon-style parameters (e.g. /ws/:id).
    pub path: String,
    /// Named parameter that maps to `targets` keys. Empty selects the single
    /// default target.
    pub param: String,
    /// Parameter values to upstream WebSocket URLs.
    pub targets: HashMap<String, String>,
    pub mode: MessageMode,
}

/// Details about one proxied WebSocket session.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub route_path: String,
    pub target_id: String,
    pub target_url: String,
}

/// Metadata and payload of one frame, handed to each middleware in order.
#[derive(Debug)]
pub struct ProxyMessage {
    pub connection: Arc<ConnectionInfo>,
    pub direction: MessageDirection,
    pub mode: MessageMode,
    pub data: Vec<u8>,
    /// Set to true to silently skip forwarding this frame.
    pub drop: bool,
}

/// Inspects and optionally mutates proxied frames.
#[async_trait]
pub trait ProxyMiddleware: Send + Sync {
    async fn handle(&self, msg: &mut ProxyMessage) -> Result<()>;
}

/// Session lifecycle hooks.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// A non-Ok return rejects the session with a policy-violation close.
    async fn on_connect(&self, _info: &ConnectionInfo) -> Result<()> {
        Ok(())
    }

    /// Fires once per session with the first error, or None on a clean close.
    async fn on_disconnect(&self, _info: &ConnectionInfo, _error: Option<&anyhow::Error>) {}
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("wsproxy: target not configured")]
    TargetNotConfigured,

    #[error("wsproxy: unexpected websocket message type")]
    UnexpectedMessageType,
}

/// WSProxy configuration.
pub struct ProxyOptions {
    pub base_path: String,
    pub routes: Vec<RouteConfig>,
    /// Upstream dial attempts; clamped to at least 1.
    pub reconnect_attempts: u32,
    /// Sleep between dial attempts; defaults to 500 ms when zero.
    pub reconnect_backoff: Duration,
    pub middlewares: Vec<Arc<dyn ProxyMiddleware>>,
    pub hooks: Option<Arc<dyn SessionHooks>>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            routes: Vec::new(),
            reconnect_attempts: 1,
            reconnect_backoff: Duration::from_millis(500),
            middlewares: Vec::new(),
            hooks: None,
        }
    }
}

struct RouteEntry {
    config: RouteConfig,
    pattern: PathPattern,
}

/// Upgrades incoming HTTP requests to WebSockets and bridges them to
/// upstream targets.
pub struct WsProxy {
    base_path: String,
    reconnect_attempts: u32,
    reconnect_backoff: Duration,
    routes: RwLock<Vec<Arc<RouteEntry>>>,
    middlewares: RwLock<Vec<Arc<dyn ProxyMiddleware>>>,
    hooks: Option<Arc<dyn SessionHooks>>,
}

impl WsProxy {
    /// Validates the options and returns a ready-to-mount proxy.
    pub fn new(opts: ProxyOptions) -> Result<Arc<Self>> {
        let reconnect_backoff = if opts.reconnect_backoff.is_zero() {
            Duration::from_millis(500)
        } else {
            opts.reconnect_backoff
        };

        let proxy = Arc::new(Self {
            base_path: normalize_base_path(&opts.base_path),
            reconnect_attempts: opts.reconnect_attempts.max(1),
            reconnect_backoff,
            routes: RwLock::new(Vec::new()),
            middlewares: RwLock::new(Vec::new()),
            hooks: opts.hooks,
        });

        for (idx, route) in opts.routes.into_iter().enumerate() {
            proxy
                .add_route(route)
                .with_context(|| format!("wsproxy: route {idx} invalid"))?;
        }
        for mw in opts.middlewares {
            proxy.use_middleware(mw);
        }

        Ok(proxy)
    }

    /// Registers an additional proxy route at runtime.
    pub fn add_route(&self, route: RouteConfig) -> Result<()> {
        if route.path.trim().is_empty() && self.base_path.is_empty() {
            bail!("wsproxy: route path cannot be empty when base path is empty");
        }
        if route.targets.is_empty() {
            bail!("wsproxy: route {} must define at least one target", route.path);
        }
        if route.param.is_empty() && route.path.contains(':') {
            bail!("wsproxy: route {} requires param to select target", route.path);
        }

        let registered = build_route_path(&self.base_path, &route.path);
        let pattern = PathPattern::parse(&registered);
        debug!("wsproxy route registered at {}", registered);

        let mut routes = self.routes.write().expect("route lock poisoned");
        routes.push(Arc::new(RouteEntry {
            config: route,
            pattern,
        }));
        Ok(())
    }

    /// Appends a middleware that can inspect or drop proxied messages.
    pub fn use_middleware(&self, mw: Arc<dyn ProxyMiddleware>) {
        let mut middlewares = self.middlewares.write().expect("middleware lock poisoned");
        middlewares.push(mw);
    }

    /// Builds the HTTP handler for this proxy.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .fallback(serve_route)
            .with_state(self.clone())
    }

    /// Serves the proxy on the given address until the token is cancelled.
    pub async fn serve(self: Arc<Self>, addr: &str, cancel: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        info!("wsproxy listening on {}", addr);
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .context("wsproxy server")?;
        Ok(())
    }

    fn match_route(&self, path: &str) -> Option<(Arc<RouteEntry>, HashMap<String, String>)> {
        let routes = self.routes.read().expect("route lock poisoned");
        for entry in routes.iter() {
            if let Some(params) = entry.pattern.matches(path) {
                return Some((entry.clone(), params));
            }
        }
        None
    }

    async fn run_middlewares(&self, msg: &mut ProxyMessage) -> Result<()> {
        let snapshot: Vec<Arc<dyn ProxyMiddleware>> = {
            let middlewares = self.middlewares.read().expect("middleware lock poisoned");
            middlewares.clone()
        };
        for mw in snapshot {
            mw.handle(msg).await?;
            if msg.drop {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn dial_upstream(
        &self,
        target: &str,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let mut last_err = None;
        for attempt in 0..self.reconnect_attempts {
            match connect_async(target).await {
                Ok((stream, _)) => return Ok(stream),
                Err(err) => {
                    warn!(
                        "wsproxy upstream dial failed target={} attempt={}: {}",
                        target,
                        attempt + 1,
                        err
                    );
                    last_err = Some(err);
                }
            }
            tokio::time::sleep(self.reconnect_backoff).await;
        }
        Err(last_err
            .map(anyhow::Error::from)
            .unwrap_or_else(|| anyhow!("wsproxy: no dial attempts made")))
    }

    async fn run_session(
        self: Arc<Self>,
        mut socket: WebSocket,
        entry: Arc<RouteEntry>,
        info: Arc<ConnectionInfo>,
    ) {
        let upstream = match self.dial_upstream(&info.target_url).await {
            Ok(upstream) => upstream,
            Err(err) => {
                warn!(
                    "wsproxy upstream unavailable target={}: {}",
                    info.target_url, err
                );
                let _ = socket
                    .send(ClientMessage::Close(Some(CloseFrame {
                        code: close_code::AGAIN,
                        reason: "upstream unavailable".into(),
                    })))
                    .await;
                return;
            }
        };

        if let Some(hooks) = &self.hooks {
            if let Err(err) = hooks.on_connect(&info).await {
                warn!(
                    "wsproxy connect hook rejected client connection={}: {}",
                    info.id, err
                );
                let _ = socket
                    .send(ClientMessage::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: "connection rejected".into(),
                    })))
                    .await;
                return;
            }
        }

        let session = CancellationToken::new();
        let errors = Arc::new(SessionError::default());
        let expected = entry.config.mode;

        let (client_sink, client_read) = socket.split();
        let (upstream_sink, upstream_read) = upstream.split();

        let client_read = client_read.map(|item| {
            item.map(client_to_wire)
                .map_err(anyhow::Error::from)
        });
        let upstream_read = upstream_read.map(|item| {
            item.map(upstream_to_wire)
                .map_err(anyhow::Error::from)
        });

        let upstream_sink = upstream_sink
            .sink_map_err(anyhow::Error::from)
            .with(|frame: WireFrame| futures::future::ready(Ok::<_, anyhow::Error>(wire_to_upstream(frame))));
        let client_sink = client_sink
            .sink_map_err(anyhow::Error::from)
            .with(|frame: WireFrame| futures::future::ready(Ok::<_, anyhow::Error>(wire_to_client(frame))));

        let a = tokio::spawn(forward(
            self.clone(),
            session.clone(),
            errors.clone(),
            info.clone(),
            client_read,
            upstream_sink,
            MessageDirection::ClientToUpstream,
            expected,
        ));
        let b = tokio::spawn(forward(
            self.clone(),
            session.clone(),
            errors.clone(),
            info.clone(),
            upstream_read,
            client_sink,
            MessageDirection::UpstreamToClient,
            expected,
        ));

        let _ = tokio::join!(a, b);

        let first = errors.take();
        if let Some(hooks) = &self.hooks {
            hooks.on_disconnect(&info, first.as_ref()).await;
        }
        debug!("wsproxy session closed connection={}", info.id);
    }
}

/// Picks the upstream for a route given the requested parameter value.
fn resolve_target(route: &RouteConfig, requested: &str) -> Option<(String, String)> {
    if !route.param.is_empty() {
        if requested.is_empty() {
            return None;
        }
        return route
            .targets
            .get(requested)
            .map(|url| (requested.to_string(), url.clone()));
    }

    if !requested.is_empty() {
        if let Some(url) = route.targets.get(requested) {
            return Some((requested.to_string(), url.clone()));
        }
    }

    if let Some(url) = route.targets.get("") {
        return Some((String::new(), url.clone()));
    }

    if route.targets.len() == 1 {
        return route
            .targets
            .iter()
            .next()
            .map(|(id, url)| (id.clone(), url.clone()));
    }

    None
}

async fn serve_route(
    State(proxy): State<Arc<WsProxy>>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let Some((entry, params)) = proxy.match_route(uri.path()) else {
        return (StatusCode::NOT_FOUND, ProxyError::TargetNotConfigured.to_string())
            .into_response();
    };

    let requested = if entry.config.param.is_empty() {
        String::new()
    } else {
        params
            .get(&entry.config.param)
            .cloned()
            .unwrap_or_default()
    };

    let Some((target_id, target_url)) = resolve_target(&entry.config, &requested) else {
        return (StatusCode::NOT_FOUND, ProxyError::TargetNotConfigured.to_string())
            .into_response();
    };

    let info = Arc::new(ConnectionInfo {
        id: Uuid::new_v4().to_string(),
        route_path: entry.config.path.clone(),
        target_id,
        target_url,
    });

    let proxy = proxy.clone();
    ws.on_upgrade(move |socket| proxy.run_session(socket, entry, info))
}

#[derive(Default)]
struct SessionError {
    first: Mutex<Option<anyhow::Error>>,
}

impl SessionError {
    fn record(&self, err: anyhow::Error) {
        let mut guard = self.first.lock().expect("session error lock poisoned");
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    fn take(&self) -> Option<anyhow::Error> {
        self.first
            .lock()
            .expect("session error lock poisoned")
            .take()
    }
}

/// Library-independent frame form used between the two socket flavors.
enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
    /// Ping/pong and other control traffic; handled by the libraries.
    Control,
}

fn client_to_wire(msg: ClientMessage) -> WireFrame {
    match msg {
        ClientMessage::Text(text) => WireFrame::Text(text.as_str().to_string()),
        ClientMessage::Binary(data) => WireFrame::Binary(data.to_vec()),
        ClientMessage::Close(_) => WireFrame::Close,
        _ => WireFrame::Control,
    }
}

fn wire_to_client(frame: WireFrame) -> ClientMessage {
    match frame {
        WireFrame::Text(text) => ClientMessage::Text(text.into()),
        WireFrame::Binary(data) => ClientMessage::Binary(data.into()),
        WireFrame::Close => ClientMessage::Close(None),
        WireFrame::Control => ClientMessage::Ping(Vec::new().into()),
    }
}

fn upstream_to_wire(msg: UpstreamMessage) -> WireFrame {
    match msg {
        UpstreamMessage::Text(text) => WireFrame::Text(text.as_str().to_string()),
        UpstreamMessage::Binary(data) => WireFrame::Binary(data.to_vec()),
        UpstreamMessage::Close(_) => WireFrame::Close,
        _ => WireFrame::Control,
    }
}

fn wire_to_upstream(frame: WireFrame) -> UpstreamMessage {
    match frame {
        WireFrame::Text(text) => UpstreamMessage::Text(text.into()),
        WireFrame::Binary(data) => UpstreamMessage::Binary(data.into()),
        WireFrame::Close => UpstreamMessage::Close(None),
        WireFrame::Control => UpstreamMessage::Ping(Vec::new().into()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn forward<R, W>(
    proxy: Arc<WsProxy>,
    session: CancellationToken,
    errors: Arc<SessionError>,
    info: Arc<ConnectionInfo>,
    mut read: R,
    mut write: W,
    direction: MessageDirection,
    expected: MessageMode,
) where
    R: Stream<Item = Result<WireFrame>> + Unpin + Send,
    W: futures::Sink<WireFrame, Error = anyhow::Error> + Unpin + Send,
{
    loop {
        let item = tokio::select! {
            _ = session.cancelled() => return,
            item = read.next() => item,
        };

        let Some(item) = item else {
            // Peer went away without a close frame; clean end.
            session.cancel();
            return;
        };

        let frame = match item {
            Ok(frame) => frame,
            Err(err) => {
                errors.record(err);
                session.cancel();
                return;
            }
        };

        let (mode, data) = match frame {
            WireFrame::Text(text) => (MessageMode::Text, text.into_bytes()),
            WireFrame::Binary(data) => (MessageMode::Binary, data),
            WireFrame::Close => {
                session.cancel();
                return;
            }
            WireFrame::Control => continue,
        };

        if mode != expected {
            errors.record(ProxyError::UnexpectedMessageType.into());
            session.cancel();
            return;
        }

        let mut msg = ProxyMessage {
            connection: info.clone(),
            direction,
            mode,
            data,
            drop: false,
        };

        if let Err(err) = proxy.run_middlewares(&mut msg).await {
            errors.record(err);
            session.cancel();
            return;
        }
        if msg.drop {
            continue;
        }

        let out = match mode {
            MessageMode::Text => match String::from_utf8(msg.data) {
                Ok(text) => WireFrame::Text(text),
                Err(err) => {
                    errors.record(anyhow!("invalid utf-8 text frame: {err}"));
                    session.cancel();
                    return;
                }
            },
            MessageMode::Binary => WireFrame::Binary(msg.data),
        };

        if let Err(err) = write.send(out).await {
            errors.record(err);
            session.cancel();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_with_targets(param: &str, targets: &[(&str, &str)]) -> RouteConfig {
        RouteConfig {
            path: "/ws/:id".to_string(),
            param: param.to_string(),
            targets: targets
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            mode: MessageMode::Text,
        }
    }

    #[test]
    fn test_resolve_target_with_param() {
        let route = route_with_targets("id", &[("abc", "ws://a"), ("def", "ws://b")]);
        assert_eq!(
            resolve_target(&route, "abc"),
            Some(("abc".to_string(), "ws://a".to_string()))
        );
        assert_eq!(resolve_target(&route, "zzz"), None);
        assert_eq!(resolve_target(&route, ""), None);
    }

    #[test]
    fn test_resolve_target_default_entry() {
        let mut route = route_with_targets("", &[("", "ws://default"), ("x", "ws://x")]);
        route.path = "/ws".to_string();
        assert_eq!(
            resolve_target(&route, ""),
            Some((String::new(), "ws://default".to_string()))
        );
        assert_eq!(
            resolve_target(&route, "x"),
            Some(("x".to_string(), "ws://x".to_string()))
        );
    }

    #[test]
    fn test_resolve_target_lone_entry() {
        let mut route = route_with_targets("", &[("only", "ws://only")]);
        route.path = "/ws".to_string();
        assert_eq!(
            resolve_target(&route, ""),
            Some(("only".to_string(), "ws://only".to_string()))
        );
    }

    #[test]
    fn test_resolve_target_ambiguous() {
        let mut route = route_with_targets("", &[("a", "ws://a"), ("b", "ws://b")]);
        route.path = "/ws".to_string();
        assert_eq!(resolve_target(&route, ""), None);
    }

    #[test]
    fn test_new_rejects_route_without_targets() {
        let opts = ProxyOptions {
            routes: vec![RouteConfig {
                path: "/ws/:id".to_string(),
                param: "id".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(WsProxy::new(opts).is_err());
    }

    #[test]
    fn test_new_rejects_param_path_without_param() {
        let opts = ProxyOptions {
            routes: vec![route_with_targets("", &[("abc", "ws://a")])],
            ..Default::default()
        };
        assert!(WsProxy::new(opts).is_err());
    }

    #[test]
    fn test_add_route_at_runtime() {
        let proxy = WsProxy::new(ProxyOptions::default()).unwrap();
        proxy
            .add_route(route_with_targets("id", &[("abc", "ws://a")]))
            .unwrap();
        let matched = proxy.match_route("/ws/abc");
        assert!(matched.is_some());
        let (_, params) = matched.unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_base_path_prefixes_routes() {
        let proxy = WsProxy::new(ProxyOptions {
            base_path: "gateway/".to_string(),
            ..Default::default()
        })
        .unwrap();
        proxy
            .add_route(route_with_targets("id", &[("abc", "ws://a")]))
            .unwrap();
        assert!(proxy.match_route("/gateway/ws/abc").is_some());
        assert!(proxy.match_route("/ws/abc").is_none());
    }
}
