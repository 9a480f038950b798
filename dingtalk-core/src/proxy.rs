//! Reverse proxy from the namespaced prefix to the chii bridge.
//!
//! Requests under `<proxy prefix>/...` are forwarded to
//! `http://localhost:<bridge port>/...` with the prefix removed, WebSocket
//! upgrades included. Everything else, and everything that arrives before
//! the bridge is up, is handed to the next handler (the latter flagged as
//! proxied).
//!
//! The forwarding helpers are shared with the gateway's fallback to the app
//! dev server.

use crate::error::ProxyError;
use crate::session::SharedSession;
use axum::{
    body::Body,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, Request, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self, client::IntoClientRequest, protocol::frame::coding::CloseCode,
        protocol::CloseFrame as UpstreamCloseFrame,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Marks requests and responses that went through the bridge proxy, so
/// transforms further down the stack leave them alone.
#[derive(Debug, Clone, Copy)]
pub struct ProxiedRequest;

const SKIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "accept-encoding",
];

const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
];

/// Upstream target of the bridge proxy. Created once per process.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    port: u16,
    client: Client,
}

impl ProxyHandle {
    pub fn new(port: u16, client: Client) -> Self {
        Self { port, client }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn http_url(&self, path_and_query: &str) -> String {
        format!("http://localhost:{}{}", self.port, path_and_query)
    }

    pub fn ws_url(&self, path_and_query: &str) -> String {
        format!("ws://localhost:{}{}", self.port, path_and_query)
    }
}

/// Middleware forwarding the proxy prefix to the bridge.
pub async fn proxy_bridge(
    State(session): State<SharedSession>,
    mut req: Request,
    next: Next,
) -> Response {
    let stripped = session
        .routes
        .strip_proxy_prefix(req.uri().path())
        .map(|path| with_query(path, req.uri().query()));
    let Some(path_and_query) = stripped else {
        return next.run(req).await;
    };

    // Flagged even when it falls through, so the injector never treats
    // bridge paths as app modules.
    req.extensions_mut().insert(ProxiedRequest);

    let Some(proxy) = session.proxy() else {
        debug!("chii bridge not started yet, passing on {}", req.uri());
        return next.run(req).await;
    };

    let result = if is_websocket_upgrade(req.headers()) {
        debug!("WS upgrade: {} -> {}", req.uri(), path_and_query);
        forward_websocket(req, proxy.ws_url(&path_and_query)).await
    } else {
        debug!("{} {} -> {}", req.method(), req.uri(), path_and_query);
        forward_http(&proxy.client, &proxy.http_url(&path_and_query), req).await
    };

    let mut response = result.unwrap_or_else(|e| {
        debug!("Proxy error: {}", e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("Proxy error: {}", e))
    });

    response.extensions_mut().insert(ProxiedRequest);
    response
}

pub fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    }
}

pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

pub fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message.to_string(),
    )
        .into_response()
}

/// Build the upstream request, dropping hop-by-hop and compression headers.
fn build_http_request(
    client: &Client,
    method: axum::http::Method,
    url: &str,
    headers: &HeaderMap,
    body_bytes: bytes::Bytes,
) -> reqwest::RequestBuilder {
    let mut req_builder = client.request(method, url);

    for (key, value) in headers.iter() {
        if !SKIPPED_REQUEST_HEADERS.contains(&key.as_str()) {
            req_builder = req_builder.header(key.clone(), value.clone());
        }
    }

    req_builder.body(body_bytes)
}

/// Forwards a plain HTTP request and streams the upstream response back.
pub async fn forward_http(
    client: &Client,
    target_url: &str,
    req: Request,
) -> Result<Response, ProxyError> {
    let method = req.method().clone();
    let headers = req.headers().clone();

    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(ProxyError::Body)?;

    let response = build_http_request(client, method, target_url, &headers, body_bytes)
        .send()
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = Body::from_stream(response.bytes_stream());

    let mut resp_builder = Response::builder().status(status);
    for (key, value) in headers.iter() {
        if !SKIPPED_RESPONSE_HEADERS.contains(&key.as_str()) {
            resp_builder = resp_builder.header(key.clone(), value.clone());
        }
    }

    Ok(resp_builder.body(body)?)
}

/// Opens the upstream WebSocket first, then accepts the inbound upgrade and
/// pumps frames both ways.
///
/// Failing to reach the upstream is reported before the upgrade completes,
/// so the caller can still answer with a status code. Once upgraded, an
/// error on either side drops both sockets.
pub async fn forward_websocket(req: Request, upstream_url: String) -> Result<Response, ProxyError> {
    let (mut parts, _body) = req.into_parts();
    let offered_protocols = parts.headers.get(header::SEC_WEBSOCKET_PROTOCOL).cloned();

    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let mut upstream_req = upstream_url.as_str().into_client_request()?;
    if let Some(protocols) = offered_protocols {
        upstream_req
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, protocols);
    }

    let (upstream, handshake) = connect_async(upstream_req).await?;

    let selected_protocol = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value: &HeaderValue| value.to_str().ok())
        .map(str::to_string);

    let ws = match selected_protocol {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    Ok(ws
        .on_failed_upgrade(|e| debug!("WS upgrade failed: {}", e))
        .on_upgrade(move |socket| pipe_websocket(socket, upstream)))
}

async fn pipe_websocket(socket: WebSocket, upstream: UpstreamSocket) {
    let (mut client_tx, mut client_rx) = socket.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(msg) = client_rx.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("Socket error: {}", e);
                    break;
                }
            };
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = upstream_tx.send(to_upstream(msg)).await {
                debug!("Upstream WebSocket send failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(msg) = upstream_rx.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("Upstream WebSocket error: {}", e);
                    break;
                }
            };
            let Some(msg) = from_upstream(msg) else {
                continue;
            };
            let closing = matches!(msg, Message::Close(_));
            if client_tx.send(msg).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    // Whichever side finishes first tears down the other
    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }
}

fn to_upstream(msg: Message) -> tungstenite::Message {
    match msg {
        Message::Text(text) => tungstenite::Message::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => tungstenite::Message::Binary(data),
        Message::Ping(data) => tungstenite::Message::Ping(data),
        Message::Pong(data) => tungstenite::Message::Pong(data),
        Message::Close(frame) => tungstenite::Message::Close(frame.map(|frame| UpstreamCloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.as_str().to_owned().into(),
        })),
    }
}

fn from_upstream(msg: tungstenite::Message) -> Option<Message> {
    match msg {
        tungstenite::Message::Text(text) => Some(Message::Text(text.as_str().to_owned().into())),
        tungstenite::Message::Binary(data) => Some(Message::Binary(data)),
        tungstenite::Message::Ping(data) => Some(Message::Ping(data)),
        tungstenite::Message::Pong(data) => Some(Message::Pong(data)),
        tungstenite::Message::Close(frame) => Some(Message::Close(frame.map(|frame| CloseFrame {
            code: frame.code.into(),
            reason: frame.reason.as_str().to_owned().into(),
        }))),
        tungstenite::Message::Frame(_) => None,
    }
}
