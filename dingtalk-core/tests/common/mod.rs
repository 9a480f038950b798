use async_trait::async_trait;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::{header, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dingtalk_core::{
    attach, serve_session, BridgeError, BridgeLauncher, Config, Namespace, Session, SharedSession,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::process::Child;
use tokio::sync::oneshot;
use url::Url;

pub const APP_HTML: &str = "<!DOCTYPE html><html><head></head><body><div id=\"app\"></div></body></html>";

/// Stands in for chii: serves a tiny fake bridge on the requested port
/// instead of spawning a process.
pub struct FakeBridgeLauncher {
    launches: AtomicUsize,
    listen: bool,
}

impl FakeBridgeLauncher {
    pub fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            listen: true,
        }
    }

    /// Reports success without listening, like a bridge that died right away.
    #[allow(dead_code)]
    pub fn unreachable() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            listen: false,
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BridgeLauncher for FakeBridgeLauncher {
    async fn launch(&self, port: u16) -> Result<Option<Child>, BridgeError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.listen {
            return Ok(None);
        }

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(BridgeError::Spawn)?;
        tokio::spawn(async move {
            axum::serve(listener, fake_bridge()).await.ok();
        });
        Ok(None)
    }
}

fn fake_bridge() -> Router {
    Router::new()
        .route(
            "/targets",
            get(|| async {
                Json(serde_json::json!({
                    "targets": [{
                        "id": "T1",
                        "title": "Page",
                        "url": "http://app.local/",
                        "userAgent": "DingTalk/7.0"
                    }]
                }))
            }),
        )
        .route(
            "/front_end/chii_app.html",
            get(|| async { Html(APP_HTML) }),
        )
        .route("/client/{*rest}", get(echo_socket))
        .fallback(|uri: Uri| async move { format!("bridge:{}", uri) })
}

fn fake_app() -> Router {
    Router::new()
        .route("/", get(|| async { Html(APP_HTML) }))
        .route("/src/main.js", get(|| script("console.log('main');\n")))
        .route("/src/other.js", get(|| script("console.log('other');\n")))
        .route("/ws", get(echo_socket))
        .fallback(|uri: Uri| async move { format!("app:{}", uri) })
}

async fn script(body: &'static str) -> Response {
    ([(header::CONTENT_TYPE, "application/javascript")], body).into_response()
}

/// Sends the request path first, then echoes data frames.
async fn echo_socket(ws: WebSocketUpgrade, uri: Uri) -> Response {
    let path = uri.path().to_string();
    ws.on_upgrade(move |socket| echo(socket, path))
}

async fn echo(mut socket: WebSocket, path: String) {
    if socket.send(Message::Text(path.into())).await.is_err() {
        return;
    }
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

pub async fn start_fake_app() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, fake_app()).await.ok();
    });
    port
}

/// A gateway in front of a fake app, with a fake bridge behind it.
pub struct TestGateway {
    pub port: u16,
    pub session: SharedSession,
    pub launcher: Arc<FakeBridgeLauncher>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
    }
}

pub async fn start_gateway(config: Config) -> TestGateway {
    start_gateway_with(config, FakeBridgeLauncher::new()).await
}

pub async fn start_gateway_with(config: Config, launcher: FakeBridgeLauncher) -> TestGateway {
    let app_port = start_fake_app().await;
    let upstream = Url::parse(&format!("http://127.0.0.1:{}", app_port)).unwrap();
    start_gateway_to(config, launcher, upstream).await
}

pub async fn start_gateway_to(
    config: Config,
    launcher: FakeBridgeLauncher,
    upstream: Url,
) -> TestGateway {
    let launcher = Arc::new(launcher);
    let session = test_session(config, launcher.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server_session = session.clone();
    tokio::spawn(async move {
        serve_session(server_session, upstream, listener, async {
            shutdown_rx.await.ok();
        })
        .await
        .unwrap();
    });

    TestGateway {
        port,
        session,
        launcher,
        shutdown: Some(shutdown_tx),
    }
}

/// Mounts `attach` on a host router served as is, without the gateway
/// fallback in front of it.
#[allow(dead_code)]
pub async fn start_embedded(config: Config, app: Router) -> TestGateway {
    let launcher = Arc::new(FakeBridgeLauncher::new());
    let session = test_session(config, launcher.clone());
    let router = attach(app, session.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .unwrap();
    });

    TestGateway {
        port,
        session,
        launcher,
        shutdown: Some(shutdown_tx),
    }
}

fn test_session(config: Config, launcher: Arc<FakeBridgeLauncher>) -> SharedSession {
    let session = Arc::new(
        Session::new(
            config,
            Namespace::from_dir(Path::new("/tmp/dingtalk-test-app")),
            launcher,
        )
        .unwrap(),
    );
    session.set_target_url(Url::parse("http://localhost:5173/?ddtab=true").unwrap());
    session
}

#[allow(dead_code)]
pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
