use crate::config::Config;
use crate::deeplink::{build_target_url, infer_base_url};
use crate::error::ConfigError;
use crate::http_handlers::{
    client_asset, inject_client, open_dingtalk, open_first_target, picker_list, picker_page,
    relay_debug_cookies,
};
use crate::namespace::LEGACY_PICKER_PATH;
use crate::proxy::{error_response, forward_http, forward_websocket, is_websocket_upgrade, proxy_bridge};
use crate::session::{Session, SharedSession};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware,
    response::Response,
    routing::get,
    Router,
};
use reqwest::Client;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};
use url::Url;

/// The application dev server fronted by the gateway.
#[derive(Clone)]
struct AppUpstream {
    client: Client,
    http_origin: String,
    ws_origin: String,
}

impl AppUpstream {
    fn new(client: Client, upstream: &Url) -> Self {
        let http_origin = upstream.as_str().trim_end_matches('/').to_string();
        let ws_origin = match http_origin.strip_prefix("http") {
            Some(rest) => format!("ws{}", rest),
            None => http_origin.clone(),
        };
        Self {
            client,
            http_origin,
            ws_origin,
        }
    }
}

/// Mounts the DingTalk routes and middleware onto an existing router.
///
/// Apply this after the app's own routes and fallback are registered: the
/// injection layer only wraps what the router already contains.
pub fn attach(router: Router, session: SharedSession) -> Router {
    let config = &session.config;
    if !config.enable {
        return router;
    }

    let routes = &session.routes;
    let mut owned = Router::new().route(&routes.open_dingtalk, get(open_dingtalk));
    let mut router = router;

    if config.bridge_enabled() {
        router = router.layer(middleware::from_fn_with_state(
            session.clone(),
            inject_client,
        ));
        owned = owned
            .route(&routes.client_asset, get(client_asset))
            .route(&routes.devtools_picker, get(picker_page))
            .route(&routes.devtools_list, get(picker_list))
            .route(LEGACY_PICKER_PATH, get(open_first_target));
    }

    let mut router = router.merge(owned.with_state(session.clone()));

    if config.bridge_enabled() {
        router = router.layer(middleware::from_fn_with_state(
            session.clone(),
            proxy_bridge,
        ));
    }

    if !config.debug_cookies.is_empty() {
        router = router.layer(middleware::from_fn_with_state(
            session.clone(),
            relay_debug_cookies,
        ));
    }

    router
}

/// Standalone router: everything this crate does not own goes to `upstream`.
pub fn gateway_router(session: SharedSession, upstream: Url) -> Router {
    let app = AppUpstream::new(session.client().clone(), &upstream);
    let router = Router::new().fallback(forward_to_app).with_state(app);
    attach(router, session)
}

async fn forward_to_app(State(app): State<AppUpstream>, req: Request) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let result = if is_websocket_upgrade(req.headers()) {
        debug!("WS upgrade to app: {}", path_and_query);
        forward_websocket(req, format!("{}{}", app.ws_origin, path_and_query)).await
    } else {
        let target_url = format!("{}{}", app.http_origin, path_and_query);
        forward_http(&app.client, &target_url, req).await
    };

    result.unwrap_or_else(|e| {
        debug!("Upstream error for {}: {}", path_and_query, e);
        error_response(StatusCode::BAD_GATEWAY, &format!("Upstream error: {}", e))
    })
}

fn get_bind_addr(port: u16, allow_remote_access: bool) -> String {
    if allow_remote_access {
        format!("0.0.0.0:{}", port)
    } else {
        format!("127.0.0.1:{}", port)
    }
}

pub async fn bind_http_server(
    config: &Config,
) -> Result<TcpListener, Box<dyn std::error::Error + Send + Sync>> {
    let bind_addr = get_bind_addr(config.port, config.allow_remote_access);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("HTTP server bound to {}", bind_addr);
    Ok(listener)
}

pub async fn serve_http_server_with_shutdown(
    config: Config,
    listener: TcpListener,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let upstream = config.upstream_url()?;
    let cwd = env::current_dir()?;
    let local_addr = listener.local_addr()?;

    let session = Arc::new(Session::for_project(config, &cwd)?);
    let target = resolve_target_url(&session.config, local_addr)?;
    session.set_target_url(target);

    info!(
        "Serving {} for project {} (namespace {})",
        session.config.host,
        cwd.display(),
        session.routes.namespace
    );

    serve_session(session, upstream, listener, shutdown_signal).await
}

/// Page DingTalk opens: configured URL, or the gateway's own address.
fn resolve_target_url(config: &Config, local_addr: SocketAddr) -> Result<Url, ConfigError> {
    let base = match config.parsed_target_url()? {
        Some(url) => url,
        None => Url::parse(&infer_base_url(
            &local_addr.ip().to_string(),
            local_addr.port(),
            &config.normalized_base(),
        ))
        .map_err(|source| ConfigError::InvalidUrl {
            field: "base",
            source,
        })?,
    };
    Ok(build_target_url(base, config.corp_id.as_deref()))
}

/// Serves an already built session until `shutdown_signal` resolves, then
/// stops the bridge.
pub async fn serve_session(
    session: SharedSession,
    upstream: Url,
    listener: TcpListener,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let local_addr = listener.local_addr()?;
    let app = gateway_router(session.clone(), upstream.clone());

    print_banner(&session, local_addr, &upstream);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await;

    session.bridge.shutdown();
    result?;
    Ok(())
}

fn print_banner(session: &Session, local_addr: SocketAddr, upstream: &Url) {
    let host = match local_addr.ip().to_string().as_str() {
        "0.0.0.0" => "127.0.0.1".to_string(),
        other => other.to_string(),
    };
    let source = format!("{}:{}", host, local_addr.port());

    info!("Forwarding app requests to {}", upstream);
    if !session.config.enable {
        return;
    }
    info!(
        "Open in dingtalk: http://{}{}",
        source, session.routes.open_dingtalk
    );
    if session.config.bridge_enabled() {
        info!(
            "Click to open chrome devtools: http://{}{}",
            source, session.routes.devtools_picker
        );
    }
}
