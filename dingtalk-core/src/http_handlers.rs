//! Route handlers and response middleware mounted next to the bridge proxy.

use crate::deeplink::deep_link;
use crate::host::InjectionStrategy;
use crate::inject::{client_module_code, inject_html, inject_module};
use crate::picker::{
    devtools_url, render_failed_item, render_list_document, render_picker_page,
    render_target_items, session_token, TargetList,
};
use crate::proxy::{error_response, ProxiedRequest};
use crate::session::{Session, SharedSession};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use tracing::{debug, error};

/// Serves the bootstrap module, starting the bridge if needed.
pub async fn client_asset(State(session): State<SharedSession>) -> Response {
    if let Err(e) = session.bridge.ensure_started().await {
        error!("Failed to start chii: {}", e);
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to start chii: {}", e),
        );
    }

    let code = client_module_code(&session.routes.proxy_prefix, session.config.chii.embedded);
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        code,
    )
        .into_response()
}

pub async fn picker_page(State(session): State<SharedSession>) -> Response {
    let Some(port) = session.bridge.port() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Server not started");
    };

    Html(render_picker_page(
        port,
        &session.routes.proxy_prefix,
        &session.routes.devtools_list,
    ))
    .into_response()
}

/// Server-rendered target list for clients without JavaScript.
pub async fn picker_list(State(session): State<SharedSession>) -> Response {
    let Some(port) = session.bridge.port() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Server not started");
    };

    let items = match fetch_targets(&session, port).await {
        Ok(list) => render_target_items(&list.targets, port),
        Err(e) => {
            debug!("Failed to fetch debug targets: {}", e);
            render_failed_item()
        }
    };

    Html(render_list_document(&items, &session.routes.devtools_picker)).into_response()
}

/// Legacy `/__chrome_devtools`: jumps straight to the first target's devtools.
pub async fn open_first_target(State(session): State<SharedSession>) -> Response {
    let Some(port) = session.bridge.port() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Server not started");
    };

    match fetch_targets(&session, port).await {
        Ok(list) => match list.targets.first() {
            Some(target) => found(&devtools_url(port, &target.id, &session_token())),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Err(e) => {
            debug!("Failed to fetch debug targets: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

async fn fetch_targets(session: &Session, port: u16) -> Result<TargetList, reqwest::Error> {
    session
        .client()
        .get(format!("http://localhost:{}/targets", port))
        .send()
        .await?
        .error_for_status()?
        .json::<TargetList>()
        .await
}

pub async fn open_dingtalk(State(session): State<SharedSession>) -> Response {
    let Some(target) = session.target_url() else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "DingTalk target URL is not configured",
        );
    };

    debug!("Opening {} in DingTalk", target);
    found(&deep_link(target))
}

fn found(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Adds the bootstrap script to pages (or to the entry module) served by the app.
pub async fn inject_client(
    State(session): State<SharedSession>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::GET || req.extensions().get::<ProxiedRequest>().is_some() {
        return next.run(req).await;
    }
    let path = req.uri().path().to_string();
    let response = next.run(req).await;

    if !is_injectable(&response) {
        return response;
    }

    let strategy = session.config.host.injection_strategy();
    let wanted = match strategy {
        InjectionStrategy::Html => has_content_type(response.headers(), "text/html"),
        InjectionStrategy::ModuleGraph => {
            has_content_type(response.headers(), "javascript")
                && session.module_entry.claim(&path)
        }
    };
    if !wanted {
        return response;
    }

    if let Err(e) = session.bridge.ensure_started().await {
        error!("Failed to start chii: {}", e);
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Failed to read response body for {}: {}", path, e);
            return error_response(StatusCode::BAD_GATEWAY, "Failed to read response body");
        }
    };

    let client = session.routes.client_asset.as_str();
    let patched = match std::str::from_utf8(&bytes) {
        Ok(text) => match strategy {
            InjectionStrategy::Html => inject_html(text, client),
            InjectionStrategy::ModuleGraph => inject_module(text, client),
        },
        Err(_) => None,
    };

    match patched {
        Some(patched) => {
            debug!("Injected chii client into {}", path);
            parts.headers.remove(header::CONTENT_LENGTH);
            parts.headers.remove(header::ETAG);
            Response::from_parts(parts, Body::from(patched))
        }
        None => Response::from_parts(parts, Body::from(bytes)),
    }
}

fn is_injectable(response: &Response) -> bool {
    response.status().is_success()
        && response.extensions().get::<ProxiedRequest>().is_none()
        && !response.headers().contains_key(header::CONTENT_ENCODING)
}

fn has_content_type(headers: &HeaderMap, needle: &str) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains(needle))
        .unwrap_or(false)
}

/// Echoes allow-listed request cookies back as script-readable cookies.
pub async fn relay_debug_cookies(
    State(session): State<SharedSession>,
    req: Request,
    next: Next,
) -> Response {
    let relayed = debug_cookies(req.headers(), &session.config.debug_cookies);
    let mut response = next.run(req).await;

    for (name, value) in relayed {
        match HeaderValue::from_str(&format!("{}={}", name, value)) {
            Ok(cookie) => {
                response.headers_mut().append(header::SET_COOKIE, cookie);
            }
            Err(_) => debug!("Skipping cookie {} with invalid value", name),
        }
    }
    response
}

/// Allow-listed cookies with a non-empty value, in request order.
pub fn debug_cookies(headers: &HeaderMap, allowed: &[String]) -> Vec<(String, String)> {
    if allowed.is_empty() {
        return Vec::new();
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.trim(), value.trim().trim_matches('"')))
        .filter(|(name, value)| !value.is_empty() && allowed.iter().any(|a| a == name))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
