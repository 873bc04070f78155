//! Public HTTP surface
//!
//! `GET /ts` upgrades to the setup socket and hands it to the session
//! orchestrator. Every other path serves the built frontend, or in dev mode
//! is proxied to the frontend dev server.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HOST, ORIGIN};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tt_core::ServerConfig;

use crate::session::origin::{origin_is_https, same_origin};
use crate::session::SessionOrchestrator;
use crate::ws::frame;
use crate::ws::SyncedConnection;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Runs one session per setup socket
    pub orchestrator: Arc<SessionOrchestrator>,
    /// Client for the dev server proxy
    pub http: reqwest::Client,
}

impl AppState {
    /// Create handler state
    pub fn new(config: Arc<ServerConfig>, orchestrator: Arc<SessionOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
            http: reqwest::Client::new(),
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    let router = Router::new().route("/ts", get(setup_socket));

    let router = if state.config.dev {
        router.fallback(dev_proxy)
    } else {
        router.fallback_service(ServeDir::new(&state.config.web_dir))
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn setup_socket(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let host = header_str(&headers, HOST);
    let origin = header_str(&headers, ORIGIN);

    if !state.config.dev && !same_origin(host, origin) {
        tracing::warn!("Rejected setup socket: host {:?}, origin {:?}", host, origin);
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let secure = origin_is_https(origin);
    let orchestrator = Arc::clone(&state.orchestrator);

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = frame::from_axum(socket);
        orchestrator.run(SyncedConnection::new(sink, stream), secure).await;
    })
}

/// Forward a request to the dev server
async fn dev_proxy(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = format!("{}{}", state.config.dev_url.trim_end_matches('/'), path);
    tracing::debug!("Proxying {} to {}", path, url);

    match fetch(&state.http, &url).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Dev proxy request to {} failed: {}", url, e);
            (
                StatusCode::BAD_GATEWAY,
                [(CONTENT_TYPE, "text/plain")],
                format!("Error: {}", e),
            )
                .into_response()
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<Response, reqwest::Error> {
    let upstream = client.get(url).send().await?;
    let status = upstream.status();
    let content_type = upstream.headers().get(CONTENT_TYPE).cloned();
    let body = upstream.bytes().await?;

    let mut response = (status, body).into_response();
    if let Some(content_type) = content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    Ok(response)
}

fn header_str(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
