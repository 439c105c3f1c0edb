//! Console server bootstrap and router wiring.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::session_coordinator::SessionCoordinator;
use crate::websocket::run_console_ws_connection;

pub const CONSOLE_INDEX_ENDPOINT: &str = "/";
pub const CONSOLE_STATIC_ENDPOINT: &str = "/static/{*path}";
pub const CONSOLE_WS_ENDPOINT: &str = "/ws/commands";
pub const DEFAULT_CONSOLE_BIND: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleServerConfig {
    pub bind: String,
    /// Directory holding `index.html` and the assets served under `/static`.
    pub static_dir: PathBuf,
}

pub struct ConsoleServerState {
    pub(crate) coordinator: SessionCoordinator,
    static_dir: PathBuf,
}

impl ConsoleServerState {
    pub fn new(coordinator: SessionCoordinator, static_dir: PathBuf) -> Self {
        Self {
            coordinator,
            static_dir,
        }
    }
}

/// Binds `config.bind` and serves until Ctrl-C.
pub async fn run_console_server(config: ConsoleServerConfig, coordinator: SessionCoordinator) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;
    if !config.static_dir.is_dir() {
        tracing::warn!(
            static_dir = %config.static_dir.display(),
            "static directory does not exist; index and assets will return 404"
        );
    }

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind console server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound console server address")?;
    tracing::info!(
        addr = %local_addr,
        endpoint = CONSOLE_WS_ENDPOINT,
        static_dir = %config.static_dir.display(),
        "console server listening"
    );

    let state = Arc::new(ConsoleServerState::new(coordinator, config.static_dir));
    let app = build_console_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("console server exited unexpectedly")?;
    Ok(())
}

pub fn build_console_router(state: Arc<ConsoleServerState>) -> Router {
    Router::new()
        .route(CONSOLE_INDEX_ENDPOINT, get(handle_console_index))
        .route(CONSOLE_STATIC_ENDPOINT, get(handle_console_static))
        .route(CONSOLE_WS_ENDPOINT, get(handle_console_ws_upgrade))
        .with_state(state)
}

async fn handle_console_ws_upgrade(
    State(state): State<Arc<ConsoleServerState>>,
    websocket: WebSocketUpgrade,
) -> Response {
    websocket
        .on_upgrade(move |socket| run_console_ws_connection(state, socket))
        .into_response()
}

async fn handle_console_index(State(state): State<Arc<ConsoleServerState>>) -> Response {
    let path = state.static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page).into_response(),
        Err(error) => {
            tracing::debug!(path = %path.display(), %error, "index page unavailable");
            (StatusCode::NOT_FOUND, "index.html not found").into_response()
        }
    }
}

async fn handle_console_static(
    State(state): State<Arc<ConsoleServerState>>,
    UrlPath(requested): UrlPath<String>,
) -> Response {
    let Some(path) = resolve_static_path(&state.static_dir, &requested) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type_for(&path))], bytes).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

/// Joins `requested` under `root`, refusing anything but plain path segments.
pub(crate) fn resolve_static_path(root: &Path, requested: &str) -> Option<PathBuf> {
    let relative = Path::new(requested.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    let mut segments = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                resolved.push(segment);
                segments += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (segments > 0).then_some(resolved)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
