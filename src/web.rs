//! Axum-based local HTTP API

use crate::client::Elios4YouClient;
use crate::config::Config;
use crate::coordinator::PollCoordinator;
use crate::diagnostics::build_diagnostics;
use crate::entities::{device_info, render_relay, render_sensors};
use crate::protocol::RelayState;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: Arc<Elios4YouClient>,
    pub coordinator: Arc<PollCoordinator>,
}

#[derive(Deserialize)]
pub struct RelayBody {
    pub state: String,
}

pub(crate) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(crate) async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.coordinator.snapshot();
    let coordinator = state.coordinator.status();
    Json(serde_json::json!({
        "device": device_info(state.client.name(), &snapshot),
        "data": &*snapshot,
        "coordinator": coordinator,
    }))
}

pub(crate) async fn sensors(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.coordinator.snapshot();
    Json(serde_json::json!({
        "sensors": render_sensors(&snapshot),
        "relay": render_relay(&snapshot),
    }))
}

pub(crate) async fn set_relay(
    State(state): State<AppState>,
    Json(body): Json<RelayBody>,
) -> impl IntoResponse {
    if body.state.parse::<RelayState>().is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": format!("Invalid relay state '{}'", body.state)})),
        );
    }
    let ok = state.client.set_relay(&body.state).await;
    let relay_state = state.client.data().relay_state;
    (
        StatusCode::OK,
        Json(serde_json::json!({"ok": ok, "relay_state": relay_state})),
    )
}

pub(crate) async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.refresh().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "ok": false,
                "error": e.to_string(),
                "kind": e.kind(),
            })),
        ),
    }
}

pub(crate) async fn diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.coordinator.snapshot();
    match build_diagnostics(&state.config, &snapshot, &state.coordinator.status()) {
        Ok(doc) => (StatusCode::OK, Json(doc)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/sensors", get(sensors))
        .route("/api/relay", post(set_relay))
        .route("/api/refresh", post(refresh))
        .route("/api/diagnostics", get(diagnostics))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until `shutdown` flips to true
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let router = build_router(state);

    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={}, port={}",
        host, port
    ));

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{}",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    logger.info("Web server stopped");
    Ok(())
}
