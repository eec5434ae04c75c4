//! Admin endpoints exposing the whiteboard runtime view.
//!
//! # Routes
//! - `GET /admin/status`: version, uptime and table sizes
//! - `GET /admin/runtime`: full runtime DTO
//! - `GET /admin/failures`: failed registrations only

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::http::server::AppState;
use crate::registry::{FailureDto, RuntimeDto};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub contexts: usize,
    pub routes: usize,
    pub aliases: usize,
    pub failures: usize,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/runtime", get(get_runtime))
        .route("/admin/failures", get(get_failures))
        .route_layer(middleware::from_fn_with_state(state, admin_auth))
}

/// Require `Authorization: Bearer <key>` when an admin key is configured.
async fn admin_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(key) = state.admin_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == key);

    if authorized {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("Rejected unauthenticated admin request");
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let runtime = state.whiteboard.runtime();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        contexts: runtime.contexts.len(),
        routes: state.whiteboard.servlets().snapshot().route_count(),
        aliases: runtime.aliases.len(),
        failures: runtime.failures.len(),
    })
}

async fn get_runtime(State(state): State<AppState>) -> Json<RuntimeDto> {
    Json(state.whiteboard.runtime())
}

async fn get_failures(State(state): State<AppState>) -> Json<Vec<FailureDto>> {
    Json(state.whiteboard.runtime().failures)
}
