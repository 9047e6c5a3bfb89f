// Operational HTTP surface: start/join runs, read run metrics, health.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use patchwork_engine::{Coordinator, StartRunError};

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/runs", post(start_run))
        .route("/runs/{id}", get(run_report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct StartRunRequest {
    patch_handle: String,
}

async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRunRequest>,
) -> impl IntoResponse {
    match state.coordinator.clone().start_run(&request.patch_handle).await {
        Ok(ticket) => (
            if ticket.already_running {
                StatusCode::OK
            } else {
                StatusCode::ACCEPTED
            },
            Json(serde_json::json!({
                "run_id": ticket.run_id,
                "already_running": ticket.already_running,
            })),
        ),
        Err(StartRunError::PatchNotFound(handle)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("patch not found: {handle}")})),
        ),
        Err(StartRunError::Store(e)) => {
            error!(error = %e, "Failed to start run");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
        }
    }
}

async fn run_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.coordinator.run_report(id).await {
        Ok(Some(report)) => (StatusCode::OK, Json(serde_json::json!(report))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "run not found"})),
        ),
        Err(e) => {
            error!(error = %e, "Failed to load run");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
        }
    }
}
