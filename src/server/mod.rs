//! HTTP surface: the streaming chat endpoint plus the JSON endpoints for
//! vehicle lookups and session mutations.

mod chat;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::llm::CompletionProvider;
use crate::session::SessionStore;
use crate::types::{Stage, Task};
use crate::vehicle;

pub struct AppState {
    pub provider: Arc<dyn CompletionProvider>,
    pub sessions: SessionStore,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/chat-with-tools", post(chat::chat_with_tools))
        .route("/api/vehicle/:vin", get(vehicle_by_vin))
        .route("/api/vehicle/plate/:plate_number", get(vehicle_by_plate))
        .route("/api/session/:session_id", get(get_session))
        .route("/api/session/:session_id/stage", post(set_stage))
        .route("/api/session/:session_id/tasks", post(set_tasks))
        .route(
            "/api/session/:session_id/confirm-faults",
            post(confirm_faults),
        )
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn not_found(error: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": error })),
    )
        .into_response()
}

async fn vehicle_by_vin(Path(vin): Path<String>) -> Json<serde_json::Value> {
    let vehicle = vehicle::by_vin(&vin);
    Json(json!({ "success": true, "data": vehicle }))
}

async fn vehicle_by_plate(Path(plate_number): Path<String>) -> Json<serde_json::Value> {
    let vehicle = vehicle::by_plate(&plate_number);
    Json(json!({ "success": true, "data": vehicle }))
}

async fn get_session(State(state): State<SharedState>, Path(session_id): Path<String>) -> Response {
    match state.sessions.get(&session_id) {
        Some(session) => Json(json!({ "success": true, "data": session })).into_response(),
        None => not_found("会话不存在"),
    }
}

#[derive(Deserialize)]
struct StageBody {
    stage: Stage,
}

async fn set_stage(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(body): Json<StageBody>,
) -> Response {
    if !state.sessions.set_stage(&session_id, body.stage) {
        return not_found("会话不存在");
    }
    Json(json!({ "success": true, "message": "阶段已更新", "stage": body.stage })).into_response()
}

#[derive(Deserialize)]
struct TasksBody {
    tasks: Vec<Task>,
}

async fn set_tasks(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(body): Json<TasksBody>,
) -> Response {
    if !state.sessions.set_tasks(&session_id, body.tasks.clone()) {
        return not_found("会话不存在");
    }
    Json(json!({ "success": true, "message": "任务已更新", "tasks": body.tasks })).into_response()
}

#[derive(Deserialize)]
struct FaultsBody {
    faults: Vec<String>,
}

async fn confirm_faults(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(body): Json<FaultsBody>,
) -> Response {
    if state.sessions.get(&session_id).is_none() {
        return not_found("会话不存在");
    }
    for fault in &body.faults {
        state.sessions.add_confirmed_fault(&session_id, fault.clone());
    }
    Json(json!({ "success": true, "message": "故障已确认", "faults": body.faults })).into_response()
}
