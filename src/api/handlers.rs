use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiError;
use crate::relay::DatagramRecord;
use crate::supervisor::{StartOutcome, StopOutcome, WorkerId, WorkerStatus};

/// Body of `POST /api/scripts`. Also accepts the field names the original
/// dashboard sends (`scriptName`, `scriptPath`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlWorkerRequest {
    pub action: String,
    #[serde(alias = "scriptName")]
    pub id: String,
    #[serde(default, alias = "scriptPath")]
    pub executable_path: Option<String>,
}

/// Body of `POST /api/udp`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendDatagramRequest {
    pub message: String,
    #[serde(alias = "targetIP")]
    pub target_host: String,
    pub target_port: i64,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn list_worker_statuses(
    State(state): State<AppState>,
) -> Json<BTreeMap<WorkerId, WorkerStatus>> {
    Json(state.supervisor.status_all())
}

pub async fn get_worker_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkerStatus>, ApiError> {
    state
        .supervisor
        .status(&id)
        .map(Json)
        .ok_or(ApiError::WorkerNotFound(id))
}

pub async fn control_worker(
    State(state): State<AppState>,
    Json(request): Json<ControlWorkerRequest>,
) -> Result<Json<Value>, ApiError> {
    let id = request.id;
    let message = match request.action.as_str() {
        "start" => {
            let path = request
                .executable_path
                .ok_or_else(|| ApiError::BadRequest("executablePath is required for start".into()))?;
            match state.supervisor.start(&id, &path)? {
                StartOutcome::Started { .. } => format!("Started {id}"),
                StartOutcome::AlreadyRunning => format!("{id} is already running"),
            }
        }
        "stop" => match state.supervisor.stop(&id)? {
            StopOutcome::Stopped => format!("Stopped {id}"),
            StopOutcome::NotRunning => format!("{id} is not running"),
        },
        other => return Err(ApiError::BadRequest(format!("Invalid action `{other}`"))),
    };

    Ok(Json(json!({ "message": message })))
}

pub async fn list_datagrams(State(state): State<AppState>) -> Json<Vec<DatagramRecord>> {
    Json(state.relay.list_messages())
}

pub async fn send_datagram(
    State(state): State<AppState>,
    Json(request): Json<SendDatagramRequest>,
) -> Result<Json<Value>, ApiError> {
    let addr = state
        .relay
        .send(&request.message, &request.target_host, request.target_port)
        .await?;
    Ok(Json(json!({ "message": format!("Sent UDP packet to {addr}") })))
}
