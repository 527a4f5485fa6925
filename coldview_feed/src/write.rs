//! Property writes and alarm acknowledgement.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use coldview::types::{EditRequest, EntityId, WriteConfirmation, WriteResponse};
use coldview::writer::CSRF_HEADER;

use crate::plant::WriteRejection;
use crate::state::AppState;

fn check_csrf(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.csrf_token.as_deref() else {
        return Ok(());
    };
    match headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()) {
        Some(t) if t == expected => Ok(()),
        _ => Err((StatusCode::FORBIDDEN, "CSRF verification failed").into_response()),
    }
}

fn rejection_status(r: &WriteRejection) -> StatusCode {
    match r {
        WriteRejection::UnknownRoom(_) => StatusCode::NOT_FOUND,
        WriteRejection::NotWritable(_) | WriteRejection::WrongType { .. } => StatusCode::BAD_REQUEST,
    }
}

async fn republish(state: &AppState) {
    if let Err(e) = state.publish().await {
        warn!(error = %e, "failed to serialize snapshot");
    }
}

pub async fn write_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EditRequest>,
) -> Response {
    if let Err(resp) = check_csrf(&state, &headers) {
        return resp;
    }
    let result = state.plant.lock().await.write(&req);
    match result {
        Ok(value) => {
            let data = WriteConfirmation {
                cold_room: req.cold_room,
                property: req.property,
                value,
                result: Some(json!(true)),
            };
            info!("write {data}");
            // clients see the new value without waiting for the next tick
            republish(&state).await;
            Json(WriteResponse { data }).into_response()
        }
        Err(rejection) => {
            warn!(cold_room = req.cold_room, property = %req.property, "write rejected: {rejection}");
            (rejection_status(&rejection), rejection.to_string()).into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AckRequest {
    #[serde(default)]
    pub cold_room: Option<EntityId>,
}

pub async fn acknowledge_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AckRequest>,
) -> Response {
    if let Err(resp) = check_csrf(&state, &headers) {
        return resp;
    }
    let acknowledged = state.plant.lock().await.acknowledge(req.cold_room, Utc::now());
    info!(cold_room = ?req.cold_room, acknowledged, "alarms acknowledged");
    if acknowledged > 0 {
        republish(&state).await;
    }
    Json(json!({ "data": { "cold_room": req.cold_room, "acknowledged": acknowledged } })).into_response()
}
