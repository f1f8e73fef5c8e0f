use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use ward_core::event_types::{ADMISSION_DISCHARGED, ADMISSION_TRANSFERRED};
use ward_core::{Envelope, Notification};

use super::{ACTIVE_STATUSES, ADMISSIONS, STATUS_DISCHARGED, notify_admission, now_rfc3339};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};
use crate::server::AppState;
use crate::storage::{Filter, StorageError};

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub target_room: String,
}

/// `POST /api/v1/admissions/{id}/discharge`
pub async fn discharge_patient(
    State(state): State<AppState>,
    ApiPath(admission_id): ApiPath<String>,
) -> Result<Json<Value>, ApiError> {
    let filters = [Filter::eq("id", &admission_id)];
    let patch = json!({
        "status": STATUS_DISCHARGED,
        "discharged_at": now_rfc3339(),
    });

    state
        .storage_call("discharge admission", || {
            state.storage.update(ADMISSIONS, &patch, &filters)
        })
        .await?;
    tracing::info!(admission_id = %admission_id, "admission discharged");

    let mut data = Map::new();
    data.insert("admission_id".into(), Value::String(admission_id.clone()));
    notify_admission(&state, ADMISSION_DISCHARGED, admission_id, data, false);

    Ok(Json(json!({ "message": "Discharged successfully" })))
}

/// `POST /api/v1/admissions/{id}/transfer`
///
/// Refused with 400 while another active admission holds the target room.
pub async fn transfer_patient(
    State(state): State<AppState>,
    ApiPath(admission_id): ApiPath<String>,
    ApiJson(req): ApiJson<TransferRequest>,
) -> Result<Json<Value>, ApiError> {
    let occupancy = [
        Filter::eq("room_number", &req.target_room),
        Filter::one_of("status", ACTIVE_STATUSES),
    ];
    let occupants = state
        .storage_call("check room occupancy", || {
            state.storage.select(ADMISSIONS, "id", &occupancy)
        })
        .await?;
    if !occupants.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Room {} is currently occupied.",
            req.target_room
        )));
    }

    let by_id = [Filter::eq("id", &admission_id)];
    let current = state
        .storage_call("load admission", || {
            state
                .storage
                .select_one(ADMISSIONS, "room_number,access_token", &by_id)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Admission not found".into()))?;
    let old_room = current.get("room_number").cloned().unwrap_or(Value::Null);
    let token = current
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::to_string);

    let patch = json!({ "room_number": req.target_room });
    state
        .storage_call("transfer admission", || {
            state.storage.update(ADMISSIONS, &patch, &by_id)
        })
        .await?;
    tracing::info!(admission_id = %admission_id, new_room = %req.target_room, "admission transferred");

    // Token and old room are already known, so nothing is left to resolve.
    let envelope = Envelope::new(
        ADMISSION_TRANSFERRED,
        json!({
            "admission_id": admission_id,
            "old_room": old_room,
            "new_room": req.target_room,
        }),
    );
    state.composer.dispatch(ADMISSION_TRANSFERRED, async move {
        Ok::<_, StorageError>(Some(Notification::with_patient(envelope, token)))
    });

    Ok(Json(json!({ "message": "Transferred successfully" })))
}
