use axum::{Json, extract::State};
use serde_json::{Map, Value, json};
use ward_core::event_types::{DELETE_EXAM_SCHEDULE, NEW_EXAM_SCHEDULE};

use super::{admission_id, into_object, notify_admission};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};
use crate::server::AppState;
use crate::storage::Filter;

const EXAM_SCHEDULES: &str = "exam_schedules";

/// `POST /api/v1/exam-schedules`
pub async fn create_exam_schedule(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Json<Value>, ApiError> {
    let body = into_object(body)?;
    let admission = admission_id(&body)?;
    let row = Value::Object(body);

    let stored = state
        .storage_call("insert exam schedule", || {
            state.storage.insert(EXAM_SCHEDULES, &row)
        })
        .await?;

    let data = into_object(stored.clone())?;
    notify_admission(&state, NEW_EXAM_SCHEDULE, admission, data, false);

    Ok(Json(stored))
}

/// `DELETE /api/v1/exam-schedules/{id}`
///
/// The row is read first so the removal can be routed to its admission.
pub async fn delete_exam_schedule(
    State(state): State<AppState>,
    ApiPath(schedule_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let filters = [Filter::eq("id", schedule_id)];
    let target = state
        .storage_call("load exam schedule", || {
            state.storage.select_one(EXAM_SCHEDULES, "*", &filters)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Schedule not found".into()))?;
    let target = into_object(target)?;
    let admission = admission_id(&target)?;

    state
        .storage_call("delete exam schedule", || {
            state.storage.delete(EXAM_SCHEDULES, &filters)
        })
        .await?;
    tracing::info!(schedule_id, "exam schedule deleted");

    let mut data = Map::new();
    data.insert("id".into(), json!(schedule_id));
    data.insert(
        "admission_id".into(),
        target.get("admission_id").cloned().unwrap_or(Value::Null),
    );
    notify_admission(&state, DELETE_EXAM_SCHEDULE, admission, data, false);

    Ok(Json(json!({ "message": "Deleted successfully" })))
}
