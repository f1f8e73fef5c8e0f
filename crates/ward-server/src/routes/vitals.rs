use axum::{Json, extract::State};
use serde_json::Value;
use ward_core::event_types::NEW_VITAL;

use super::{admission_id, into_object, notify_admission};
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::server::AppState;

const VITAL_SIGNS: &str = "vital_signs";

/// `POST /api/v1/vitals`
pub async fn record_vital(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Json<Value>, ApiError> {
    let body = into_object(body)?;
    let admission = admission_id(&body)?;
    let row = Value::Object(body);

    let stored = state
        .storage_call("insert vital", || state.storage.insert(VITAL_SIGNS, &row))
        .await?;

    let data = into_object(stored.clone())?;
    notify_admission(&state, NEW_VITAL, admission, data, false);

    Ok(Json(stored))
}
