use axum::{Json, extract::State};
use serde_json::Value;
use ward_core::event_types::NEW_IV;

use super::{admission_id, into_object, notify_admission, now_rfc3339, pick};
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::server::AppState;

const IV_RECORDS: &str = "iv_records";

/// `POST /api/v1/iv-records`
///
/// Stamps `created_at` when the client did not; the notification carries the rate, photo
/// and timestamp the IV card renders.
pub async fn record_iv(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Json<Value>, ApiError> {
    let mut body = into_object(body)?;
    let admission = admission_id(&body)?;
    body.entry("created_at")
        .or_insert_with(|| Value::String(now_rfc3339()));
    let row = Value::Object(body);

    let stored = state
        .storage_call("insert iv record", || state.storage.insert(IV_RECORDS, &row))
        .await?;

    let mut data = pick(&stored, &["id", "infusion_rate", "photo_url", "created_at"]);
    data.insert("admission_id".into(), Value::String(admission.clone()));
    notify_admission(&state, NEW_IV, admission, data, false);

    Ok(Json(stored))
}
