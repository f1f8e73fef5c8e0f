use axum::{Json, extract::State};
use serde_json::Value;
use ward_core::event_types::NEW_DOC_REQUEST;

use super::{admission_id, into_object, notify_admission, now_rfc3339};
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::server::AppState;

const DOCUMENT_REQUESTS: &str = "document_requests";

/// `POST /api/v1/documents/requests`. Only the station is told; the guardian filed it.
pub async fn request_document(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Json<Value>, ApiError> {
    let body = into_object(body)?;
    let admission = admission_id(&body)?;
    let row = Value::Object(body);

    let stored = state
        .storage_call("insert document request", || {
            state.storage.insert(DOCUMENT_REQUESTS, &row)
        })
        .await?;

    let mut data = serde_json::Map::new();
    data.insert(
        "request_items".into(),
        stored.get("request_items").cloned().unwrap_or(Value::Null),
    );
    data.insert(
        "created_at".into(),
        stored
            .get("created_at")
            .cloned()
            .unwrap_or_else(|| Value::String(now_rfc3339())),
    );
    notify_admission(&state, NEW_DOC_REQUEST, admission, data, true);

    Ok(Json(stored))
}
