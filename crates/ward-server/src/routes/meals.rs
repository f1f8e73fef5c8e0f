use axum::{Json, extract::State};
use serde_json::{Map, Value};
use ward_core::event_types::NEW_MEAL_REQUEST;

use super::{admission_id, into_object, notify_admission, pick};
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::server::AppState;
use crate::storage::{Filter, StorageError};

const MEAL_REQUESTS: &str = "meal_requests";
const MEAL_SLOT: &str = "admission_id,meal_date,meal_time";
/// Request type used when the station edits a meal directly.
const STATION_UPDATE: &str = "STATION_UPDATE";
const REQUESTED_COLUMNS: [&str; 2] = [
    "requested_pediatric_meal_type",
    "requested_guardian_meal_type",
];

/// `POST /api/v1/meals/requests`
///
/// One row per admission, date and meal time. Station updates are approved immediately;
/// guardian requests keep the current plan and park the ask in the `requested_*` columns
/// until the station approves it.
pub async fn upsert_meal_request(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Json<Value>, ApiError> {
    let body = into_object(body)?;
    let admission = admission_id(&body)?;
    let meal_date = required_str(&body, "meal_date")?;
    let meal_time = required_str(&body, "meal_time")?;

    let filters = [
        Filter::eq("admission_id", &admission),
        Filter::eq("meal_date", &meal_date),
        Filter::eq("meal_time", &meal_time),
    ];
    let current = state
        .storage_call("load meal request", || {
            state.storage.select_one(MEAL_REQUESTS, "*", &filters)
        })
        .await?;

    let mut row = merge_request(body, current.as_ref());
    let stored = match upsert(&state, &row).await {
        Err(StorageError::Status { code: Some(code), .. }) if code == "PGRST204" => {
            // Older schemas lack the requested_* columns.
            tracing::warn!("meal_requests schema lacks requested columns, retrying without them");
            for column in REQUESTED_COLUMNS {
                row.remove(column);
            }
            upsert(&state, &row).await?
        }
        other => other?,
    };

    let mut data = pick(
        &stored,
        &[
            "id",
            "admission_id",
            "request_type",
            "meal_date",
            "meal_time",
            "pediatric_meal_type",
            "guardian_meal_type",
            "requested_pediatric_meal_type",
            "requested_guardian_meal_type",
        ],
    );
    data.insert("admission_id".into(), Value::String(admission.clone()));
    notify_admission(&state, NEW_MEAL_REQUEST, admission, data, false);

    Ok(Json(stored))
}

async fn upsert(state: &AppState, row: &Map<String, Value>) -> Result<Value, StorageError> {
    let row = Value::Object(row.clone());
    state
        .retry
        .execute("upsert meal request", || {
            state.storage.upsert(MEAL_REQUESTS, &row, MEAL_SLOT)
        })
        .await
}

/// Build the row to store from the incoming request and the row already in that slot.
fn merge_request(mut body: Map<String, Value>, current: Option<&Value>) -> Map<String, Value> {
    let is_station = body.get("request_type").and_then(Value::as_str) == Some(STATION_UPDATE);

    if is_station {
        body.insert("status".into(), Value::String("APPROVED".into()));
        for column in REQUESTED_COLUMNS {
            body.insert(column.into(), Value::Null);
        }
        return body;
    }

    for (requested, planned) in [
        ("requested_pediatric_meal_type", "pediatric_meal_type"),
        ("requested_guardian_meal_type", "guardian_meal_type"),
    ] {
        let asked = body.get(planned).cloned().unwrap_or(Value::Null);
        let kept = current
            .and_then(|row| row.get(planned))
            .cloned()
            .unwrap_or(Value::Null);
        body.insert(requested.into(), asked);
        body.insert(planned.into(), kept);
    }
    body.insert("status".into(), Value::String("PENDING".into()));
    body
}

fn required_str(body: &Map<String, Value>, field: &str) -> Result<String, ApiError> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))
}
