//! Write API under `/api/v1`.
//!
//! Every handler persists through the retry executor, answers with the stored row, then hands
//! the composer a preparation future that looks up the admission's access token and room.

mod admissions;
mod documents;
mod exams;
mod iv_records;
mod meals;
mod vitals;

use axum::{
    Router,
    routing::{delete, post},
};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use ward_core::{Envelope, Notification};

use crate::error::ApiError;
use crate::server::AppState;
use crate::storage::{Filter, StorageError};

pub const ADMISSIONS: &str = "admissions";
pub const STATUS_DISCHARGED: &str = "DISCHARGED";
/// Statuses that occupy a room.
pub const ACTIVE_STATUSES: [&str; 2] = ["IN_PROGRESS", "OBSERVATION"];

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/vitals", post(vitals::record_vital))
        .route("/iv-records", post(iv_records::record_iv))
        .route("/meals/requests", post(meals::upsert_meal_request))
        .route("/documents/requests", post(documents::request_document))
        .route("/exam-schedules", post(exams::create_exam_schedule))
        .route("/exam-schedules/{id}", delete(exams::delete_exam_schedule))
        .route(
            "/admissions/{id}/discharge",
            post(admissions::discharge_patient),
        )
        .route(
            "/admissions/{id}/transfer",
            post(admissions::transfer_patient),
        )
}

/// Who to notify about an admission.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AdmissionRecipients {
    pub token: Option<String>,
    pub room: Value,
}

/// Look up an admission's access token and room through the retry executor.
pub(crate) async fn admission_recipients(
    state: &AppState,
    admission_id: &str,
) -> Result<Option<AdmissionRecipients>, StorageError> {
    let filters = [Filter::eq("id", admission_id)];
    let row = state
        .retry
        .execute("admission lookup", || {
            state
                .storage
                .select_one(ADMISSIONS, "access_token,room_number", &filters)
        })
        .await?;

    Ok(row.map(|row| AdmissionRecipients {
        token: row
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string),
        room: row.get("room_number").cloned().unwrap_or(Value::Null),
    }))
}

/// Notify the station, and the patient unless `station_only`, once the admission resolves.
///
/// `data` gets the admission's `room` added. Nothing is sent if the admission is gone.
pub(crate) fn notify_admission(
    state: &AppState,
    event_type: &'static str,
    admission_id: String,
    mut data: Map<String, Value>,
    station_only: bool,
) -> JoinHandle<()> {
    let prep_state = state.clone();
    state.composer.dispatch(event_type, async move {
        let Some(recipients) = admission_recipients(&prep_state, &admission_id).await? else {
            return Ok(None);
        };
        data.insert("room".into(), recipients.room);
        let envelope = Envelope::new(event_type, Value::Object(data));
        let notification = if station_only {
            Notification::station(envelope)
        } else {
            Notification::with_patient(envelope, recipients.token)
        };
        Ok::<_, StorageError>(Some(notification))
    })
}

/// Request body as a JSON object.
pub(crate) fn into_object(body: Value) -> Result<Map<String, Value>, ApiError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::BadRequest("request body must be a JSON object".into())),
    }
}

/// `admission_id` from a body or row, as the string used in filters.
pub(crate) fn admission_id(object: &Map<String, Value>) -> Result<String, ApiError> {
    match object.get("admission_id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(ApiError::BadRequest("admission_id is required".into())),
    }
}

/// Copy selected fields of a stored row into an envelope payload.
pub(crate) fn pick(row: &Value, fields: &[&str]) -> Map<String, Value> {
    fields
        .iter()
        .map(|f| ((*f).to_string(), row.get(*f).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// RFC 3339 timestamp for rows the API stamps itself.
pub(crate) fn now_rfc3339() -> String {
    use time::{OffsetDateTime, format_description::well_known::Rfc3339};
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
