//! Message envelope pushed to dashboard sockets.

use std::io;

use serde::{Deserialize, Serialize, ser::Error as _};
use serde_json::Value;
use serde_json::ser::{Formatter, Serializer};

use crate::error::DeliveryError;

/// Event tags understood by the station and guardian dashboards.
pub mod event_types {
    pub const NEW_VITAL: &str = "NEW_VITAL";
    pub const NEW_IV: &str = "NEW_IV";
    pub const NEW_MEAL_REQUEST: &str = "NEW_MEAL_REQUEST";
    pub const NEW_DOC_REQUEST: &str = "NEW_DOC_REQUEST";
    pub const NEW_EXAM_SCHEDULE: &str = "NEW_EXAM_SCHEDULE";
    pub const DELETE_EXAM_SCHEDULE: &str = "DELETE_EXAM_SCHEDULE";
    pub const ADMISSION_TRANSFERRED: &str = "ADMISSION_TRANSFERRED";
    pub const ADMISSION_DISCHARGED: &str = "ADMISSION_DISCHARGED";
}

/// A `{type, data}` message. `data` is opaque to the real-time layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Render the wire text: exactly `type` then `data`, with `", "` and `": "` separators.
    pub fn to_text(&self) -> Result<String, DeliveryError> {
        let mut ser = Serializer::with_formatter(Vec::with_capacity(128), SpacedFormatter);
        self.serialize(&mut ser)?;
        String::from_utf8(ser.into_inner())
            .map_err(|e| DeliveryError::Encode(serde_json::Error::custom(e)))
    }
}

/// Compact JSON with a space after every `,` and `:`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
