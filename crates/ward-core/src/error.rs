//! Delivery error types for the real-time layer.

/// Errors a [`Connection`](crate::realtime::Connection) reports when it cannot accept a payload.
///
/// These never leave the registry: a failed delivery only prunes the connection.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The peer is gone and its outbound queue has been dropped.
    #[error("Connection closed")]
    Closed,

    /// The transport rejected the payload.
    #[error("Send failed: {message}")]
    SendFailed {
        /// Description of the transport failure.
        message: String,
    },

    /// The envelope could not be rendered to text.
    #[error("Encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Creates a new `SendFailed` error.
    #[must_use]
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }
}
