//! Names of the metrics this crate emits. The server installs the recorder.

/// Broadcasts delivered to a non-empty channel.
pub const WS_BROADCAST_MESSAGES_TOTAL: &str = "ws_broadcast_messages_total";
/// Connections removed after a failed or timed-out send.
pub const WS_BROADCAST_PRUNED_TOTAL: &str = "ws_broadcast_pruned_total";
/// Retries scheduled, labelled by `class`.
pub const STORAGE_RETRIES_TOTAL: &str = "storage_retries_total";
/// Calls that gave up, labelled by `kind` (`terminal` or `exhausted`).
pub const STORAGE_FAILURES_TOTAL: &str = "storage_failures_total";
