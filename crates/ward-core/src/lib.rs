//! # ward-core
//!
//! Real-time plumbing shared by the ward dashboard server.
//!
//! ## Overview
//!
//! - [`realtime`]: the [`ChannelRegistry`] that fans envelopes out to live socket
//!   connections grouped by channel (the ward station, or one patient access token).
//! - [`retry`]: the [`RetryExecutor`] that wraps every upstream storage call with error
//!   classification, bounded retries and exponential backoff with jitter.
//! - [`notify`]: the [`NotificationComposer`] write handlers use to deliver an envelope to
//!   the station and a patient channel once their write has been persisted.
//!
//! `realtime` and `retry` do not depend on each other; `notify` builds on both.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ward_core::{ChannelRegistry, Envelope, NotificationComposer, RetryExecutor};
//!
//! let registry = Arc::new(ChannelRegistry::default());
//! let retry = RetryExecutor::default();
//! let composer = NotificationComposer::new(registry.clone());
//!
//! let row = retry.execute("vital_signs.insert", || storage.insert("vital_signs", &body)).await?;
//! composer.notify(&Envelope::new("NEW_VITAL", row), Some(token)).await;
//! ```

pub mod error;
pub mod metrics;
pub mod notify;
pub mod realtime;
pub mod retry;

pub use error::DeliveryError;
pub use notify::{Notification, NotificationComposer};
pub use realtime::{
    ChannelRegistry, Connection, DEFAULT_SEND_TIMEOUT, Envelope, QueuedConnection,
    STATION_CHANNEL, event_types,
};
pub use retry::{
    Classify, ErrorClass, FailureKind, RetryExecutor, RetryOutcome, RetryPolicy, classify,
};
