//! Post-write notifications for the station and patient dashboards.
//!
//! Write handlers persist first, then hand the composer a preparation future that resolves
//! the patient's channel (usually an admission lookup through the retry executor) and builds
//! the envelope. Delivery runs on its own task so the HTTP response never waits on sockets.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::realtime::{ChannelRegistry, Envelope, STATION_CHANNEL};

/// An envelope plus the patient channel it concerns, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub envelope: Envelope,
    pub patient_channel: Option<String>,
}

impl Notification {
    /// Station-only notification.
    pub fn station(envelope: Envelope) -> Self {
        Self {
            envelope,
            patient_channel: None,
        }
    }

    /// Station plus the guardian dashboard holding `token`.
    pub fn with_patient(envelope: Envelope, token: Option<String>) -> Self {
        Self {
            envelope,
            patient_channel: token.filter(|t| !t.is_empty()),
        }
    }
}

/// Delivers notifications through a shared [`ChannelRegistry`].
#[derive(Clone)]
pub struct NotificationComposer {
    registry: Arc<ChannelRegistry>,
    station_channel: Arc<str>,
}

impl NotificationComposer {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self::with_station_channel(registry, STATION_CHANNEL)
    }

    pub fn with_station_channel(registry: Arc<ChannelRegistry>, station_channel: &str) -> Self {
        Self {
            registry,
            station_channel: Arc::from(station_channel),
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn station_channel(&self) -> &str {
        &self.station_channel
    }

    /// Broadcast to the station and, when given, one patient channel concurrently.
    pub async fn notify(&self, envelope: &Envelope, patient_channel: Option<&str>) {
        match patient_channel.filter(|c| !c.is_empty()) {
            Some(channel) => {
                self.registry
                    .broadcast_to_many(envelope, &[self.station_channel.as_ref(), channel])
                    .await
            }
            None => self.registry.broadcast(envelope, &self.station_channel).await,
        }
    }

    pub async fn notify_station(&self, envelope: &Envelope) {
        self.notify(envelope, None).await;
    }

    pub async fn deliver(&self, notification: Notification) {
        self.notify(
            &notification.envelope,
            notification.patient_channel.as_deref(),
        )
        .await;
    }

    /// Fire-and-forget delivery.
    ///
    /// `prepare` resolves to the notification to send, `None` when there is nothing to send
    /// (e.g. the admission disappeared), or an error which is logged and dropped.
    pub fn dispatch<F, E>(&self, event: &'static str, prepare: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<Option<Notification>, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let composer = self.clone();
        tokio::spawn(async move {
            match prepare.await {
                Ok(Some(notification)) => {
                    tracing::debug!(
                        event,
                        patient = notification.patient_channel.is_some(),
                        "dispatching notification"
                    );
                    composer.deliver(notification).await;
                }
                Ok(None) => tracing::debug!(event, "no recipients resolved, skipping notification"),
                Err(e) => tracing::error!(event, error = %e, "failed to prepare notification"),
            }
        })
    }
}
