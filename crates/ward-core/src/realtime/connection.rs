//! Connection contract for the registry.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DeliveryError;

/// A live peer that can accept text payloads.
///
/// `send` may fail or never complete; the registry bounds every call with a timeout and
/// treats either outcome as the peer being gone. Identity is the `Arc` allocation the
/// connection is registered under.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send(&self, text: Arc<str>) -> Result<(), DeliveryError>;
}

/// Handle for a socket whose writer task drains a bounded queue.
///
/// A peer that stops reading eventually fills the queue, at which point `send` waits and the
/// registry's per-send timeout prunes it.
#[derive(Clone)]
pub struct QueuedConnection {
    sender: mpsc::Sender<Arc<str>>,
}

impl QueuedConnection {
    /// Create a handle plus the receiving end for the socket writer.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl Connection for QueuedConnection {
    async fn send(&self, text: Arc<str>) -> Result<(), DeliveryError> {
        self.sender
            .send(text)
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}
