//! Registry of live dashboard connections, grouped by channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use metrics::counter;
use parking_lot::RwLock;
use tokio::time::timeout;

use super::connection::Connection;
use super::envelope::Envelope;
use crate::metrics::{WS_BROADCAST_MESSAGES_TOTAL, WS_BROADCAST_PRUNED_TOTAL};

/// Default bound on a single connection's send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(1500);

type Member = Arc<dyn Connection>;

fn same_connection(a: &Member, b: &Member) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Channel membership plus fan-out.
///
/// The map is only touched under short, synchronous critical sections. A broadcast copies the
/// member list out, delivers without holding the lock, then prunes failures against whatever
/// the live map holds at that point, so a connection unregistered mid-broadcast stays gone.
pub struct ChannelRegistry {
    /// Channel key to its members. Never holds an empty list.
    channels: RwLock<HashMap<String, Vec<Member>>>,
    send_timeout: Duration,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_send_timeout(DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Add an accepted connection to a channel. Registering twice is a no-op.
    pub fn register(&self, connection: Member, channel: &str) {
        let mut channels = self.channels.write();
        let members = channels.entry(channel.to_string()).or_default();
        if !members.iter().any(|m| same_connection(m, &connection)) {
            members.push(connection);
        }

        tracing::debug!(channel, members = members.len(), "connection registered");
    }

    /// Remove a connection from a channel, dropping the channel once it is empty.
    pub fn unregister(&self, connection: &Member, channel: &str) {
        let mut channels = self.channels.write();
        let Some(members) = channels.get_mut(channel) else {
            return;
        };
        members.retain(|m| !same_connection(m, connection));
        let remaining = members.len();
        if remaining == 0 {
            channels.remove(channel);
        }

        tracing::debug!(channel, members = remaining, "connection unregistered");
    }

    /// Deliver an envelope to every member of `channel`.
    ///
    /// Members that error or exceed the send timeout are removed once all attempts finish.
    /// Nothing is reported to the caller.
    pub async fn broadcast(&self, envelope: &Envelope, channel: &str) {
        let members = self.snapshot(channel);
        if members.is_empty() {
            tracing::trace!(channel, event_type = %envelope.event_type, "no subscribers");
            return;
        }

        let text: Arc<str> = match envelope.to_text() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::warn!(channel, event_type = %envelope.event_type, error = %e, "failed to encode envelope");
                return;
            }
        };

        let send_timeout = self.send_timeout;
        let attempts = members.into_iter().map(|member| {
            let text = Arc::clone(&text);
            async move {
                let reason = match timeout(send_timeout, member.send(text)).await {
                    Ok(Ok(())) => return None,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("send timed out after {}ms", send_timeout.as_millis()),
                };
                tracing::debug!(channel, error = %reason, "delivery failed, pruning connection");
                Some(member)
            }
        });
        let failed: Vec<Member> = join_all(attempts).await.into_iter().flatten().collect();

        counter!(WS_BROADCAST_MESSAGES_TOTAL).increment(1);
        if !failed.is_empty() {
            self.prune(channel, &failed);
        }
    }

    /// Broadcast to several channels at once; a slow channel does not hold up the others.
    pub async fn broadcast_to_many(&self, envelope: &Envelope, channels: &[&str]) {
        let mut distinct: Vec<&str> = Vec::with_capacity(channels.len());
        for channel in channels {
            if !distinct.contains(channel) {
                distinct.push(*channel);
            }
        }
        join_all(distinct.into_iter().map(|c| self.broadcast(envelope, c))).await;
    }

    /// Broadcast to every channel that currently has members.
    pub async fn broadcast_all(&self, envelope: &Envelope) {
        let channels = self.channels();
        join_all(channels.iter().map(|c| self.broadcast(envelope, c))).await;
    }

    /// Number of connections on one channel.
    pub fn connection_count(&self, channel: &str) -> usize {
        self.channels.read().get(channel).map_or(0, Vec::len)
    }

    /// Number of connections across all channels.
    pub fn total_connections(&self) -> usize {
        self.channels.read().values().map(Vec::len).sum()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Keys of every channel with at least one member.
    pub fn channels(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    pub fn contains(&self, channel: &str, connection: &Member) -> bool {
        self.channels
            .read()
            .get(channel)
            .is_some_and(|members| members.iter().any(|m| same_connection(m, connection)))
    }

    fn snapshot(&self, channel: &str) -> Vec<Member> {
        self.channels
            .read()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    fn prune(&self, channel: &str, failed: &[Member]) {
        let mut channels = self.channels.write();
        let Some(members) = channels.get_mut(channel) else {
            return;
        };
        let before = members.len();
        members.retain(|m| !failed.iter().any(|f| same_connection(m, f)));
        let pruned = before - members.len();
        if members.is_empty() {
            channels.remove(channel);
        }

        if pruned > 0 {
            counter!(WS_BROADCAST_PRUNED_TOTAL).increment(pruned as u64);
            tracing::debug!(channel, pruned, "pruned unreachable connections");
        }
    }
}
