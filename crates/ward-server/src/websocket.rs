//! Dashboard socket endpoint at `/ws/{token}`.
//!
//! The token is the channel key: the configured station channel for nurse-station screens,
//! or an admission's access token for a guardian dashboard. Tokens are checked before the
//! upgrade so rejected peers get a plain HTTP status.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{MissedTickBehavior, interval};
use ward_core::{ChannelRegistry, Connection, QueuedConnection};

use crate::error::ApiError;
use crate::metrics;
use crate::routes::{ADMISSIONS, STATUS_DISCHARGED};
use crate::server::AppState;
use crate::storage::Filter;

/// How often a socket checks that the registry still holds it.
const MEMBERSHIP_CHECK_PERIOD: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Station,
    Guardian,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Station => "station",
            Self::Guardian => "guardian",
        }
    }
}

/// Handler for WebSocket upgrade at `/ws/{token}`.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let role = authorize(&state, &token).await?;

    let registry = Arc::clone(state.registry());
    let buffer = state.config.realtime.outbound_buffer;

    Ok(ws.on_upgrade(move |socket| async move {
        serve_socket(socket, registry, token, role, buffer).await;
    }))
}

/// Resolve which dashboard a token opens.
///
/// Unknown or discharged tokens are refused with 403; a storage outage is a 503.
pub async fn authorize(state: &AppState, token: &str) -> Result<Role, ApiError> {
    if token == state.station_channel() {
        return Ok(Role::Station);
    }

    let filters = [Filter::eq("access_token", token)];
    let admission = state
        .storage_call("admission token lookup", || {
            state.storage.select_one(ADMISSIONS, "id,status", &filters)
        })
        .await
        .map_err(|e| match e {
            ApiError::BadRequest(_) | ApiError::NotFound(_) => {
                ApiError::Forbidden("invalid access token".into())
            }
            other => other,
        });

    let admission = match admission {
        Ok(admission) => admission,
        Err(e) => {
            metrics::socket_rejected(match e {
                ApiError::Forbidden(_) => "invalid_token",
                _ => "storage",
            });
            return Err(e);
        }
    };

    let active = admission
        .as_ref()
        .and_then(|row| row.get("status"))
        .and_then(|s| s.as_str())
        .is_some_and(|status| status != STATUS_DISCHARGED);
    if !active {
        tracing::info!("rejected dashboard socket with unknown or discharged token");
        metrics::socket_rejected("invalid_token");
        return Err(ApiError::Forbidden("invalid access token".into()));
    }

    Ok(Role::Guardian)
}

/// Drive one accepted socket until either side goes away.
///
/// Queued broadcasts are written out as they arrive; inbound frames other than close are
/// ignored. The connection is unregistered on every exit path.
async fn serve_socket(
    socket: WebSocket,
    registry: Arc<ChannelRegistry>,
    channel: String,
    role: Role,
    buffer: usize,
) {
    let (handle, mut outbound) = QueuedConnection::channel(buffer);
    let member: Arc<dyn Connection> = Arc::new(handle);
    registry.register(Arc::clone(&member), &channel);
    metrics::socket_opened(role.as_str());
    tracing::info!(
        role = role.as_str(),
        members = registry.connection_count(&channel),
        "dashboard socket connected"
    );

    let (mut sender, mut receiver) = socket.split();

    let mut membership_check = interval(MEMBERSHIP_CHECK_PERIOD);
    membership_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    membership_check.tick().await;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(role = role.as_str(), "client closed socket");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Dashboards only listen. Pings are answered by the protocol layer.
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "socket read error");
                        break;
                    }
                }
            }

            text = outbound.recv() => {
                let Some(text) = text else { break };
                if let Err(e) = sender.send(Message::Text(text.to_string().into())).await {
                    tracing::debug!(error = %e, "failed to write broadcast");
                    break;
                }
            }

            _ = membership_check.tick() => {
                // A broadcast that timed out on this peer has already pruned it.
                if !registry.contains(&channel, &member) {
                    tracing::debug!(role = role.as_str(), "socket pruned from registry, closing");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    registry.unregister(&member, &channel);
    metrics::socket_closed(role.as_str());
    tracing::info!(role = role.as_str(), "dashboard socket disconnected");
}
