//! Server-initiated pushes to connected sessions.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::sessions::SessionRegistry;
use crate::api::types::ServerMessage;
use crate::engine::{LedgerEvent, OrderService};

/// Build and deliver a fresh snapshot to every session of `user_id`
pub async fn push_snapshot(service: &OrderService, sessions: &SessionRegistry, user_id: i64) {
    match service.snapshot(user_id).await {
        Ok(snapshot) => {
            sessions.send_to_user(user_id, &ServerMessage::Snapshot(Box::new(snapshot)));
        }
        Err(e) => {
            warn!("Snapshot for user {} failed: {}", user_id, e);
            sessions.send_to_user(user_id, &ServerMessage::error(e.user_message()));
        }
    }
}

/// Turn ledger events into session pushes: a fill sends `order_filled`
/// followed by a snapshot, a cancel sends a snapshot.
pub fn spawn_event_forwarder(service: Arc<OrderService>, sessions: SessionRegistry) -> JoinHandle<()> {
    let mut rx = service.subscribe();

    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event forwarder lagged, skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let user_id = event.user_id();
            if !sessions.is_connected(user_id) {
                continue;
            }

            if let LedgerEvent::OrderFilled {
                order_id, trade, ..
            } = event
            {
                sessions.send_to_user(user_id, &ServerMessage::OrderFilled { order_id, trade });
            }
            push_snapshot(&service, &sessions, user_id).await;
        }

        info!("Event forwarder stopped");
    })
}

/// Refresh every connected user's snapshot on a fixed interval
pub fn spawn_snapshot_refresher(
    service: Arc<OrderService>,
    sessions: SessionRegistry,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let users = sessions.user_ids();
            if users.is_empty() {
                continue;
            }
            debug!("Refreshing snapshots for {} users", users.len());
            for user_id in users {
                push_snapshot(&service, &sessions, user_id).await;
            }
        }
    })
}
