use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::types::ServerMessage;

pub type SessionSender = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug, Clone)]
struct SessionHandle {
    id: Uuid,
    tx: SessionSender,
}

/// Active real-time sessions, keyed by user id.
///
/// A user may have several sessions open at once. The entry for a user is
/// removed when its last session goes away.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<i64, Vec<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: i64, session_id: Uuid, tx: SessionSender) {
        let mut entry = self.sessions.entry(user_id).or_default();
        if entry.iter().any(|s| s.id == session_id) {
            return;
        }
        entry.push(SessionHandle { id: session_id, tx });
        info!("Session {} registered for user {} ({} open)", session_id, user_id, entry.len());
    }

    pub fn unregister(&self, user_id: i64, session_id: Uuid) {
        let now_empty = match self.sessions.get_mut(&user_id) {
            Some(mut entry) => {
                entry.retain(|s| s.id != session_id);
                entry.is_empty()
            }
            None => return,
        };

        if now_empty {
            self.sessions.remove_if(&user_id, |_, v| v.is_empty());
        }
        info!("Session {} unregistered from user {}", session_id, user_id);
    }

    /// Deliver `message` to every session of `user_id`. Returns how many
    /// sessions received it; closed sessions are dropped.
    pub fn send_to_user(&self, user_id: i64, message: &ServerMessage) -> usize {
        let (delivered, now_empty) = match self.sessions.get_mut(&user_id) {
            Some(mut entry) => {
                entry.retain(|s| s.tx.send(message.clone()).is_ok());
                (entry.len(), entry.is_empty())
            }
            None => return 0,
        };

        if now_empty {
            debug!("All sessions of user {} are closed", user_id);
            self.sessions.remove_if(&user_id, |_, v| v.is_empty());
        }
        delivered
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.sessions.contains_key(&user_id)
    }

    pub fn user_ids(&self) -> Vec<i64> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn connected_users(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_count(&self, user_id: i64) -> usize {
        self.sessions.get(&user_id).map_or(0, |e| e.len())
    }
}
