use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::api::sessions::SessionRegistry;
use crate::engine::OrderService;
use crate::services::OrderSweeper;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,

    pub sweeper: Arc<OrderSweeper>,

    /// Real-time sessions, for snapshot pushes
    pub sessions: SessionRegistry,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<OrderService>, sweeper: Arc<OrderSweeper>) -> Self {
        Self {
            service,
            sweeper,
            sessions: SessionRegistry::new(),
            start_time: Utc::now(),
        }
    }

    /// Get system uptime in seconds
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
