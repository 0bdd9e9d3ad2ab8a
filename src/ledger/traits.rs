use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{NewOrder, NewTrade, Order, Position, Trade, User};
use crate::error::Result;

/// Accepting an order: insert it and move the reserved cash into `frozen_cash`
#[derive(Debug, Clone)]
pub struct PlacementSet {
    pub order: NewOrder,
    pub frozen_cash_after: Decimal,
}

/// Everything a fill changes. Applied all-or-nothing, and only while the
/// order is still PENDING.
#[derive(Debug, Clone)]
pub struct FillSet {
    pub order_id: i64,
    pub user_id: i64,
    pub current_cash_after: Decimal,
    pub frozen_cash_after: Decimal,
    /// Post-fill holding; `id == 0` means the row does not exist yet
    pub position: Position,
    pub trade: NewTrade,
}

/// Cancelling a PENDING order and releasing its reservation
#[derive(Debug, Clone)]
pub struct CancelSet {
    pub order_id: i64,
    pub user_id: i64,
    pub frozen_cash_after: Decimal,
}

/// Number of orders in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusCounts {
    pub total: i64,
    pub pending: i64,
    pub filled: i64,
    pub cancelled: i64,
}

/// Persistence contract for users, positions, orders and trades.
///
/// Read-modify-write sequences against one user are serialized by the
/// caller through [`super::UserLocks`]; the mutating methods themselves are
/// atomic and guard the PENDING status with a check-and-set.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the existing user for `username`, or creates one funded with `initial_cash`
    async fn get_or_create_user(&self, username: &str, initial_cash: Decimal) -> Result<User>;

    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;

    async fn get_position(
        &self,
        user_id: i64,
        symbol: &str,
        market: &str,
    ) -> Result<Option<Position>>;

    async fn list_positions(&self, user_id: i64) -> Result<Vec<Position>>;

    async fn get_order(&self, order_id: i64) -> Result<Option<Order>>;

    /// All orders of a user, newest first
    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>>;

    /// PENDING orders, oldest first, optionally restricted to one user
    async fn pending_orders(&self, user_id: Option<i64>) -> Result<Vec<Order>>;

    /// Most recent trades of a user, newest first
    async fn recent_trades(&self, user_id: i64, limit: i64) -> Result<Vec<Trade>>;

    async fn order_status_counts(&self) -> Result<OrderStatusCounts>;

    /// Insert the order and update the user's frozen cash atomically
    async fn place_order(&self, placement: &PlacementSet) -> Result<Order>;

    /// Apply a fill. Returns `None` without changing anything when the order
    /// is no longer PENDING.
    async fn apply_fill(&self, fill: &FillSet) -> Result<Option<Trade>>;

    /// Apply a cancel. Returns `false` without changing anything when the
    /// order is no longer PENDING.
    async fn apply_cancel(&self, cancel: &CancelSet) -> Result<bool>;
}
