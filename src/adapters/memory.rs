//! In-process ledger store.
//!
//! Used by the `--memory` demo mode and by the test suite. Each mutating
//! call takes the single write lock, so a placement, fill or cancel is
//! applied all-or-nothing.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::{Order, OrderStatus, Position, Trade, User};
use crate::error::{Result, SimError};
use crate::ledger::{CancelSet, FillSet, LedgerStore, OrderStatusCounts, PlacementSet};

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<i64, User>,
    positions: BTreeMap<i64, Position>,
    orders: BTreeMap<i64, Order>,
    trades: BTreeMap<i64, Trade>,
    next_user_id: i64,
    next_position_id: i64,
    next_order_id: i64,
    next_trade_id: i64,
}

impl MemoryState {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

/// Ledger kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a user's cash balances (test and demo seeding)
    pub async fn set_cash(&self, user_id: i64, current_cash: Decimal, frozen_cash: Decimal) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(SimError::UserNotFound(user_id))?;
        user.current_cash = current_cash;
        user.frozen_cash = frozen_cash;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_or_create_user(&self, username: &str, initial_cash: Decimal) -> Result<User> {
        let mut state = self.state.write().await;
        if let Some(user) = state.users.values().find(|u| u.username == username) {
            return Ok(user.clone());
        }

        let id = MemoryState::next_id(&mut state.next_user_id);
        let user = User {
            id,
            username: username.to_string(),
            initial_cash,
            current_cash: initial_cash,
            frozen_cash: Decimal::ZERO,
            created_at: Utc::now(),
        };
        state.users.insert(id, user.clone());
        debug!("Created user {} ({})", id, username);
        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn get_position(
        &self,
        user_id: i64,
        symbol: &str,
        market: &str,
    ) -> Result<Option<Position>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .values()
            .find(|p| p.user_id == user_id && p.symbol == symbol && p.market == market)
            .cloned())
    }

    async fn list_positions(&self, user_id: i64) -> Result<Vec<Position>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_order(&self, order_id: i64) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .rev()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn pending_orders(&self, user_id: Option<i64>) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.is_pending())
            .filter(|o| user_id.map_or(true, |uid| o.user_id == uid))
            .cloned()
            .collect())
    }

    async fn recent_trades(&self, user_id: i64, limit: i64) -> Result<Vec<Trade>> {
        let state = self.state.read().await;
        Ok(state
            .trades
            .values()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn order_status_counts(&self) -> Result<OrderStatusCounts> {
        let state = self.state.read().await;
        let mut counts = OrderStatusCounts::default();
        for order in state.orders.values() {
            counts.total += 1;
            match order.status {
                OrderStatus::Pending => counts.pending += 1,
                OrderStatus::Filled => counts.filled += 1,
                OrderStatus::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }

    #[instrument(skip(self, placement), fields(user_id = placement.order.user_id))]
    async fn place_order(&self, placement: &PlacementSet) -> Result<Order> {
        let mut state = self.state.write().await;
        let new = &placement.order;

        let user = state
            .users
            .get_mut(&new.user_id)
            .ok_or(SimError::UserNotFound(new.user_id))?;
        user.frozen_cash = placement.frozen_cash_after;

        let id = MemoryState::next_id(&mut state.next_order_id);
        let now = Utc::now();
        let order = Order {
            id,
            order_no: new.order_no.clone(),
            user_id: new.user_id,
            symbol: new.symbol.clone(),
            name: new.name.clone(),
            market: new.market.clone(),
            side: new.side,
            order_type: new.order_type,
            price: new.price,
            quantity: new.quantity,
            filled_quantity: 0,
            status: OrderStatus::Pending,
            frozen_amount: new.frozen_amount,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    #[instrument(skip(self, fill), fields(order_id = fill.order_id))]
    async fn apply_fill(&self, fill: &FillSet) -> Result<Option<Trade>> {
        let mut state = self.state.write().await;

        match state.orders.get(&fill.order_id) {
            Some(order) if order.is_pending() => {}
            Some(_) => return Ok(None),
            None => return Err(SimError::OrderNotFound(fill.order_id)),
        }
        if !state.users.contains_key(&fill.user_id) {
            return Err(SimError::UserNotFound(fill.user_id));
        }

        // All checks passed; nothing below can fail.
        if let Some(user) = state.users.get_mut(&fill.user_id) {
            user.current_cash = fill.current_cash_after;
            user.frozen_cash = fill.frozen_cash_after;
        }

        let mut position = fill.position.clone();
        if position.id == 0 {
            position.id = MemoryState::next_id(&mut state.next_position_id);
        }
        state.positions.insert(position.id, position);

        let trade_id = MemoryState::next_id(&mut state.next_trade_id);
        let trade = fill.trade.clone().into_trade(trade_id);
        state.trades.insert(trade_id, trade.clone());

        if let Some(order) = state.orders.get_mut(&fill.order_id) {
            order.filled_quantity = order.quantity;
            order.status = OrderStatus::Filled;
            order.updated_at = Utc::now();
        }

        Ok(Some(trade))
    }

    #[instrument(skip(self, cancel), fields(order_id = cancel.order_id))]
    async fn apply_cancel(&self, cancel: &CancelSet) -> Result<bool> {
        let mut state = self.state.write().await;

        match state.orders.get(&cancel.order_id) {
            Some(order) if order.is_pending() => {}
            Some(_) => return Ok(false),
            None => return Err(SimError::OrderNotFound(cancel.order_id)),
        }

        let user = state
            .users
            .get_mut(&cancel.user_id)
            .ok_or(SimError::UserNotFound(cancel.user_id))?;
        user.frozen_cash = cancel.frozen_cash_after;

        if let Some(order) = state.orders.get_mut(&cancel.order_id) {
            order.status = OrderStatus::Cancelled;
            order.updated_at = Utc::now();
        }
        Ok(true)
    }
}
