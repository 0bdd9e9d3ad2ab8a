use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use super::executor::{Deferral, FillOutcome, OrderExecutor};
use super::validator::OrderValidator;
use crate::adapters::PriceCache;
use crate::config::StoreConfig;
use crate::domain::{
    AccountOverview, Order, OrderRequest, OrderSide, OrderStatus, PricedPosition, Trade,
    TradingConfig, User,
};
use crate::error::{CancelError, Result, SimError};
use crate::ledger::{with_store_retry, CancelSet, LedgerStore, OrderStatusCounts, UserLocks};

/// Trades included in a snapshot, newest first
pub const SNAPSHOT_TRADE_LIMIT: i64 = 200;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Ledger change notifications, consumed by the session push forwarder
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    OrderFilled { user_id: i64, order_id: i64, trade: Trade },
    OrderCancelled { user_id: i64, order_id: i64 },
}

impl LedgerEvent {
    pub fn user_id(&self) -> i64 {
        match self {
            LedgerEvent::OrderFilled { user_id, .. }
            | LedgerEvent::OrderCancelled { user_id, .. } => *user_id,
        }
    }
}

/// Outcome of one execution attempt against the ledger
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Filled(Trade),
    Pending(Deferral),
}

impl ExecutionResult {
    pub fn is_filled(&self) -> bool {
        matches!(self, ExecutionResult::Filled(_))
    }
}

/// Accepted order plus the result of its immediate fill attempt
#[derive(Debug, Clone)]
pub struct PlaceOutcome {
    pub order: Order,
    pub execution: ExecutionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketDataWarning {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl MarketDataWarning {
    fn for_symbols(symbols: &[String]) -> Self {
        Self {
            kind: "market_data_error".to_string(),
            message: format!("failed to fetch prices for: {}", symbols.join(", ")),
        }
    }
}

/// Full account state pushed to client sessions
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub overview: AccountOverview,
    pub positions: Vec<PricedPosition>,
    pub orders: Vec<Order>,
    pub trades: Vec<Trade>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<MarketDataWarning>,
}

/// Order lifecycle orchestration.
///
/// Prices are fetched before the per-user lock is taken; everything that
/// reads and then writes a user's balances runs under that lock, and the
/// store re-checks PENDING when applying a fill or cancel.
pub struct OrderService {
    store: Arc<dyn LedgerStore>,
    prices: Arc<PriceCache>,
    validator: OrderValidator,
    executor: OrderExecutor,
    trading: TradingConfig,
    locks: UserLocks,
    retry: StoreConfig,
    events: broadcast::Sender<LedgerEvent>,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        prices: Arc<PriceCache>,
        trading: TradingConfig,
        retry: StoreConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            prices,
            validator: OrderValidator::new(trading.clone()),
            executor: OrderExecutor::new(trading.clone()),
            trading,
            locks: UserLocks::new(),
            retry,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub fn trading_config(&self) -> &TradingConfig {
        &self.trading
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    fn emit(&self, event: LedgerEvent) {
        // No receivers just means no session is listening
        let _ = self.events.send(event);
    }

    // ==================== Users ====================

    /// Get or create the user named `username`.
    ///
    /// An existing user is returned unchanged; `initial_capital` only applies
    /// to newly created users.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self, username: &str, initial_capital: Option<Decimal>) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(SimError::Validation("username must not be empty".to_string()));
        }

        let initial_cash = initial_capital.unwrap_or(self.trading.default_initial_capital);
        if initial_cash <= Decimal::ZERO {
            return Err(SimError::Validation("initial capital must be positive".to_string()));
        }

        let user = with_store_retry(&self.retry, "get_or_create_user", || {
            self.store.get_or_create_user(username, initial_cash)
        })
        .await?;

        debug!("Bootstrapped user {} ({})", user.id, user.username);
        Ok(user)
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(SimError::UserNotFound(user_id))
    }

    // ==================== Placement ====================

    /// Validate, freeze and persist a new order, then try to fill it at once.
    ///
    /// A rejected request is never persisted.
    #[instrument(skip(self, request), fields(symbol = %request.symbol, side = %request.side))]
    pub async fn place_order(&self, user_id: i64, request: OrderRequest) -> Result<PlaceOutcome> {
        let symbol = request.symbol.trim().to_ascii_uppercase();
        let market = request.market.trim().to_ascii_uppercase();

        let fresh_price = if symbol.is_empty() {
            None
        } else {
            self.prices.fetch(&symbol, &market).await.ok()
        };
        // A failed lookup still lets a BUY reserve against the last price seen
        let reference_price = fresh_price.or_else(|| self.prices.last_known(&symbol));

        let _guard = self.locks.lock(user_id).await;

        let user = self.get_user(user_id).await?;
        let position = self.store.get_position(user_id, &symbol, &market).await?;

        let placement = match self
            .validator
            .validate(&user, position.as_ref(), &request, reference_price)
        {
            Ok(placement) => placement,
            Err(reason) => {
                info!("Order rejected for user {}: {}", user_id, reason);
                return Err(reason.into());
            }
        };

        let order = with_store_retry(&self.retry, "place_order", || {
            self.store.place_order(&placement)
        })
        .await?;

        info!(
            "Order {} placed: {} {} {} x {} (frozen {})",
            order.order_no,
            order.side,
            order.order_type.as_str(),
            order.quantity,
            order.symbol,
            order.frozen_amount
        );

        // The order is committed; a failed first fill leaves it for the sweeper
        let execution = match self.fill_locked(&order, fresh_price).await {
            Ok(execution) => execution,
            Err(e) => {
                error!("Immediate fill of order {} failed: {}", order.order_no, e);
                ExecutionResult::Pending(Deferral::StoreUnavailable)
            }
        };

        let mut order = order;
        if execution.is_filled() {
            order.status = OrderStatus::Filled;
            order.filled_quantity = order.quantity;
        }

        Ok(PlaceOutcome { order, execution })
    }

    // ==================== Execution ====================

    /// Re-attempt a PENDING order at the current price.
    ///
    /// Safe to call concurrently for the same order: at most one call fills it.
    #[instrument(skip(self, order), fields(order_id = order.id))]
    pub async fn execute_pending(&self, order: &Order) -> Result<ExecutionResult> {
        if !order.is_pending() {
            return Ok(ExecutionResult::Pending(Deferral::NotPending));
        }

        let price = match self.prices.fetch(&order.symbol, &order.market).await {
            Ok(price) => price,
            Err(e) => {
                debug!("Order {} deferred: {}", order.id, e);
                return Ok(ExecutionResult::Pending(Deferral::PriceUnavailable));
            }
        };

        let _guard = self.locks.lock(order.user_id).await;

        // The order may have been filled or cancelled while we waited
        let current = match self.store.get_order(order.id).await? {
            Some(current) if current.is_pending() => current,
            Some(_) => return Ok(ExecutionResult::Pending(Deferral::NotPending)),
            None => return Err(SimError::OrderNotFound(order.id)),
        };

        self.fill_locked(&current, Some(price)).await
    }

    /// Fill attempt; the caller holds the user's lock
    async fn fill_locked(&self, order: &Order, price: Option<Decimal>) -> Result<ExecutionResult> {
        let user = self.get_user(order.user_id).await?;
        let position = self
            .store
            .get_position(order.user_id, &order.symbol, &order.market)
            .await?;

        let fill = match self
            .executor
            .attempt_fill(order, &user, position.as_ref(), price, Utc::now())
        {
            FillOutcome::Filled(fill) => fill,
            FillOutcome::StillPending(reason) => {
                debug!("Order {} still pending: {}", order.id, reason);
                return Ok(ExecutionResult::Pending(reason));
            }
        };

        let applied = with_store_retry(&self.retry, "apply_fill", || self.store.apply_fill(&fill)).await?;

        match applied {
            Some(trade) => {
                info!(
                    "Order {} filled: {} {} x {} @ {} (commission {})",
                    order.order_no,
                    trade.side,
                    trade.quantity,
                    trade.symbol,
                    trade.price,
                    trade.commission
                );
                self.emit(LedgerEvent::OrderFilled {
                    user_id: order.user_id,
                    order_id: order.id,
                    trade: trade.clone(),
                });
                Ok(ExecutionResult::Filled(trade))
            }
            None => Ok(ExecutionResult::Pending(Deferral::NotPending)),
        }
    }

    // ==================== Cancellation ====================

    /// Cancel a PENDING order and release its reservation
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: i64) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        if !order.is_pending() {
            return Err(not_pending(&order).into());
        }

        let market_price = match order.side {
            OrderSide::Buy => self
                .prices
                .fetch(&order.symbol, &order.market)
                .await
                .ok()
                .or_else(|| self.prices.last_known(&order.symbol)),
            OrderSide::Sell => None,
        };

        let _guard = self.locks.lock(order.user_id).await;

        let order = self.get_order(order_id).await?;
        if !order.is_pending() {
            return Err(not_pending(&order).into());
        }

        let user = self.get_user(order.user_id).await?;
        let release = self.executor.cancel_release(&order, market_price);
        let cancel = CancelSet {
            order_id,
            user_id: order.user_id,
            frozen_cash_after: (user.frozen_cash - release).max(Decimal::ZERO),
        };

        let cancelled =
            with_store_retry(&self.retry, "apply_cancel", || self.store.apply_cancel(&cancel)).await?;
        if !cancelled {
            let current = self.get_order(order_id).await?;
            return Err(not_pending(&current).into());
        }

        info!(
            "Order {} cancelled, released {} for user {}",
            order.order_no, release, order.user_id
        );
        self.emit(LedgerEvent::OrderCancelled {
            user_id: order.user_id,
            order_id,
        });

        let mut order = order;
        order.status = OrderStatus::Cancelled;
        Ok(order)
    }

    // ==================== Queries ====================

    pub async fn get_order(&self, order_id: i64) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(SimError::OrderNotFound(order_id))
    }

    pub async fn pending_orders(&self, user_id: Option<i64>) -> Result<Vec<Order>> {
        self.store.pending_orders(user_id).await
    }

    /// All orders of a user, newest first
    pub async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>> {
        self.get_user(user_id).await?;
        self.store.list_orders(user_id).await
    }

    pub async fn recent_trades(&self, user_id: i64) -> Result<Vec<Trade>> {
        self.store.recent_trades(user_id, SNAPSHOT_TRADE_LIMIT).await
    }

    pub async fn order_status_counts(&self) -> Result<OrderStatusCounts> {
        self.store.order_status_counts().await
    }

    /// Cash overview plus positions priced at the latest obtainable price.
    ///
    /// Positions whose price cannot be fetched are left out of
    /// `positions_value` and reported in the warning.
    pub async fn account_overview(
        &self,
        user_id: i64,
    ) -> Result<(AccountOverview, Vec<PricedPosition>, Option<MarketDataWarning>)> {
        let user = self.get_user(user_id).await?;
        let positions = self.store.list_positions(user_id).await?;

        let mut priced = Vec::with_capacity(positions.len());
        let mut failed = Vec::new();
        let mut positions_value = Decimal::ZERO;

        for position in positions {
            let last_price = if position.quantity > 0 {
                match self.prices.fetch(&position.symbol, &position.market).await {
                    Ok(price) => Some(price),
                    Err(e) => {
                        warn!("Skipping {} in positions value: {}", position.symbol, e);
                        failed.push(position.symbol.clone());
                        None
                    }
                }
            } else {
                None
            };

            let entry = PricedPosition::new(position, last_price);
            if let Some(value) = entry.market_value {
                positions_value = positions_value.saturating_add(value);
            }
            priced.push(entry);
        }

        let overview = AccountOverview {
            total_assets: positions_value.saturating_add(user.current_cash),
            positions_value,
            user,
        };
        let warning = (!failed.is_empty()).then(|| MarketDataWarning::for_symbols(&failed));

        Ok((overview, priced, warning))
    }

    /// Everything a client session renders
    #[instrument(skip(self))]
    pub async fn snapshot(&self, user_id: i64) -> Result<Snapshot> {
        let (overview, positions, warning) = self.account_overview(user_id).await?;
        let orders = self.store.list_orders(user_id).await?;
        let trades = self.recent_trades(user_id).await?;

        Ok(Snapshot {
            overview,
            positions,
            orders,
            trades,
            warning,
        })
    }
}

fn not_pending(order: &Order) -> CancelError {
    CancelError::NotPending {
        order_id: order.id,
        status: order.status.to_string(),
    }
}
