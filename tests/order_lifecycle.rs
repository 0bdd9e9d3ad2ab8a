use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use simtrade::adapters::{MemoryStore, PriceCache, StaticPriceFeed};
use simtrade::config::{StoreConfig, SweeperConfig};
use simtrade::domain::{
    Order, OrderRequest, OrderSide, OrderStatus, Position, Trade, TradingConfig, User,
};
use simtrade::engine::{Deferral, ExecutionResult, LedgerEvent, OrderService};
use simtrade::error::{CancelError, RejectReason, Result, SimError};
use simtrade::ledger::{CancelSet, FillSet, LedgerStore, OrderStatusCounts, PlacementSet};
use simtrade::services::OrderSweeper;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

struct Desk {
    service: Arc<OrderService>,
    feed: Arc<StaticPriceFeed>,
    store: Arc<MemoryStore>,
    user_id: i64,
}

impl Desk {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let feed = Arc::new(StaticPriceFeed::new());
        let prices = Arc::new(PriceCache::new(feed.clone(), Duration::from_millis(200)));
        let service = Arc::new(OrderService::new(
            store.clone() as Arc<dyn LedgerStore>,
            prices,
            TradingConfig::default(),
            StoreConfig {
                retry_attempts: 3,
                retry_backoff_ms: 1,
            },
        ));
        let user = assert_ok!(service.bootstrap("alice", Some(dec!(100000))).await);

        Self {
            service,
            feed,
            store,
            user_id: user.id,
        }
    }

    async fn cash(&self) -> (Decimal, Decimal) {
        let user = assert_ok!(self.service.get_user(self.user_id).await);
        (user.current_cash, user.frozen_cash)
    }

    async fn position(&self, symbol: &str) -> (i64, i64, Decimal) {
        let p = assert_ok!(self.store.get_position(self.user_id, symbol, "US").await)
            .expect("position exists");
        (p.quantity, p.available_quantity, p.avg_cost)
    }

    fn sweeper(&self) -> OrderSweeper {
        OrderSweeper::new(self.service.clone(), &SweeperConfig::default())
    }
}

#[tokio::test]
async fn limit_buy_fills_immediately_at_market_price() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(188));

    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190)))
            .await
    );

    let ExecutionResult::Filled(trade) = outcome.execution else {
        panic!("expected immediate fill");
    };
    assert_eq!(trade.price, dec!(188));
    assert_eq!(trade.commission, dec!(9.40));
    assert_eq!(outcome.order.status, OrderStatus::Filled);

    assert_eq!(desk.cash().await, (dec!(98110.60), dec!(0)));
    assert_eq!(desk.position("AAPL").await, (10, 10, dec!(188)));
}

#[tokio::test]
async fn limit_sell_closes_position() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(188));
    assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190)))
            .await
    );

    desk.feed.set_price("AAPL", dec!(196));
    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Sell, 10, dec!(195)))
            .await
    );

    let ExecutionResult::Filled(trade) = outcome.execution else {
        panic!("expected immediate fill");
    };
    assert_eq!(trade.price, dec!(196));
    assert_eq!(trade.commission, dec!(9.80));

    // 98110.60 + 1960 - 9.80
    assert_eq!(desk.cash().await, (dec!(100060.80), dec!(0)));
    let (quantity, available, _) = desk.position("AAPL").await;
    assert_eq!((quantity, available), (0, 0));
}

#[tokio::test]
async fn market_buy_during_price_outage_reserves_against_last_price() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(188));
    // Prime the last-known price with a quote lookup that does not fill
    assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 1, dec!(100)))
            .await
    );
    let (_, frozen_before) = desk.cash().await;

    desk.feed.remove_price("AAPL");
    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::market("AAPL", OrderSide::Buy, 10))
            .await
    );

    assert!(matches!(
        outcome.execution,
        ExecutionResult::Pending(Deferral::PriceUnavailable)
    ));
    assert_eq!(outcome.order.status, OrderStatus::Pending);
    assert_eq!(outcome.order.frozen_amount, dec!(1889.40));

    let (current, frozen) = desk.cash().await;
    assert_eq!(current, dec!(100000));
    assert_eq!(frozen, frozen_before + dec!(1889.40));
}

#[tokio::test]
async fn market_buy_without_any_known_price_is_rejected() {
    let desk = Desk::new().await;

    let err = assert_err!(
        desk.service
            .place_order(desk.user_id, OrderRequest::market("ZZZZ", OrderSide::Buy, 10))
            .await
    );
    assert!(matches!(
        err,
        SimError::Rejected(RejectReason::InsufficientFunds { required: None, .. })
    ));

    // Rejections are never persisted
    assert!(assert_ok!(desk.service.list_orders(desk.user_id).await).is_empty());
    assert_eq!(desk.cash().await, (dec!(100000), dec!(0)));
}

#[tokio::test]
async fn cancelled_buy_releases_funds_and_is_skipped_by_sweeper() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(200));

    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190)))
            .await
    );
    assert!(!outcome.execution.is_filled());
    assert_eq!(desk.cash().await, (dec!(100000), dec!(1909.50)));

    let cancelled = assert_ok!(desk.service.cancel(outcome.order.id).await);
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(desk.cash().await, (dec!(100000), dec!(0)));

    // Price now crosses the limit, but the order is gone
    desk.feed.set_price("AAPL", dec!(150));
    let report = assert_ok!(desk.sweeper().run_once().await);
    assert_eq!(report.total_checked, 0);
    assert_eq!(report.executed_count, 0);

    let order = assert_ok!(desk.service.get_order(outcome.order.id).await);
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(assert_ok!(desk.service.recent_trades(desk.user_id).await).is_empty());
}

#[tokio::test]
async fn cancelling_a_filled_order_fails_without_mutation() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(188));
    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190)))
            .await
    );
    let before = desk.cash().await;

    let err = assert_err!(desk.service.cancel(outcome.order.id).await);
    match err {
        SimError::Cancel(CancelError::NotPending { order_id, status }) => {
            assert_eq!(order_id, outcome.order.id);
            assert_eq!(status, "FILLED");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(desk.cash().await, before);
    assert_eq!(desk.position("AAPL").await, (10, 10, dec!(188)));

    // A second cancel of a cancelled order fails the same way
    desk.feed.set_price("AAPL", dec!(300));
    let pending = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 1, dec!(100)))
            .await
    );
    assert_ok!(desk.service.cancel(pending.order.id).await);
    assert!(matches!(
        desk.service.cancel(pending.order.id).await,
        Err(SimError::Cancel(CancelError::NotPending { .. }))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fill_attempts_fill_once() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(200));
    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190)))
            .await
    );
    let order = outcome.order;

    desk.feed.set_price("AAPL", dec!(188));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let service = desk.service.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move { service.execute_pending(&order).await }));
    }

    let mut fills = 0;
    for handle in handles {
        let result = assert_ok!(assert_ok!(handle.await));
        if result.is_filled() {
            fills += 1;
        }
    }

    assert_eq!(fills, 1);
    assert_eq!(assert_ok!(desk.service.recent_trades(desk.user_id).await).len(), 1);
    assert_eq!(desk.cash().await, (dec!(98110.60), dec!(0)));
    assert_eq!(desk.position("AAPL").await, (10, 10, dec!(188)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_sweeper_leaves_one_terminal_state() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(200));
    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190)))
            .await
    );
    desk.feed.set_price("AAPL", dec!(188));

    let sweeper = desk.sweeper();
    let service = desk.service.clone();
    let order_id = outcome.order.id;
    let (swept, cancelled) = tokio::join!(sweeper.run_once(), service.cancel(order_id));
    let swept = assert_ok!(swept);

    let order = assert_ok!(desk.service.get_order(order_id).await);
    let trades = assert_ok!(desk.service.recent_trades(desk.user_id).await);
    match order.status {
        OrderStatus::Filled => {
            assert!(cancelled.is_err());
            assert_eq!(trades.len(), 1);
            assert_eq!(swept.executed_count, 1);
        }
        OrderStatus::Cancelled => {
            assert!(cancelled.is_ok());
            assert!(trades.is_empty());
            assert_eq!(desk.cash().await, (dec!(100000), dec!(0)));
        }
        OrderStatus::Pending => panic!("order left pending"),
    }
}

#[tokio::test]
async fn buy_fill_cash_and_frozen_follow_formulas() {
    let desk = Desk::new().await;
    desk.feed.set_price("MSFT", dec!(420));
    // Two pending BUYs, then one of them fills
    let first = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("MSFT", OrderSide::Buy, 3, dec!(410)))
            .await
    );
    assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("MSFT", OrderSide::Buy, 2, dec!(400)))
            .await
    );
    let (cash_before, frozen_before) = desk.cash().await;
    assert_eq!(frozen_before, first.order.frozen_amount + dec!(804.00));

    desk.feed.set_price("MSFT", dec!(405.25));
    let result = assert_ok!(desk.service.execute_pending(&first.order).await);
    let ExecutionResult::Filled(trade) = result else {
        panic!("expected fill");
    };

    let notional = dec!(405.25) * Decimal::from(3);
    assert_eq!(trade.commission, dec!(6.0788));
    let (cash_after, frozen_after) = desk.cash().await;
    assert_eq!(cash_after, cash_before - (notional + trade.commission));
    assert_eq!(
        frozen_after,
        (frozen_before - first.order.frozen_amount).max(Decimal::ZERO)
    );
}

#[tokio::test]
async fn sell_fill_reduces_available_quantity() {
    let desk = Desk::new().await;
    desk.feed.set_price("NVDA", dec!(100));
    assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::market("NVDA", OrderSide::Buy, 5))
            .await
    );
    // Average cost blends the two buys
    desk.feed.set_price("NVDA", dec!(110));
    assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::market("NVDA", OrderSide::Buy, 5))
            .await
    );
    assert_eq!(desk.position("NVDA").await, (10, 10, dec!(105)));

    let (cash_before, _) = desk.cash().await;
    desk.feed.set_price("NVDA", dec!(120));
    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::market("NVDA", OrderSide::Sell, 4))
            .await
    );
    assert!(outcome.execution.is_filled());

    // 480 notional, 2.40 commission
    assert_eq!(desk.cash().await.0, cash_before + dec!(477.60));
    assert_eq!(desk.position("NVDA").await, (6, 6, dec!(105)));

    let err = assert_err!(
        desk.service
            .place_order(desk.user_id, OrderRequest::market("NVDA", OrderSide::Sell, 7))
            .await
    );
    assert!(matches!(
        err,
        SimError::Rejected(RejectReason::InsufficientPosition {
            required: 7,
            available: 6
        })
    ));
}

#[tokio::test]
async fn validation_rejects_before_anything_is_stored() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(188));

    let mut request = OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190));
    request.market = "HK".to_string();
    let err = assert_err!(desk.service.place_order(desk.user_id, request).await);
    assert_eq!(
        err.user_message(),
        "unsupported market: HK (only US is supported)"
    );

    let err = assert_err!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 1000, dec!(190)))
            .await
    );
    assert!(matches!(
        err,
        SimError::Rejected(RejectReason::InsufficientFunds { required: Some(_), .. })
    ));

    assert!(assert_ok!(desk.service.list_orders(desk.user_id).await).is_empty());
    assert_eq!(desk.cash().await, (dec!(100000), dec!(0)));
}

#[tokio::test]
async fn huge_limit_price_on_unquoted_symbol_is_rejected() {
    let desk = Desk::new().await;

    let err = assert_err!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("ZZZZ", OrderSide::Buy, 10, Decimal::MAX))
            .await
    );
    assert!(matches!(
        err,
        SimError::Rejected(RejectReason::InsufficientFunds { required: None, .. })
    ));

    assert!(assert_ok!(desk.service.list_orders(desk.user_id).await).is_empty());
    assert_eq!(desk.cash().await, (dec!(100000), dec!(0)));
}

#[tokio::test]
async fn fills_are_announced_on_the_event_stream() {
    let desk = Desk::new().await;
    let mut events = desk.service.subscribe();
    desk.feed.set_price("AAPL", dec!(188));

    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::market("AAPL", OrderSide::Buy, 1))
            .await
    );

    match assert_ok!(events.recv().await) {
        LedgerEvent::OrderFilled {
            user_id, order_id, ..
        } => {
            assert_eq!(user_id, desk.user_id);
            assert_eq!(order_id, outcome.order.id);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn snapshot_reports_priced_positions_and_warnings() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(188));
    desk.feed.set_price("TSLA", dec!(250));
    for symbol in ["AAPL", "TSLA"] {
        assert_ok!(
            desk.service
                .place_order(desk.user_id, OrderRequest::market(symbol, OrderSide::Buy, 2))
                .await
        );
    }

    desk.feed.set_price("AAPL", dec!(200));
    desk.feed.remove_price("TSLA");
    let snapshot = assert_ok!(desk.service.snapshot(desk.user_id).await);

    assert_eq!(snapshot.positions.len(), 2);
    assert_eq!(snapshot.overview.positions_value, dec!(400));
    assert_eq!(
        snapshot.overview.total_assets,
        snapshot.overview.user.current_cash + dec!(400)
    );
    let tsla = snapshot
        .positions
        .iter()
        .find(|p| p.position.symbol == "TSLA")
        .expect("TSLA position");
    assert!(tsla.last_price.is_none());
    assert!(tsla.market_value.is_none());

    let warning = snapshot.warning.expect("market data warning");
    assert_eq!(warning.kind, "market_data_error");
    assert!(warning.message.contains("TSLA"));

    assert_eq!(snapshot.orders.len(), 2);
    assert_eq!(snapshot.trades.len(), 2);
}

#[tokio::test]
async fn bootstrap_is_get_or_create() {
    let desk = Desk::new().await;
    let again = assert_ok!(desk.service.bootstrap("alice", Some(dec!(5))).await);
    assert_eq!(again.id, desk.user_id);
    assert_eq!(again.initial_cash, dec!(100000));

    let bob = assert_ok!(desk.service.bootstrap("bob", None).await);
    assert_eq!(bob.current_cash, TradingConfig::default().default_initial_capital);

    assert!(matches!(
        desk.service.bootstrap("carol", Some(dec!(0))).await,
        Err(SimError::Validation(_))
    ));
    assert!(matches!(
        desk.service.bootstrap("   ", None).await,
        Err(SimError::Validation(_))
    ));
}

#[test]
fn commission_is_never_below_either_floor() {
    let cfg = TradingConfig::default();
    for notional in [dec!(0), dec!(1), dec!(199.99), dec!(200), dec!(1880), dec!(123456.789)] {
        let commission = cfg.commission(notional).expect("commission in range");
        assert!(commission >= cfg.min_commission);
        assert!(commission >= cfg.commission_rate * notional);
    }
}

#[tokio::test]
async fn buy_stays_pending_when_cash_drops_below_cost() {
    let desk = Desk::new().await;
    desk.feed.set_price("AAPL", dec!(200));
    let outcome = assert_ok!(
        desk.service
            .place_order(desk.user_id, OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190)))
            .await
    );
    let (_, frozen) = desk.cash().await;

    // Cash drained outside the order flow after the reservation was made
    assert_ok!(desk.store.set_cash(desk.user_id, dec!(500), frozen).await);
    desk.feed.set_price("AAPL", dec!(185));

    let result = assert_ok!(desk.service.execute_pending(&outcome.order).await);
    match result {
        ExecutionResult::Pending(Deferral::InsufficientCash {
            required,
            available,
        }) => {
            assert_eq!(required, dec!(1859.25));
            assert_eq!(available, dec!(500));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let order = assert_ok!(desk.service.get_order(outcome.order.id).await);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(desk.cash().await, (dec!(500), frozen));
}

/// Memory ledger whose fills can be made to fail as if the database were locked
struct FlakyFillStore {
    inner: MemoryStore,
    fail_fills: AtomicBool,
}

#[async_trait]
impl LedgerStore for FlakyFillStore {
    async fn get_or_create_user(&self, username: &str, initial_cash: Decimal) -> Result<User> {
        self.inner.get_or_create_user(username, initial_cash).await
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        self.inner.get_user(user_id).await
    }

    async fn get_position(
        &self,
        user_id: i64,
        symbol: &str,
        market: &str,
    ) -> Result<Option<Position>> {
        self.inner.get_position(user_id, symbol, market).await
    }

    async fn list_positions(&self, user_id: i64) -> Result<Vec<Position>> {
        self.inner.list_positions(user_id).await
    }

    async fn get_order(&self, order_id: i64) -> Result<Option<Order>> {
        self.inner.get_order(order_id).await
    }

    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>> {
        self.inner.list_orders(user_id).await
    }

    async fn pending_orders(&self, user_id: Option<i64>) -> Result<Vec<Order>> {
        self.inner.pending_orders(user_id).await
    }

    async fn recent_trades(&self, user_id: i64, limit: i64) -> Result<Vec<Trade>> {
        self.inner.recent_trades(user_id, limit).await
    }

    async fn order_status_counts(&self) -> Result<OrderStatusCounts> {
        self.inner.order_status_counts().await
    }

    async fn place_order(&self, placement: &PlacementSet) -> Result<Order> {
        self.inner.place_order(placement).await
    }

    async fn apply_fill(&self, fill: &FillSet) -> Result<Option<Trade>> {
        if self.fail_fills.load(Ordering::SeqCst) {
            return Err(SimError::StoreBusy("database is locked".into()));
        }
        self.inner.apply_fill(fill).await
    }

    async fn apply_cancel(&self, cancel: &CancelSet) -> Result<bool> {
        self.inner.apply_cancel(cancel).await
    }
}

#[tokio::test]
async fn committed_order_survives_a_failed_first_fill() {
    let store = Arc::new(FlakyFillStore {
        inner: MemoryStore::new(),
        fail_fills: AtomicBool::new(true),
    });
    let feed = Arc::new(StaticPriceFeed::new());
    feed.set_price("AAPL", dec!(188));
    let prices = Arc::new(PriceCache::new(feed.clone(), Duration::from_millis(200)));
    let service = Arc::new(OrderService::new(
        store.clone() as Arc<dyn LedgerStore>,
        prices,
        TradingConfig::default(),
        StoreConfig {
            retry_attempts: 2,
            retry_backoff_ms: 1,
        },
    ));
    let user = assert_ok!(service.bootstrap("carol", Some(dec!(100000))).await);

    let outcome = assert_ok!(
        service
            .place_order(user.id, OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190)))
            .await
    );
    assert!(matches!(
        outcome.execution,
        ExecutionResult::Pending(Deferral::StoreUnavailable)
    ));
    assert_eq!(outcome.order.status, OrderStatus::Pending);

    let stored = assert_ok!(service.get_order(outcome.order.id).await);
    assert_eq!(stored.status, OrderStatus::Pending);
    let user_after = assert_ok!(service.get_user(user.id).await);
    assert_eq!(user_after.frozen_cash, dec!(1909.50));

    // Once the store recovers the pending order fills normally
    store.fail_fills.store(false, Ordering::SeqCst);
    let result = assert_ok!(service.execute_pending(&stored).await);
    assert!(result.is_filled());
    let user_after = assert_ok!(service.get_user(user.id).await);
    assert_eq!(user_after.frozen_cash, dec!(0));
}
