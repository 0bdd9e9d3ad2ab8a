use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::domain::{Order, OrderSide, OrderStatus, OrderType, Position, Trade, User};
use crate::error::{Result, SimError};
use crate::ledger::{CancelSet, FillSet, LedgerStore, OrderStatusCounts, PlacementSet};

const ORDER_COLUMNS: &str = "id, order_no, user_id, symbol, name, market, side, order_type, price, \
     quantity, filled_quantity, status, frozen_amount, created_at, updated_at";

const TRADE_COLUMNS: &str =
    "id, order_id, user_id, symbol, name, market, side, price, quantity, commission, trade_time";

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn user_from_row(row: &PgRow) -> User {
        User {
            id: row.get("id"),
            username: row.get("username"),
            initial_cash: row.get("initial_cash"),
            current_cash: row.get("current_cash"),
            frozen_cash: row.get("frozen_cash"),
            created_at: row.get("created_at"),
        }
    }

    fn position_from_row(row: &PgRow) -> Position {
        Position {
            id: row.get("id"),
            user_id: row.get("user_id"),
            symbol: row.get("symbol"),
            name: row.get("name"),
            market: row.get("market"),
            quantity: row.get("quantity"),
            available_quantity: row.get("available_quantity"),
            avg_cost: row.get("avg_cost"),
        }
    }

    fn order_from_row(row: &PgRow) -> Result<Order> {
        let side: String = row.get("side");
        let order_type: String = row.get("order_type");
        let status: String = row.get("status");

        Ok(Order {
            id: row.get("id"),
            order_no: row.get("order_no"),
            user_id: row.get("user_id"),
            symbol: row.get("symbol"),
            name: row.get("name"),
            market: row.get("market"),
            side: OrderSide::try_from(side.as_str()).map_err(SimError::Internal)?,
            order_type: OrderType::try_from(order_type.as_str()).map_err(SimError::Internal)?,
            price: row.get("price"),
            quantity: row.get("quantity"),
            filled_quantity: row.get("filled_quantity"),
            status: OrderStatus::try_from(status.as_str()).map_err(SimError::Internal)?,
            frozen_amount: row.get("frozen_amount"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn trade_from_row(row: &PgRow) -> Result<Trade> {
        let side: String = row.get("side");
        Ok(Trade {
            id: row.get("id"),
            order_id: row.get("order_id"),
            user_id: row.get("user_id"),
            symbol: row.get("symbol"),
            name: row.get("name"),
            market: row.get("market"),
            side: OrderSide::try_from(side.as_str()).map_err(SimError::Internal)?,
            price: row.get("price"),
            quantity: row.get("quantity"),
            commission: row.get("commission"),
            trade_time: row.get("trade_time"),
        })
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_or_create_user(&self, username: &str, initial_cash: Decimal) -> Result<User> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, initial_cash, current_cash, frozen_cash)
            VALUES ($1, $2, $2, 0)
            ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
            RETURNING id, username, initial_cash, current_cash, frozen_cash, created_at
            "#,
        )
        .bind(username)
        .bind(initial_cash)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::user_from_row(&row))
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, initial_cash, current_cash, frozen_cash, created_at
            FROM users WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::user_from_row))
    }

    async fn get_position(
        &self,
        user_id: i64,
        symbol: &str,
        market: &str,
    ) -> Result<Option<Position>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, symbol, name, market, quantity, available_quantity, avg_cost
            FROM positions
            WHERE user_id = $1 AND symbol = $2 AND market = $3
            "#,
        )
        .bind(user_id)
        .bind(symbol)
        .bind(market)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::position_from_row))
    }

    async fn list_positions(&self, user_id: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, symbol, name, market, quantity, available_quantity, avg_cost
            FROM positions
            WHERE user_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::position_from_row).collect())
    }

    async fn get_order(&self, order_id: i64) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::order_from_row).transpose()
    }

    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::order_from_row).collect()
    }

    async fn pending_orders(&self, user_id: Option<i64>) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'PENDING' AND ($1::BIGINT IS NULL OR user_id = $1) \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::order_from_row).collect()
    }

    async fn recent_trades(&self, user_id: i64, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE user_id = $1 \
             ORDER BY trade_time DESC, id DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::trade_from_row).collect()
    }

    async fn order_status_counts(&self) -> Result<OrderStatusCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
                COUNT(*) FILTER (WHERE status = 'FILLED') AS filled,
                COUNT(*) FILTER (WHERE status = 'CANCELLED') AS cancelled
            FROM orders
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OrderStatusCounts {
            total: row.get("total"),
            pending: row.get("pending"),
            filled: row.get("filled"),
            cancelled: row.get("cancelled"),
        })
    }

    #[instrument(skip(self, placement), fields(user_id = placement.order.user_id))]
    async fn place_order(&self, placement: &PlacementSet) -> Result<Order> {
        let new = &placement.order;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE users SET frozen_cash = $2 WHERE id = $1")
            .bind(new.user_id)
            .bind(placement.frozen_cash_after)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(SimError::UserNotFound(new.user_id));
        }

        let row = sqlx::query(&format!(
            "INSERT INTO orders (order_no, user_id, symbol, name, market, side, order_type, \
             price, quantity, filled_quantity, status, frozen_amount) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 'PENDING', $10) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&new.order_no)
        .bind(new.user_id)
        .bind(&new.symbol)
        .bind(&new.name)
        .bind(&new.market)
        .bind(new.side.as_str())
        .bind(new.order_type.as_str())
        .bind(new.price)
        .bind(new.quantity)
        .bind(new.frozen_amount)
        .fetch_one(&mut *tx)
        .await?;

        let order = Self::order_from_row(&row)?;
        tx.commit().await?;
        Ok(order)
    }

    #[instrument(skip(self, fill), fields(order_id = fill.order_id))]
    async fn apply_fill(&self, fill: &FillSet) -> Result<Option<Trade>> {
        let mut tx = self.pool.begin().await?;

        // Check-and-set on status; a concurrent fill or cancel loses here
        let claimed = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'FILLED', filled_quantity = quantity, updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(fill.order_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("Order {} no longer pending, fill skipped", fill.order_id);
            return Ok(None);
        }

        sqlx::query("UPDATE users SET current_cash = $2, frozen_cash = $3 WHERE id = $1")
            .bind(fill.user_id)
            .bind(fill.current_cash_after)
            .bind(fill.frozen_cash_after)
            .execute(&mut *tx)
            .await?;

        let p = &fill.position;
        sqlx::query(
            r#"
            INSERT INTO positions (user_id, symbol, name, market, quantity, available_quantity, avg_cost)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, symbol, market) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                available_quantity = EXCLUDED.available_quantity,
                avg_cost = EXCLUDED.avg_cost
            "#,
        )
        .bind(p.user_id)
        .bind(&p.symbol)
        .bind(&p.name)
        .bind(&p.market)
        .bind(p.quantity)
        .bind(p.available_quantity)
        .bind(p.avg_cost)
        .execute(&mut *tx)
        .await?;

        let t = &fill.trade;
        let row = sqlx::query(&format!(
            "INSERT INTO trades (order_id, user_id, symbol, name, market, side, price, quantity, \
             commission, trade_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {TRADE_COLUMNS}"
        ))
        .bind(t.order_id)
        .bind(t.user_id)
        .bind(&t.symbol)
        .bind(&t.name)
        .bind(&t.market)
        .bind(t.side.as_str())
        .bind(t.price)
        .bind(t.quantity)
        .bind(t.commission)
        .bind(t.trade_time)
        .fetch_one(&mut *tx)
        .await?;

        let trade = Self::trade_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(trade))
    }

    #[instrument(skip(self, cancel), fields(order_id = cancel.order_id))]
    async fn apply_cancel(&self, cancel: &CancelSet) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE orders SET status = 'CANCELLED', updated_at = $2
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(cancel.order_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE users SET frozen_cash = $2 WHERE id = $1")
            .bind(cancel.user_id)
            .bind(cancel.frozen_cash_after)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}
