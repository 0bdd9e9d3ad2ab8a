use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Simulated trading account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub initial_cash: Decimal,
    pub current_cash: Decimal,
    pub frozen_cash: Decimal,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Cash not reserved by pending BUY orders
    pub fn available_cash(&self) -> Decimal {
        (self.current_cash - self.frozen_cash).max(Decimal::ZERO)
    }
}

/// Holding of one symbol for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub name: String,
    pub market: String,
    pub quantity: i64,
    pub available_quantity: i64,
    pub avg_cost: Decimal,
}

impl Position {
    /// Empty holding used before the first BUY fill of a symbol
    pub fn empty(user_id: i64, symbol: &str, name: &str, market: &str) -> Self {
        Self {
            id: 0,
            user_id,
            symbol: symbol.to_string(),
            name: name.to_string(),
            market: market.to_string(),
            quantity: 0,
            available_quantity: 0,
            avg_cost: Decimal::ZERO,
        }
    }

    pub fn cost_basis(&self) -> Decimal {
        self.avg_cost.saturating_mul(Decimal::from(self.quantity))
    }
}

/// Cash summary pushed as part of every snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountOverview {
    pub user: User,
    pub positions_value: Decimal,
    pub total_assets: Decimal,
}

/// Position with the latest obtainable price attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedPosition {
    #[serde(flatten)]
    pub position: Position,
    pub last_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
}

impl PricedPosition {
    pub fn new(position: Position, last_price: Option<Decimal>) -> Self {
        let market_value = last_price.and_then(|p| p.checked_mul(Decimal::from(position.quantity)));
        Self {
            position,
            last_price,
            market_value,
        }
    }
}
