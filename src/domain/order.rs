use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for OrderSide {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("invalid order side: {other}")),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

impl TryFrom<&str> for OrderType {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            other => Err(format!("invalid order type: {other}")),
        }
    }
}

/// Order status. PENDING moves to FILLED or CANCELLED exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("invalid order status: {other}")),
        }
    }
}

/// Order request as submitted by a client session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub name: Option<String>,
    pub market: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: i64,
}

impl OrderRequest {
    pub fn limit(symbol: &str, side: OrderSide, quantity: i64, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: None,
            market: "US".to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
        }
    }

    pub fn market(symbol: &str, side: OrderSide, quantity: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: None,
            market: "US".to_string(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
        }
    }

    /// Display name, falling back to the normalized symbol
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.symbol.trim().to_ascii_uppercase(),
        }
    }
}

/// An accepted order that has not been persisted yet
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub order_no: String,
    pub symbol: String,
    pub name: String,
    pub market: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: i64,
    /// Cash reserved at placement; zero for SELL orders
    pub frozen_amount: Decimal,
}

impl NewOrder {
    pub fn from_request(user_id: i64, request: &OrderRequest, frozen_amount: Decimal) -> Self {
        Self {
            user_id,
            order_no: generate_order_no(),
            symbol: request.symbol.trim().to_ascii_uppercase(),
            name: request.display_name(),
            market: request.market.trim().to_ascii_uppercase(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            quantity: request.quantity,
            frozen_amount,
        }
    }
}

/// 16 hex characters taken from a fresh v4 UUID
pub fn generate_order_no() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Order (tracked in our ledger)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_no: String,
    pub user_id: i64,
    pub symbol: String,
    pub name: String,
    pub market: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: i64,
    pub filled_quantity: i64,
    pub status: OrderStatus,
    pub frozen_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}

/// Immutable execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub name: String,
    pub market: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: i64,
    pub commission: Decimal,
    pub trade_time: DateTime<Utc>,
}

impl Trade {
    pub fn notional(&self) -> Decimal {
        self.price.saturating_mul(Decimal::from(self.quantity))
    }
}

/// Execution record produced by a fill, before the store assigns an id
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub order_id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub name: String,
    pub market: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: i64,
    pub commission: Decimal,
    pub trade_time: DateTime<Utc>,
}

impl NewTrade {
    pub fn into_trade(self, id: i64) -> Trade {
        Trade {
            id,
            order_id: self.order_id,
            user_id: self.user_id,
            symbol: self.symbol,
            name: self.name,
            market: self.market,
            side: self.side,
            price: self.price,
            quantity: self.quantity,
            commission: self.commission,
            trade_time: self.trade_time,
        }
    }
}
