use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Order, OrderRequest, OrderSide, OrderType, PricedPosition, Trade, User};
use crate::engine::Snapshot;
use crate::ledger::OrderStatusCounts;

// ============================================================================
// Real-time channel messages
// ============================================================================

/// Client -> server message on the `/ws` channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Bootstrap {
        #[serde(default = "default_username")]
        username: String,
        #[serde(default)]
        initial_capital: Option<Decimal>,
    },
    Subscribe {
        user_id: i64,
    },
    PlaceOrder(PlaceOrderPayload),
    GetSnapshot,
    GetTrades,
    Ping,
    #[serde(other)]
    Unknown,
}

fn default_username() -> String {
    "demo".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderPayload {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_market")]
    pub market: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Option<Decimal>,
    pub quantity: i64,
}

fn default_market() -> String {
    "US".to_string()
}

impl From<PlaceOrderPayload> for OrderRequest {
    fn from(p: PlaceOrderPayload) -> Self {
        OrderRequest {
            symbol: p.symbol,
            name: p.name,
            market: p.market,
            side: p.side,
            order_type: p.order_type,
            price: p.price,
            quantity: p.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRef {
    pub id: i64,
    pub username: String,
}

impl From<&User> for UserRef {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

/// Server -> client message on the `/ws` channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    BootstrapOk {
        user: UserRef,
    },
    Snapshot(Box<Snapshot>),
    Trades {
        trades: Vec<Trade>,
    },
    OrderFilled {
        order_id: i64,
        trade: Trade,
    },
    OrderPending {
        order_id: i64,
        order_no: String,
        reason: String,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

// ============================================================================
// REST types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
    pub order: Order,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    pub order_id: i64,
    pub executed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessAllResponse {
    pub executed_count: u64,
    pub total_checked: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: i64,
    pub connected_users: usize,
    pub orders: OrderStatusCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionsResponse {
    pub user_id: i64,
    pub positions: Vec<PricedPosition>,
}
