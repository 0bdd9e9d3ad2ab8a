use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the trading service
#[derive(Error, Debug)]
pub enum SimError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Order flow errors
    #[error("Order rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("Cancel failed: {0}")]
    Cancel(#[from] CancelError),

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    // Market data errors
    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),

    // Store contention (lock timeout, serialization conflict)
    #[error("Store busy: {0}")]
    StoreBusy(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SimError {
    /// Transient persistence failures that may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            SimError::StoreBusy(_) => true,
            SimError::Database(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01") | Some("55P03"))
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Message safe to show to a client session
    pub fn user_message(&self) -> String {
        match self {
            SimError::Rejected(reason) => reason.to_string(),
            SimError::Cancel(err) => err.to_string(),
            SimError::UserNotFound(_) => "user not found".to_string(),
            SimError::OrderNotFound(_) => "order not found".to_string(),
            SimError::Validation(msg) => msg.clone(),
            other if other.is_retryable() => "service busy, please retry".to_string(),
            _ => "internal error".to_string(),
        }
    }
}

/// Result type alias for SimError
pub type Result<T> = std::result::Result<T, SimError>;

/// Validation-time rejection. Never retryable without changing the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("unsupported market: {market} (only {supported} is supported)")]
    UnsupportedMarket { market: String, supported: String },

    #[error("unknown symbol")]
    UnknownSymbol,

    #[error("invalid quantity {quantity}: must be >= {min} and a multiple of {lot_size}")]
    InvalidQuantity {
        quantity: i64,
        min: i64,
        lot_size: i64,
    },

    #[error("limit orders require a positive price")]
    InvalidPrice,

    /// `required` is `None` when the cost cannot be estimated: no price was
    /// known, or the amount is out of range
    #[error("insufficient funds: {}", funds_detail(.required, .available))]
    InsufficientFunds {
        required: Option<Decimal>,
        available: Decimal,
    },

    #[error("insufficient position: need {required} shares, available {available}")]
    InsufficientPosition { required: i64, available: i64 },
}

fn funds_detail(required: &Option<Decimal>, available: &Decimal) -> String {
    match required {
        Some(required) => format!("need ${required}, available ${available}"),
        None => format!("cannot estimate required funds, available ${available}"),
    }
}

/// Cancellation failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CancelError {
    #[error("order {order_id} is {status}, only PENDING orders can be cancelled")]
    NotPending { order_id: i64, status: String },
}
