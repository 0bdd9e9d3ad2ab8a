//! Order validation, matching and lifecycle orchestration.

pub mod executor;
pub mod service;
pub mod validator;

pub use executor::{Deferral, FillOutcome, OrderExecutor};
pub use service::{
    ExecutionResult, LedgerEvent, MarketDataWarning, OrderService, PlaceOutcome, Snapshot,
    SNAPSHOT_TRADE_LIMIT,
};
pub use validator::OrderValidator;
