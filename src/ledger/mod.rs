//! Ledger persistence contract and the per-user serialization around it.

pub mod locks;
pub mod retry;
pub mod traits;

pub use locks::UserLocks;
pub use retry::with_store_retry;
pub use traits::{CancelSet, FillSet, LedgerStore, OrderStatusCounts, PlacementSet};
