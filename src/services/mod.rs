pub mod order_sweeper;

pub use order_sweeper::{OrderSweeper, SweepReport, SweepStats};
