pub mod account;
pub mod order;
pub mod trading_config;

pub use account::*;
pub use order::*;
pub use trading_config::*;
