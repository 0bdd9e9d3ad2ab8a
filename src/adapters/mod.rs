pub mod memory;
pub mod postgres;
pub mod price_feed;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use price_feed::{
    build_price_source, CachedPrice, PriceCache, PriceSource, StaticPriceFeed, YahooQuoteClient,
};
