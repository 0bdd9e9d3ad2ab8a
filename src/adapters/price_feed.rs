//! Market price sources.
//!
//! The engine only sees [`PriceSource`]: a symbol goes in, a decimal price or
//! an error comes out. [`PriceCache`] wraps a source with a bounded timeout and
//! remembers the last price seen per symbol.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{PriceFeedConfig, PriceSourceKind};
use crate::error::{Result, SimError};

const YAHOO_API_URL: &str = "https://query1.finance.yahoo.com";

/// Latest trade price lookup
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn last_price(&self, symbol: &str, market: &str) -> Result<Decimal>;

    fn name(&self) -> &'static str;
}

/// Build the configured price source
pub fn build_price_source(config: &PriceFeedConfig) -> Result<Arc<dyn PriceSource>> {
    match config.source {
        PriceSourceKind::Static => {
            let feed = StaticPriceFeed::with_demo_prices();
            for (symbol, price) in &config.static_prices {
                feed.set_price(symbol, *price);
            }
            Ok(Arc::new(feed))
        }
        PriceSourceKind::Yahoo => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| YAHOO_API_URL.to_string());
            Ok(Arc::new(YahooQuoteClient::new(
                base_url,
                Duration::from_millis(config.timeout_ms),
            )?))
        }
    }
}

/// Fixed price table. Symbols not in the table have no price.
#[derive(Debug, Default)]
pub struct StaticPriceFeed {
    prices: DashMap<String, Decimal>,
}

impl StaticPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with a handful of large-cap US names
    pub fn with_demo_prices() -> Self {
        let feed = Self::new();
        for (symbol, price) in [
            ("AAPL", dec!(190)),
            ("TSLA", dec!(250)),
            ("MSFT", dec!(420)),
            ("GOOGL", dec!(140)),
            ("AMZN", dec!(155)),
            ("NVDA", dec!(875)),
            ("META", dec!(485)),
        ] {
            feed.set_price(symbol, price);
        }
        feed
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.insert(symbol.trim().to_ascii_uppercase(), price);
    }

    pub fn remove_price(&self, symbol: &str) {
        self.prices.remove(&symbol.trim().to_ascii_uppercase());
    }
}

#[async_trait]
impl PriceSource for StaticPriceFeed {
    async fn last_price(&self, symbol: &str, _market: &str) -> Result<Decimal> {
        self.prices
            .get(&symbol.trim().to_ascii_uppercase())
            .map(|p| *p)
            .ok_or_else(|| SimError::PriceUnavailable(format!("no price for {symbol}")))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
}

/// Yahoo Finance chart endpoint client
#[derive(Clone)]
pub struct YahooQuoteClient {
    client: reqwest::Client,
    base_url: String,
}

impl YahooQuoteClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (simtrade)")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for YahooQuoteClient {
    async fn last_price(&self, symbol: &str, _market: &str) -> Result<Decimal> {
        let url = format!(
            "{}/v8/finance/chart/{}?interval=1d&range=1d",
            self.base_url,
            symbol.trim().to_ascii_uppercase()
        );
        debug!("Fetching quote: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SimError::PriceUnavailable(format!(
                "quote API error for {}: {}",
                symbol,
                response.status()
            )));
        }

        let body: ChartResponse = response.json().await?;
        let meta = body
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
            .map(|r| r.meta)
            .ok_or_else(|| SimError::PriceUnavailable(format!("empty quote for {symbol}")))?;

        // Prefer the live price, then the previous close
        let raw = meta
            .regular_market_price
            .or(meta.chart_previous_close)
            .or(meta.previous_close)
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| SimError::PriceUnavailable(format!("no price field for {symbol}")))?;

        Decimal::try_from(raw)
            .map(|p| p.round_dp(4))
            .map_err(|e| SimError::PriceUnavailable(format!("bad price for {symbol}: {e}")))
    }

    fn name(&self) -> &'static str {
        "yahoo"
    }
}

/// Last successfully fetched price for a symbol
#[derive(Debug, Clone, Copy)]
pub struct CachedPrice {
    pub price: Decimal,
    pub fetched_at: DateTime<Utc>,
}

/// Price source wrapper: bounded lookups plus a last-known price per symbol.
///
/// A timeout is reported as `PriceUnavailable`, the same as any other fetch
/// failure.
pub struct PriceCache {
    source: Arc<dyn PriceSource>,
    timeout: Duration,
    last_seen: DashMap<String, CachedPrice>,
}

impl PriceCache {
    pub fn new(source: Arc<dyn PriceSource>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            last_seen: DashMap::new(),
        }
    }

    /// Fetch the current price, recording it on success
    pub async fn fetch(&self, symbol: &str, market: &str) -> Result<Decimal> {
        let key = symbol.trim().to_ascii_uppercase();
        let lookup = self.source.last_price(&key, market);

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(price)) => {
                self.last_seen.insert(
                    key,
                    CachedPrice {
                        price,
                        fetched_at: Utc::now(),
                    },
                );
                Ok(price)
            }
            Ok(Err(e)) => {
                debug!("{} price lookup for {} failed: {}", self.source.name(), key, e);
                Err(match e {
                    SimError::PriceUnavailable(_) => e,
                    other => SimError::PriceUnavailable(format!("{key}: {other}")),
                })
            }
            Err(_) => {
                warn!(
                    "{} price lookup for {} timed out after {:?}",
                    self.source.name(),
                    key,
                    self.timeout
                );
                Err(SimError::PriceUnavailable(format!("{key}: timed out")))
            }
        }
    }

    /// Last price seen for `symbol`, if any
    pub fn last_known(&self, symbol: &str) -> Option<Decimal> {
        self.last_seen
            .get(&symbol.trim().to_ascii_uppercase())
            .map(|c| c.price)
    }

    pub fn cached(&self, symbol: &str) -> Option<CachedPrice> {
        self.last_seen
            .get(&symbol.trim().to_ascii_uppercase())
            .map(|c| *c)
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }
}
