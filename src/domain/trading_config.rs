//! Static per-market trading rules and the fee/freeze arithmetic built on them.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Trading rules for one market. Read-only at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    /// The single supported market code (e.g. "US")
    #[serde(default = "default_market")]
    pub market: String,
    /// Commission as a fraction of notional (e.g. 0.005 = 0.5%)
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,
    /// Floor applied to every commission
    #[serde(default = "default_min_commission")]
    pub min_commission: Decimal,
    /// Quantity must be a multiple of this
    #[serde(default = "default_lot_size")]
    pub lot_size: i64,
    #[serde(default = "default_min_order_quantity")]
    pub min_order_quantity: i64,
    /// Starting cash for users bootstrapped without an explicit amount
    #[serde(default = "default_initial_capital")]
    pub default_initial_capital: Decimal,
}

fn default_market() -> String {
    "US".to_string()
}

fn default_commission_rate() -> Decimal {
    dec!(0.005)
}

fn default_min_commission() -> Decimal {
    dec!(1.00)
}

fn default_lot_size() -> i64 {
    1
}

fn default_min_order_quantity() -> i64 {
    1
}

fn default_initial_capital() -> Decimal {
    dec!(100000)
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            market: default_market(),
            commission_rate: default_commission_rate(),
            min_commission: default_min_commission(),
            lot_size: default_lot_size(),
            min_order_quantity: default_min_order_quantity(),
            default_initial_capital: default_initial_capital(),
        }
    }
}

impl TradingConfig {
    /// price * quantity, or `None` when it does not fit in a `Decimal`
    pub fn notional(price: Decimal, quantity: i64) -> Option<Decimal> {
        price.checked_mul(Decimal::from(quantity))
    }

    /// commission = max(rate * notional, minimum fee), rounded up to 4 places
    pub fn commission(&self, notional: Decimal) -> Option<Decimal> {
        notional.checked_mul(self.commission_rate).map(|fee| {
            fee.round_dp_with_strategy(4, RoundingStrategy::AwayFromZero)
                .max(self.min_commission)
        })
    }

    /// Weighted average cost after adding `quantity` shares costing `notional`
    pub fn average_cost(
        old_avg_cost: Decimal,
        old_quantity: i64,
        notional: Decimal,
        quantity: i64,
    ) -> Option<Decimal> {
        let total_quantity = old_quantity.checked_add(quantity)?;
        if total_quantity <= 0 {
            return Some(Decimal::ZERO);
        }
        let total_cost = Self::notional(old_avg_cost, old_quantity)?.checked_add(notional)?;
        total_cost
            .checked_div(Decimal::from(total_quantity))
            .map(|avg| avg.round_dp(6))
    }

    /// Price used to size a BUY reservation: the lower of limit and market
    /// price when both are known, otherwise whichever is known.
    pub fn reference_price(
        limit_price: Option<Decimal>,
        market_price: Option<Decimal>,
    ) -> Option<Decimal> {
        match (limit_price, market_price) {
            (Some(limit), Some(market)) => Some(limit.min(market)),
            (Some(limit), None) => Some(limit),
            (None, Some(market)) => Some(market),
            (None, None) => None,
        }
    }

    /// Cash reserved against a BUY: ref_price * qty plus its commission.
    /// `None` when the amount is out of range.
    pub fn freeze_estimate(&self, ref_price: Decimal, quantity: i64) -> Option<Decimal> {
        let notional = Self::notional(ref_price, quantity)?;
        notional.checked_add(self.commission(notional)?)
    }

    pub fn is_supported_market(&self, market: &str) -> bool {
        market.trim().eq_ignore_ascii_case(&self.market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commission_respects_minimum() {
        let cfg = TradingConfig::default();
        assert_eq!(cfg.commission(dec!(1880)), Some(dec!(9.40)));
        assert_eq!(cfg.commission(dec!(50)), Some(dec!(1.00)));
        assert_eq!(cfg.commission(dec!(200)), Some(dec!(1.00)));
        // 0.005 * 1234.5678 = 6.172839, rounded up
        assert_eq!(cfg.commission(dec!(1234.5678)), Some(dec!(6.1729)));
    }

    #[test]
    fn test_average_cost_is_weighted() {
        assert_eq!(TradingConfig::average_cost(dec!(0), 0, dec!(1880), 10), Some(dec!(188)));
        // 10 @ 188 + 10 @ 192 -> 190
        assert_eq!(TradingConfig::average_cost(dec!(188), 10, dec!(1920), 10), Some(dec!(190)));
        assert_eq!(TradingConfig::average_cost(dec!(100), 0, dec!(0), 0), Some(dec!(0)));
        assert_eq!(TradingConfig::average_cost(Decimal::MAX, 10, dec!(1), 1), None);
    }

    #[test]
    fn test_reference_price_prefers_lower() {
        assert_eq!(
            TradingConfig::reference_price(Some(dec!(190)), Some(dec!(188))),
            Some(dec!(188))
        );
        assert_eq!(
            TradingConfig::reference_price(Some(dec!(185)), Some(dec!(188))),
            Some(dec!(185))
        );
        assert_eq!(TradingConfig::reference_price(None, Some(dec!(188))), Some(dec!(188)));
        assert_eq!(TradingConfig::reference_price(None, None), None);
    }

    #[test]
    fn test_freeze_estimate() {
        let cfg = TradingConfig::default();
        // 188 * 10 = 1880, commission 9.40
        assert_eq!(cfg.freeze_estimate(dec!(188), 10), Some(dec!(1889.40)));
    }

    #[test]
    fn test_out_of_range_amounts_do_not_panic() {
        let cfg = TradingConfig::default();
        assert_eq!(TradingConfig::notional(Decimal::MAX, 10), None);
        assert_eq!(cfg.freeze_estimate(Decimal::MAX, 10), None);
        assert!(cfg.freeze_estimate(dec!(190), i64::MAX).is_some());
        // Fits on its own, but the commission pushes it over
        assert_eq!(cfg.freeze_estimate(Decimal::MAX, 1), None);
    }

    #[test]
    fn test_supported_market_is_case_insensitive() {
        let cfg = TradingConfig::default();
        assert!(cfg.is_supported_market("us"));
        assert!(!cfg.is_supported_market("HK"));
    }
}
