use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::{NewOrder, OrderRequest, OrderSide, OrderType, Position, TradingConfig, User};
use crate::error::RejectReason;
use crate::ledger::PlacementSet;

/// Pre-trade checks for incoming order requests.
///
/// Validation is pure: it sees the user's balances and position as read under
/// the user's lock and returns the placement to persist, including the cash
/// to freeze for a BUY. Checking and freezing therefore happen in one step.
#[derive(Debug, Clone)]
pub struct OrderValidator {
    config: TradingConfig,
}

impl OrderValidator {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    /// Validate `request` for `user` and plan its placement.
    ///
    /// `market_price` is the freshest price known for the symbol, if any.
    /// Checks run in order: market, symbol, quantity, price, then funds
    /// (BUY) or position (SELL).
    pub fn validate(
        &self,
        user: &User,
        position: Option<&Position>,
        request: &OrderRequest,
        market_price: Option<Decimal>,
    ) -> Result<PlacementSet, RejectReason> {
        self.check_market(&request.market)?;

        if request.symbol.trim().is_empty() {
            return Err(RejectReason::UnknownSymbol);
        }

        self.check_quantity(request.quantity)?;

        let limit_price = match request.order_type {
            OrderType::Limit => match request.price {
                Some(price) if price > Decimal::ZERO => Some(price),
                _ => return Err(RejectReason::InvalidPrice),
            },
            OrderType::Market => None,
        };

        let mut normalized = request.clone();
        normalized.price = limit_price;

        match request.side {
            OrderSide::Buy => {
                let available = user.available_cash();
                let ref_price = TradingConfig::reference_price(limit_price, market_price)
                    .ok_or(RejectReason::InsufficientFunds {
                        required: None,
                        available,
                    })?;

                // An estimate out of Decimal range can never be covered
                let estimate = self
                    .config
                    .freeze_estimate(ref_price, request.quantity)
                    .ok_or(RejectReason::InsufficientFunds {
                        required: None,
                        available,
                    })?;
                if estimate > available {
                    return Err(RejectReason::InsufficientFunds {
                        required: Some(estimate),
                        available,
                    });
                }

                debug!(
                    "Freezing {} for BUY {} x {} (ref price {})",
                    estimate, request.quantity, request.symbol, ref_price
                );
                Ok(PlacementSet {
                    order: NewOrder::from_request(user.id, &normalized, estimate),
                    frozen_cash_after: user.frozen_cash.saturating_add(estimate),
                })
            }
            OrderSide::Sell => {
                let available = position.map_or(0, |p| p.available_quantity);
                if available < request.quantity {
                    return Err(RejectReason::InsufficientPosition {
                        required: request.quantity,
                        available,
                    });
                }

                Ok(PlacementSet {
                    order: NewOrder::from_request(user.id, &normalized, Decimal::ZERO),
                    frozen_cash_after: user.frozen_cash,
                })
            }
        }
    }

    fn check_market(&self, market: &str) -> Result<(), RejectReason> {
        if self.config.is_supported_market(market) {
            Ok(())
        } else {
            Err(RejectReason::UnsupportedMarket {
                market: market.trim().to_string(),
                supported: self.config.market.clone(),
            })
        }
    }

    fn check_quantity(&self, quantity: i64) -> Result<(), RejectReason> {
        let lot_size = self.config.lot_size.max(1);
        let min = self.config.min_order_quantity.max(1);
        if quantity < min || quantity % lot_size != 0 {
            return Err(RejectReason::InvalidQuantity {
                quantity,
                min,
                lot_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn user(current: Decimal, frozen: Decimal) -> User {
        User {
            id: 1,
            username: "demo".into(),
            initial_cash: dec!(100000),
            current_cash: current,
            frozen_cash: frozen,
            created_at: Utc::now(),
        }
    }

    fn position(quantity: i64, available: i64) -> Position {
        let mut p = Position::empty(1, "AAPL", "AAPL", "US");
        p.quantity = quantity;
        p.available_quantity = available;
        p.avg_cost = dec!(188);
        p
    }

    fn validator() -> OrderValidator {
        OrderValidator::new(TradingConfig::default())
    }

    #[test]
    fn test_buy_freezes_estimate_from_lower_price() {
        let request = OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(190));
        let placement = validator()
            .validate(&user(dec!(100000), dec!(0)), None, &request, Some(dec!(188)))
            .unwrap();

        assert_eq!(placement.order.frozen_amount, dec!(1889.40));
        assert_eq!(placement.frozen_cash_after, dec!(1889.40));
        assert_eq!(placement.order.price, Some(dec!(190)));
    }

    #[test]
    fn test_checks_run_in_order() {
        let v = validator();
        let u = user(dec!(10), dec!(0));

        // Bad market wins over bad quantity and funds
        let mut request = OrderRequest::limit("AAPL", OrderSide::Buy, 0, dec!(190));
        request.market = "HK".into();
        assert!(matches!(
            v.validate(&u, None, &request, None),
            Err(RejectReason::UnsupportedMarket { .. })
        ));

        request.market = "US".into();
        assert!(matches!(
            v.validate(&u, None, &request, None),
            Err(RejectReason::InvalidQuantity { quantity: 0, .. })
        ));

        request.quantity = 10;
        assert!(matches!(
            v.validate(&u, None, &request, None),
            Err(RejectReason::InsufficientFunds { required: Some(_), .. })
        ));
    }

    #[test]
    fn test_lot_size_and_minimum_quantity() {
        let v = OrderValidator::new(TradingConfig {
            lot_size: 100,
            min_order_quantity: 100,
            ..TradingConfig::default()
        });
        let u = user(dec!(100000), dec!(0));

        let request = OrderRequest::limit("AAPL", OrderSide::Buy, 150, dec!(1));
        assert!(matches!(
            v.validate(&u, None, &request, None),
            Err(RejectReason::InvalidQuantity { lot_size: 100, .. })
        ));

        let request = OrderRequest::limit("AAPL", OrderSide::Buy, 200, dec!(1));
        assert!(v.validate(&u, None, &request, None).is_ok());
    }

    #[test]
    fn test_limit_requires_positive_price() {
        let mut request = OrderRequest::limit("AAPL", OrderSide::Buy, 1, dec!(0));
        let u = user(dec!(1000), dec!(0));
        assert_eq!(
            validator().validate(&u, None, &request, Some(dec!(10))).unwrap_err(),
            RejectReason::InvalidPrice
        );

        request.price = None;
        assert_eq!(
            validator().validate(&u, None, &request, Some(dec!(10))).unwrap_err(),
            RejectReason::InvalidPrice
        );
    }

    #[test]
    fn test_frozen_cash_reduces_buying_power() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, 10);
        let err = validator()
            .validate(&user(dec!(2000), dec!(500)), None, &request, Some(dec!(188)))
            .unwrap_err();
        assert_eq!(
            err,
            RejectReason::InsufficientFunds {
                required: Some(dec!(1889.40)),
                available: dec!(1500),
            }
        );
    }

    #[test]
    fn test_market_buy_without_any_price_is_rejected() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, 1);
        let err = validator()
            .validate(&user(dec!(100000), dec!(0)), None, &request, None)
            .unwrap_err();
        assert!(matches!(err, RejectReason::InsufficientFunds { required: None, .. }));
    }

    #[test]
    fn test_huge_limit_price_is_rejected_not_overflowed() {
        let request = OrderRequest::limit("ZZZZ", OrderSide::Buy, 10, Decimal::MAX);
        let err = validator()
            .validate(&user(dec!(100000), dec!(0)), None, &request, None)
            .unwrap_err();
        assert_eq!(
            err,
            RejectReason::InsufficientFunds {
                required: None,
                available: dec!(100000),
            }
        );

        let request = OrderRequest::limit("ZZZZ", OrderSide::Buy, i64::MAX, dec!(10000000000));
        assert!(matches!(
            validator().validate(&user(dec!(100000), dec!(0)), None, &request, None),
            Err(RejectReason::InsufficientFunds { required: None, .. })
        ));
    }

    #[test]
    fn test_sell_requires_available_quantity() {
        let request = OrderRequest::limit("AAPL", OrderSide::Sell, 10, dec!(195));
        let u = user(dec!(0), dec!(0));

        assert_eq!(
            validator().validate(&u, None, &request, None).unwrap_err(),
            RejectReason::InsufficientPosition {
                required: 10,
                available: 0
            }
        );
        assert!(validator()
            .validate(&u, Some(&position(10, 5)), &request, None)
            .is_err());

        let placement = validator()
            .validate(&u, Some(&position(10, 10)), &request, None)
            .unwrap();
        assert_eq!(placement.order.frozen_amount, dec!(0));
        assert_eq!(placement.frozen_cash_after, dec!(0));
    }
}
