use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::domain::{NewTrade, Order, OrderSide, OrderType, Position, TradingConfig, User};
use crate::ledger::FillSet;

/// Why a fill attempt left the order PENDING
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Deferral {
    /// Price source failed or timed out
    PriceUnavailable,
    /// LIMIT order whose price condition is not met yet
    LimitNotReached { limit: Decimal, current: Decimal },
    /// BUY whose cost at the current price exceeds the user's cash
    InsufficientCash { required: Decimal, available: Decimal },
    /// SELL whose holding was reduced since placement
    InsufficientPosition { required: i64, available: i64 },
    /// Fill amounts do not fit in a `Decimal`
    AmountOutOfRange,
    /// Fill could not be recorded; the next sweep retries it
    StoreUnavailable,
    /// Order already left PENDING
    NotPending,
}

impl fmt::Display for Deferral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferral::PriceUnavailable => write!(f, "price unavailable"),
            Deferral::LimitNotReached { limit, current } => {
                write!(f, "limit {limit} not reached (current {current})")
            }
            Deferral::InsufficientCash {
                required,
                available,
            } => write!(f, "insufficient cash at fill: need {required}, have {available}"),
            Deferral::InsufficientPosition {
                required,
                available,
            } => write!(f, "insufficient position at fill: need {required}, have {available}"),
            Deferral::AmountOutOfRange => write!(f, "fill amount out of range"),
            Deferral::StoreUnavailable => write!(f, "fill not recorded, will retry"),
            Deferral::NotPending => write!(f, "order no longer pending"),
        }
    }
}

/// Result of one fill attempt
#[derive(Debug, Clone)]
pub enum FillOutcome {
    Filled(Box<FillSet>),
    StillPending(Deferral),
}

impl FillOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, FillOutcome::Filled(_))
    }
}

/// Matches orders against a current price and plans the resulting ledger
/// mutation. Whole-order fills only.
#[derive(Debug, Clone)]
pub struct OrderExecutor {
    config: TradingConfig,
}

impl OrderExecutor {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    /// Execution price for `order` at `current_price`, or why it cannot match.
    ///
    /// A matched order always executes at the current price, never the limit.
    pub fn match_price(order: &Order, current_price: Option<Decimal>) -> Result<Decimal, Deferral> {
        let current = current_price.ok_or(Deferral::PriceUnavailable)?;

        match (order.order_type, order.price) {
            (OrderType::Market, _) => Ok(current),
            (OrderType::Limit, Some(limit)) => {
                let crossed = match order.side {
                    OrderSide::Buy => current <= limit,
                    OrderSide::Sell => current >= limit,
                };
                if crossed {
                    Ok(current)
                } else {
                    Err(Deferral::LimitNotReached { limit, current })
                }
            }
            // Rejected at validation; treat like a market order if one slips through
            (OrderType::Limit, None) => Ok(current),
        }
    }

    /// Plan the fill of `order` for `user` at `current_price`.
    ///
    /// `position` is the user's current holding of the order's symbol, if any.
    /// Nothing is mutated here; the returned [`FillSet`] is applied by the
    /// ledger store under the same PENDING check-and-set.
    pub fn attempt_fill(
        &self,
        order: &Order,
        user: &User,
        position: Option<&Position>,
        current_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> FillOutcome {
        if !order.is_pending() {
            return FillOutcome::StillPending(Deferral::NotPending);
        }

        let exec_price = match Self::match_price(order, current_price) {
            Ok(price) => price,
            Err(deferral) => return FillOutcome::StillPending(deferral),
        };

        let quantity = order.quantity;
        let amounts = TradingConfig::notional(exec_price, quantity)
            .and_then(|notional| Some((notional, self.config.commission(notional)?)));
        let Some((notional, commission)) = amounts else {
            return FillOutcome::StillPending(Deferral::AmountOutOfRange);
        };

        let mut holding = position
            .cloned()
            .unwrap_or_else(|| Position::empty(order.user_id, &order.symbol, &order.name, &order.market));

        let (current_cash_after, frozen_cash_after) = match order.side {
            OrderSide::Buy => {
                let Some(cost) = notional.checked_add(commission) else {
                    return FillOutcome::StillPending(Deferral::AmountOutOfRange);
                };
                if cost > user.current_cash {
                    return FillOutcome::StillPending(Deferral::InsufficientCash {
                        required: cost,
                        available: user.current_cash,
                    });
                }

                let Some(avg_cost) =
                    TradingConfig::average_cost(holding.avg_cost, holding.quantity, notional, quantity)
                else {
                    return FillOutcome::StillPending(Deferral::AmountOutOfRange);
                };
                holding.avg_cost = avg_cost;
                holding.quantity += quantity;
                holding.available_quantity += quantity;

                (
                    user.current_cash - cost,
                    (user.frozen_cash - order.frozen_amount).max(Decimal::ZERO),
                )
            }
            OrderSide::Sell => {
                if holding.available_quantity < quantity || holding.quantity < quantity {
                    return FillOutcome::StillPending(Deferral::InsufficientPosition {
                        required: quantity,
                        available: holding.available_quantity,
                    });
                }

                let Some(cash_after) = user
                    .current_cash
                    .checked_add(notional)
                    .and_then(|cash| cash.checked_sub(commission))
                else {
                    return FillOutcome::StillPending(Deferral::AmountOutOfRange);
                };

                holding.quantity -= quantity;
                holding.available_quantity -= quantity;

                (cash_after, user.frozen_cash)
            }
        };

        FillOutcome::Filled(Box::new(FillSet {
            order_id: order.id,
            user_id: order.user_id,
            current_cash_after,
            frozen_cash_after,
            position: holding,
            trade: NewTrade {
                order_id: order.id,
                user_id: order.user_id,
                symbol: order.symbol.clone(),
                name: order.name.clone(),
                market: order.market.clone(),
                side: order.side,
                price: exec_price,
                quantity,
                commission,
                trade_time: now,
            },
        }))
    }

    /// Cash to release when cancelling `order`.
    ///
    /// The estimate is recomputed with the cancel-time reference price. With no
    /// usable price, the amount frozen at placement is released instead.
    pub fn cancel_release(&self, order: &Order, market_price: Option<Decimal>) -> Decimal {
        if order.side == OrderSide::Sell {
            return Decimal::ZERO;
        }
        TradingConfig::reference_price(order.price, market_price)
            .and_then(|ref_price| self.config.freeze_estimate(ref_price, order.quantity))
            .unwrap_or(order.frozen_amount)
    }
}
