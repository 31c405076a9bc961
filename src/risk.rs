use serde::Serialize;
use thiserror::Error;

use crate::advice::Adjustments;
use crate::exchange::{OrderRequest, OrderSide};
use crate::signal::Signal;
use crate::sizing::{account_fraction_to_price_distance, fixed_notional, levered_balance_pct};
use crate::state::{Config, SizingMode};

/// Final order parameters after sizing and stop capping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPlan {
    pub symbol: String,
    pub side: OrderSide,
    pub amount: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing_distance: Option<f64>,
    /// Fractions of entry price.
    pub sl_distance: f64,
    pub tp_distance: f64,
    pub reward_risk: f64,
    pub confidence: f64,
}

impl OrderPlan {
    pub fn to_request(&self) -> OrderRequest {
        OrderRequest {
            symbol: self.symbol.clone(),
            side: self.side,
            amount: self.amount,
            stop_loss: Some(self.stop_loss),
            take_profit: Some(self.take_profit),
            trailing_distance: self.trailing_distance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeRejection {
    #[error("invalid price {0}")]
    InvalidPrice(f64),
    #[error("confidence {effective:.1} below minimum {min:.1}")]
    LowConfidence { effective: f64, min: f64 },
    #[error("balance unavailable or non-positive")]
    NoBalance,
    #[error("computed amount {0} is not tradable")]
    InvalidAmount(f64),
    #[error("reward:risk {ratio:.2} below 1 (tp {tp_distance:.5}, sl {sl_distance:.5})")]
    RewardRisk { ratio: f64, tp_distance: f64, sl_distance: f64 },
}

pub struct RiskEngine {
    leverage: f64,
    target_account_gain: f64,
    max_account_risk: f64,
    sizing_mode: SizingMode,
    min_signal_confidence: f64,
}

impl RiskEngine {
    pub fn new(cfg: &Config) -> Self {
        Self {
            leverage: cfg.leverage,
            target_account_gain: cfg.target_account_gain,
            max_account_risk: cfg.max_account_risk,
            sizing_mode: cfg.sizing_mode,
            min_signal_confidence: cfg.min_signal_confidence,
        }
    }

    pub fn needs_balance(&self) -> bool {
        matches!(self.sizing_mode, SizingMode::BalancePercent { .. })
    }

    /// Price distance a stop may sit at before one loss costs more than
    /// `max_account_risk` of the account.
    pub fn max_sl_distance(&self) -> f64 {
        account_fraction_to_price_distance(self.max_account_risk, self.leverage)
    }

    pub fn max_tp_distance(&self) -> f64 {
        account_fraction_to_price_distance(self.target_account_gain, self.leverage)
    }

    /// Size the order and place its stops. `side` is the side actually
    /// traded, which is the opposite of the signal's on a reverse.
    pub fn shape(
        &self,
        signal: &Signal,
        side: OrderSide,
        adj: &Adjustments,
        price: f64,
        balance: Option<f64>,
    ) -> Result<OrderPlan, ShapeRejection> {
        if !price.is_finite() || price <= 0.0 {
            return Err(ShapeRejection::InvalidPrice(price));
        }

        let confidence = finite_or(signal.confidence, 0.0) + finite_or(adj.confidence_delta, 0.0);
        let confidence = confidence.clamp(0.0, 100.0);
        if confidence < self.min_signal_confidence {
            return Err(ShapeRejection::LowConfidence { effective: confidence, min: self.min_signal_confidence });
        }

        let max_sl = self.max_sl_distance();
        let max_tp = self.max_tp_distance();
        let sl_distance = (distance(signal.stop_loss, price).unwrap_or(max_sl) * positive_or_one(adj.sl_mult)).min(max_sl);
        let tp_distance = (distance(signal.take_profit, price).unwrap_or(max_tp) * positive_or_one(adj.tp_mult)).min(max_tp);
        let reward_risk = if sl_distance > 0.0 { tp_distance / sl_distance } else { 0.0 };
        if !reward_risk.is_finite() || reward_risk < 1.0 {
            return Err(ShapeRejection::RewardRisk { ratio: finite_or(reward_risk, 0.0), tp_distance, sl_distance });
        }

        let amount = match self.sizing_mode {
            SizingMode::FixedNotional { quote } => fixed_notional(quote, price),
            SizingMode::BalancePercent { pct } => {
                let balance = balance.filter(|b| b.is_finite() && *b > 0.0).ok_or(ShapeRejection::NoBalance)?;
                levered_balance_pct(balance, pct, self.leverage, price)
            }
        };
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ShapeRejection::InvalidAmount(amount));
        }

        let (stop_loss, take_profit) = match side {
            OrderSide::Buy => (price * (1.0 - sl_distance), price * (1.0 + tp_distance)),
            OrderSide::Sell => (price * (1.0 + sl_distance), price * (1.0 - tp_distance)),
        };

        Ok(OrderPlan {
            symbol: signal.symbol.clone(),
            side,
            amount,
            entry_price: price,
            stop_loss,
            take_profit,
            trailing_distance: signal.trailing_distance.filter(|d| d.is_finite() && *d > 0.0),
            sl_distance,
            tp_distance,
            reward_risk,
            confidence,
        })
    }
}

/// |level - price| / price, if the level is usable.
fn distance(level: Option<f64>, price: f64) -> Option<f64> {
    let level = level.filter(|l| l.is_finite() && *l > 0.0)?;
    let d = (level - price).abs() / price;
    (d.is_finite() && d > 0.0).then_some(d)
}

fn finite_or(x: f64, default: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        default
    }
}

fn positive_or_one(x: f64) -> f64 {
    if x.is_finite() && x > 0.0 {
        x
    } else {
        1.0
    }
}
