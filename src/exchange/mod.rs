use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outcome::Direction;

pub mod paper;
pub mod retry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            OrderSide::Buy => Direction::Long,
            OrderSide::Sell => Direction::Short,
        }
    }

    pub fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub amount: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: OrderSide,
    pub amount: f64,
    pub entry_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub order_id: Option<String>,
    pub pnl: f64,
    pub closed_ms: u64,
}

/// Venue-reported failure. `code` is whatever the venue uses (e.g. Binance
/// `-2019` for insufficient margin).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("exchange error {}: {msg}", .code.map_or_else(|| "-".to_string(), |c| c.to_string()))]
pub struct ExchangeError {
    pub code: Option<i64>,
    pub msg: String,
}

impl ExchangeError {
    pub fn new(code: Option<i64>, msg: impl Into<String>) -> Self {
        Self { code, msg: msg.into() }
    }
}

/// The venue as seen by the engine. Implementations own their own timeouts.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn validate_symbol(&self, symbol: &str) -> Result<bool>;
    async fn get_latest_price(&self, symbol: &str) -> Result<f64>;
    /// Free quote balance.
    async fn get_account_balance(&self) -> Result<f64>;
    /// Returns the venue order id.
    async fn place_order(&self, req: &OrderRequest) -> Result<String>;
    async fn get_positions(&self, symbol: &str) -> Result<Vec<Position>>;
    async fn get_closed_trades(&self, symbol: &str, since_ms: u64) -> Result<Vec<ClosedTrade>>;
}
