use serde::{Deserialize, Serialize};

use crate::outcome::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Buy,
    Sell,
    Hold,
}

impl SignalDirection {
    /// `None` for hold.
    pub fn direction(self) -> Option<Direction> {
        match self {
            SignalDirection::Buy => Some(Direction::Long),
            SignalDirection::Sell => Some(Direction::Short),
            SignalDirection::Hold => None,
        }
    }
}

/// A trading signal from the strategy layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: SignalDirection,
    /// 0..=100
    pub confidence: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub trailing_distance: Option<f64>,
}

impl Signal {
    pub fn new(symbol: &str, direction: SignalDirection, confidence: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction,
            confidence,
            stop_loss: None,
            take_profit: None,
            trailing_distance: None,
        }
    }

    pub fn with_stops(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }
}
