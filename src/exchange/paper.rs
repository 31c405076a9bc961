use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{ClosedTrade, Exchange, ExchangeError, OrderRequest, Position};

/// In-memory venue: fixed prices, a quote balance, and scripted failures.
///
/// Orders fill instantly at the current price and open a position; the
/// position stays open until [`PaperExchange::close_position`] is called.
#[derive(Debug, Default)]
pub struct PaperExchange {
    inner: Mutex<PaperState>,
}

#[derive(Debug, Default)]
struct PaperState {
    prices: HashMap<String, f64>,
    balance: f64,
    positions: HashMap<String, (String, Position)>,
    closed: Vec<ClosedTrade>,
    order_failures: VecDeque<ExchangeError>,
    placed: Vec<(String, OrderRequest)>,
    next_id: u64,
}

impl PaperExchange {
    pub fn new(balance: f64) -> Self {
        Self {
            inner: Mutex::new(PaperState { balance, ..Default::default() }),
        }
    }

    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.set_price(symbol, price);
        self
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.lock().prices.insert(symbol.to_string(), price);
    }

    /// The next `place_order` fails with `err` instead of filling.
    pub fn fail_next_order(&self, err: ExchangeError) {
        self.lock().order_failures.push_back(err);
    }

    pub fn placed_orders(&self) -> Vec<(String, OrderRequest)> {
        self.lock().placed.clone()
    }

    pub fn open_positions(&self) -> usize {
        self.lock().positions.len()
    }

    /// Close the open position on `symbol`, booking `pnl` to the balance.
    pub fn close_position(&self, symbol: &str, pnl: f64, closed_ms: u64) -> bool {
        let mut state = self.lock();
        let Some((order_id, _)) = state.positions.remove(symbol) else {
            return false;
        };
        state.balance += pnl;
        state.closed.push(ClosedTrade {
            symbol: symbol.to_string(),
            order_id: Some(order_id),
            pnl,
            closed_ms,
        });
        true
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn validate_symbol(&self, symbol: &str) -> Result<bool> {
        Ok(self.lock().prices.contains_key(symbol))
    }

    async fn get_latest_price(&self, symbol: &str) -> Result<f64> {
        self.lock()
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!(ExchangeError::new(None, format!("no price for {}", symbol))))
    }

    async fn get_account_balance(&self) -> Result<f64> {
        Ok(self.lock().balance)
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<String> {
        let mut state = self.lock();
        if let Some(err) = state.order_failures.pop_front() {
            return Err(err.into());
        }
        let price = state
            .prices
            .get(&req.symbol)
            .copied()
            .ok_or_else(|| ExchangeError::new(None, format!("unknown symbol {}", req.symbol)))?;
        state.next_id += 1;
        let order_id = format!("paper-{}", state.next_id);
        state.positions.insert(
            req.symbol.clone(),
            (
                order_id.clone(),
                Position {
                    symbol: req.symbol.clone(),
                    side: req.side,
                    amount: req.amount,
                    entry_price: price,
                },
            ),
        );
        state.placed.push((order_id.clone(), req.clone()));
        Ok(order_id)
    }

    async fn get_positions(&self, symbol: &str) -> Result<Vec<Position>> {
        Ok(self
            .lock()
            .positions
            .get(symbol)
            .map(|(_, p)| vec![p.clone()])
            .unwrap_or_default())
    }

    async fn get_closed_trades(&self, symbol: &str, since_ms: u64) -> Result<Vec<ClosedTrade>> {
        Ok(self
            .lock()
            .closed
            .iter()
            .filter(|t| t.symbol == symbol && t.closed_ms >= since_ms)
            .cloned()
            .collect())
    }
}
