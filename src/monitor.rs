//! Per-trade outcome monitor.
//!
//! One detached task per placed order polls the venue until the position is
//! gone, the lifetime runs out, or shutdown is signalled on the watch channel.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

use crate::exchange::retry::{retry_async, RetryConfig};
use crate::exchange::Exchange;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TradeOutcome {
    /// Position closed. `pnl` is `None` when the venue had no matching record.
    Closed { pnl: Option<f64> },
    TimedOut,
    Cancelled,
    Failed { error: String },
}

impl TradeOutcome {
    pub fn describe(&self) -> String {
        match self {
            TradeOutcome::Closed { pnl: Some(pnl) } => format!("closed, pnl {:.4}", pnl),
            TradeOutcome::Closed { pnl: None } => "closed, pnl unknown".to_string(),
            TradeOutcome::TimedOut => "monitor timed out".to_string(),
            TradeOutcome::Cancelled => "monitor cancelled".to_string(),
            TradeOutcome::Failed { error } => format!("monitor failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeReport {
    pub symbol: String,
    pub order_id: String,
    pub opened_ms: u64,
    pub outcome: TradeOutcome,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll: Duration,
    pub max_lifetime: Duration,
    pub retry: RetryConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(4 * 3600),
            retry: RetryConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn new(poll_secs: u64, max_secs: u64) -> Self {
        Self {
            poll: Duration::from_secs(poll_secs.max(1)),
            max_lifetime: Duration::from_secs(max_secs.max(1)),
            ..Default::default()
        }
    }
}

enum Step {
    Cancel,
    Deadline,
    Poll,
}

/// Watch one trade to completion. Never panics; every exit is a `TradeOutcome`.
pub async fn watch_trade(
    exchange: Arc<dyn Exchange>,
    symbol: String,
    order_id: String,
    opened_ms: u64,
    cfg: MonitorConfig,
    mut cancel: watch::Receiver<bool>,
) -> TradeReport {
    log(
        Level::Debug,
        Domain::Monitor,
        "monitor_start",
        obj(&[
            ("symbol", v_str(&symbol)),
            ("order_id", v_str(&order_id)),
            ("max_secs", v_num(cfg.max_lifetime.as_secs_f64())),
        ]),
    );

    let deadline = sleep(cfg.max_lifetime);
    tokio::pin!(deadline);
    let mut ticker = interval(cfg.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        if *cancel.borrow() {
            break TradeOutcome::Cancelled;
        }
        let step = tokio::select! {
            biased;
            changed = cancel.changed() => match changed {
                // Sender gone means the engine is gone.
                Err(_) => Step::Cancel,
                Ok(()) => continue,
            },
            _ = &mut deadline => Step::Deadline,
            _ = ticker.tick() => Step::Poll,
        };
        match step {
            Step::Cancel => break TradeOutcome::Cancelled,
            Step::Deadline => break TradeOutcome::TimedOut,
            Step::Poll => match poll_once(exchange.as_ref(), &symbol, &order_id, opened_ms, &cfg.retry).await {
                Ok(Some(outcome)) => break outcome,
                Ok(None) => {}
                Err(err) => break TradeOutcome::Failed { error: format!("{:#}", err) },
            },
        }
    };

    let level = match outcome {
        TradeOutcome::Failed { .. } => Level::Warn,
        _ => Level::Info,
    };
    log(
        level,
        Domain::Monitor,
        "monitor_done",
        obj(&[
            ("symbol", v_str(&symbol)),
            ("order_id", v_str(&order_id)),
            ("outcome", v_str(&outcome.describe())),
        ]),
    );
    TradeReport { symbol, order_id, opened_ms, outcome }
}

/// `Ok(None)` while the position is still open.
async fn poll_once(
    exchange: &dyn Exchange,
    symbol: &str,
    order_id: &str,
    opened_ms: u64,
    retry: &RetryConfig,
) -> anyhow::Result<Option<TradeOutcome>> {
    let positions = retry_async(retry, "get_positions", || exchange.get_positions(symbol)).await?;
    if positions.iter().any(|p| p.amount > 0.0) {
        return Ok(None);
    }
    let closed = retry_async(retry, "get_closed_trades", || exchange.get_closed_trades(symbol, opened_ms)).await?;
    let pnl = closed
        .iter()
        .rev()
        .find(|t| t.order_id.as_deref() == Some(order_id))
        .or_else(|| closed.iter().filter(|t| t.order_id.is_none()).last())
        .map(|t| t.pnl)
        .filter(|p| p.is_finite());
    Ok(Some(TradeOutcome::Closed { pnl }))
}

/// Run `watch_trade` and forward its report.
pub async fn run_and_report(
    exchange: Arc<dyn Exchange>,
    symbol: String,
    order_id: String,
    opened_ms: u64,
    cfg: MonitorConfig,
    cancel: watch::Receiver<bool>,
    reports: mpsc::UnboundedSender<TradeReport>,
) -> TradeReport {
    let report = watch_trade(exchange, symbol, order_id, opened_ms, cfg, cancel).await;
    // Receiver may already be gone during shutdown.
    let _ = reports.send(report.clone());
    report
}
