use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use regimebot::engine::TradingEngine;
use regimebot::exchange::paper::PaperExchange;
use regimebot::logging::{log, obj, v_num, v_str, Domain, Level};
use regimebot::notify::{FanoutNotifier, LogNotifier, WebhookNotifier};
use regimebot::outcome::SimulationUpdate;
use regimebot::signal::Signal;
use regimebot::state::{Config, SystemClock};

/// One line of stdin.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    Simulation { symbol: String, id: String, entry: SimulationUpdate },
    Signal(Signal),
    Remove { symbol: String, id: String },
    Price { symbol: String, price: f64 },
    Prune,
    Stats,
    ResetGuard,
}

/// `PAPER_PRICES=BTC/USDT=65000,ETH/USDT=3200`
fn paper_from_env() -> PaperExchange {
    let balance = std::env::var("PAPER_BALANCE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10_000.0);
    let paper = PaperExchange::new(balance);
    for pair in std::env::var("PAPER_PRICES").unwrap_or_default().split(',') {
        if let Some((symbol, price)) = pair.split_once('=') {
            if let Ok(price) = price.trim().parse::<f64>() {
                paper.set_price(symbol.trim(), price);
            }
        }
    }
    paper
}

async fn handle(engine: &TradingEngine, paper: &PaperExchange, line: &str) -> Result<()> {
    let event: Event = serde_json::from_str(line).context("bad event")?;
    match event {
        Event::Simulation { symbol, id, entry } => {
            engine.record(&symbol, &id, entry)?;
        }
        Event::Signal(signal) => {
            let outcome = engine.execute(&signal).await;
            log(
                Level::Info,
                Domain::System,
                "signal_handled",
                obj(&[("symbol", v_str(&signal.symbol)), ("outcome", v_str(&format!("{:?}", outcome)))]),
            );
        }
        Event::Remove { symbol, id } => {
            engine.remove(&symbol, &id);
        }
        Event::Price { symbol, price } => paper.set_price(&symbol, price),
        Event::Prune => {
            engine.prune_all();
        }
        Event::Stats => {
            let stats = serde_json::to_value(engine.stats())?;
            log(Level::Info, Domain::System, "stats", obj(&[("stats", stats)]));
        }
        Event::ResetGuard => engine.reset_guard(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let paper = Arc::new(paper_from_env());
    let mut fanout = FanoutNotifier::new().with(Arc::new(LogNotifier));
    if let Some(url) = &cfg.notify_webhook {
        fanout = fanout.with(Arc::new(WebhookNotifier::new(url)));
    }

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("exchange", v_str("paper")),
            ("window_hours", v_num(cfg.recency_window_hours)),
            ("max_entries", v_num(cfg.max_entries_per_symbol as f64)),
            ("cooldown_secs", v_num(cfg.cooldown_secs as f64)),
            ("webhook", serde_json::Value::Bool(cfg.notify_webhook.is_some())),
        ]),
    );

    let engine = Arc::new(TradingEngine::new(cfg, paper.clone(), Arc::new(fanout), Arc::new(SystemClock)));
    engine.spawn_pruner();
    let mut reports = engine
        .take_trade_reports()
        .ok_or_else(|| anyhow!("trade report channel already taken"))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    if let Err(err) = handle(&engine, &paper, &line).await {
                        log(Level::Warn, Domain::System, "event_error", obj(&[("error", v_str(&format!("{:#}", err)))]));
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log(Level::Error, Domain::System, "stdin_error", obj(&[("error", v_str(&err.to_string()))]));
                    break;
                }
            },
            Some(report) = reports.recv() => {
                log(
                    Level::Info,
                    Domain::Monitor,
                    "trade_report",
                    obj(&[
                        ("symbol", v_str(&report.symbol)),
                        ("order_id", v_str(&report.order_id)),
                        ("outcome", v_str(&report.outcome.describe())),
                    ]),
                );
            }
            _ = &mut ctrl_c => {
                log(Level::Info, Domain::System, "ctrl_c", obj(&[]));
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
