//! End-to-end scenarios through the public engine API.
//!
//! Time is a ManualClock, the venue is PaperExchange, and alerts land in a
//! MemoryNotifier so every test can assert on what an operator would see.

use std::sync::Arc;

use regimebot::advice::{AdviceAction, AdviceReason};
use regimebot::engine::{ExecutionOutcome, TradingEngine};
use regimebot::exchange::paper::PaperExchange;
use regimebot::exchange::{ExchangeError, OrderSide};
use regimebot::guard::{FailureOutcome, GuardStatus};
use regimebot::notify::{MemoryNotifier, Notification};
use regimebot::outcome::{Direction, EntryError, Outcome, SimulationUpdate};
use regimebot::signal::{Signal, SignalDirection};
use regimebot::state::{Config, ManualClock, HOUR_MS};

const SYM: &str = "BTC/USDT";
const T0: u64 = 1_000 * HOUR_MS;
const MINUTE: u64 = 60_000;

struct Harness {
    engine: TradingEngine,
    paper: Arc<PaperExchange>,
    notes: Arc<MemoryNotifier>,
    clock: ManualClock,
}

fn harness() -> Harness {
    let cfg = Config { monitor_trades: false, ..Config::default() };
    let paper = Arc::new(PaperExchange::new(10_000.0).with_price(SYM, 100.0));
    let notes = Arc::new(MemoryNotifier::new());
    let clock = ManualClock::new(T0);
    let engine = TradingEngine::new(cfg, paper.clone(), notes.clone(), Arc::new(clock.clone()));
    Harness { engine, paper, notes, clock }
}

fn sim(ts_ms: u64, direction: Direction, outcome: Outcome, mfe: f64, mae: f64) -> SimulationUpdate {
    SimulationUpdate::new()
        .ts_ms(ts_ms)
        .direction(direction)
        .outcome(outcome)
        .mfe(mfe)
        .mae(mae)
}

/// Records `outcomes` newest first, one minute apart.
fn record_series(h: &Harness, outcomes: &[Outcome], mfe: f64, mae: f64) {
    for (i, outcome) in outcomes.iter().enumerate() {
        let update = sim(T0 - i as u64 * MINUTE, Direction::Long, *outcome, mfe, mae);
        h.engine.record(SYM, &format!("sim-{i}"), update).unwrap();
    }
}

fn strong_history(h: &Harness) {
    record_series(h, &[Outcome::TakeProfit; 5], 3.0, -0.8);
}

fn buy(confidence: f64) -> Signal {
    Signal::new(SYM, SignalDirection::Buy, confidence)
}

fn funds_error() -> ExchangeError {
    ExchangeError::new(Some(-2019), "Margin is insufficient.")
}

// ---------------------------------------------------------------------------
// Regime aggregation
// ---------------------------------------------------------------------------

#[test]
fn stop_loss_streak_counts_newest_prefix() {
    let h = harness();
    use Outcome::*;
    record_series(&h, &[StopLoss, StopLoss, StopLoss, TakeProfit, TakeProfit], 1.0, -1.0);
    let regime = h.engine.get_regime_lite(SYM).unwrap();
    assert_eq!(regime.sl_streak, 3);
    assert_eq!(regime.outcomes.sl, 3);
    assert_eq!(regime.outcomes.tp, 2);
}

#[test]
fn record_then_get_regime_is_fresh() {
    let h = harness();
    record_series(&h, &[Outcome::TakeProfit; 3], 2.0, -1.0);
    let before = h.engine.get_regime(SYM).unwrap();
    assert_eq!(before.sample_count, 3);

    h.engine
        .record(SYM, "late", sim(T0 + 1, Direction::Short, Outcome::StopLoss, 0.0, -2.0))
        .unwrap();
    let after = h.engine.get_regime(SYM).unwrap();
    assert_eq!(after.sample_count, 4);
    assert_eq!(after.sl_streak, 1);
    assert_eq!(after.short.as_ref().map(|s| s.sample_count), Some(1));
    assert_eq!(after.history.as_ref().unwrap()[0].id, "late");
}

#[test]
fn unknown_symbol_has_no_regime() {
    let h = harness();
    assert!(h.engine.get_regime("ETH/USDT").is_none());
    assert!(h.engine.get_regime_lite("ETH/USDT").is_none());
}

#[test]
fn malformed_entry_leaves_state_untouched() {
    let h = harness();
    record_series(&h, &[Outcome::TakeProfit; 2], 2.0, -1.0);
    let before = h.engine.get_regime(SYM).unwrap();

    let missing_mae = SimulationUpdate::new()
        .ts_ms(T0)
        .direction(Direction::Long)
        .outcome(Outcome::StopLoss)
        .mfe(0.5);
    assert_eq!(h.engine.record(SYM, "bad", missing_mae), Err(EntryError::Missing("mae")));
    assert_eq!(h.engine.get_regime(SYM).unwrap(), before);
}

// ---------------------------------------------------------------------------
// Pruning
// ---------------------------------------------------------------------------

#[test]
fn prune_enforces_window_and_is_idempotent() {
    let h = harness();
    for (i, age_h) in [0u64, 2, 4].iter().enumerate() {
        let update = sim(T0 - age_h * HOUR_MS, Direction::Long, Outcome::TakeProfit, 1.0, -0.5);
        h.engine.record(SYM, &format!("sim-{i}"), update).unwrap();
    }
    h.clock.advance(3 * HOUR_MS);

    let first = h.engine.prune_all();
    assert_eq!(first.entries_dropped, 1);
    let snapshot = h.engine.get_regime(SYM).unwrap();

    let second = h.engine.prune_all();
    assert_eq!(second.entries_dropped, 0);
    assert_eq!(second.symbols_before, second.symbols_after);
    let again = h.engine.get_regime(SYM).unwrap();
    assert_eq!(again.history, snapshot.history);
    assert_eq!(again.version, snapshot.version);

    let window = h.engine.config().window_ms();
    let now = T0 + 3 * HOUR_MS;
    assert!(again.history.unwrap().iter().all(|e| now - e.ts_ms <= window));
}

#[test]
fn prune_removes_symbols_that_aged_out() {
    let h = harness();
    record_series(&h, &[Outcome::Timeout; 2], 0.5, -0.5);
    h.clock.advance(7 * HOUR_MS);
    let report = h.engine.prune_all();
    assert_eq!(report.symbols_before, 1);
    assert_eq!(report.symbols_after, 0);
    assert!(h.engine.get_regime(SYM).is_none());
    assert_eq!(h.engine.stats().symbols, 0);
}

#[test]
fn entry_count_is_capped() {
    let h = harness();
    record_series(&h, &[Outcome::TakeProfit; 7], 1.0, -0.5);
    let regime = h.engine.get_regime(SYM).unwrap();
    assert_eq!(regime.sample_count, 5);
    let ids: Vec<_> = regime.history.unwrap().iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec!["sim-0", "sim-1", "sim-2", "sim-3", "sim-4"]);
}

// ---------------------------------------------------------------------------
// Advice
// ---------------------------------------------------------------------------

#[test]
fn strong_long_profile_is_taken() {
    let h = harness();
    strong_history(&h);
    let regime = h.engine.get_regime_lite(SYM).unwrap();
    assert!((regime.excursion_ratio - 3.75).abs() < 1e-9);

    let advice = h.engine.get_advice(&regime, Direction::Long);
    assert_eq!(advice.action, AdviceAction::Take);
    assert!(advice.adjustments.confidence_delta > 0.0);
    assert!(advice.adjustments.sl_mult > 1.0);
    assert!(advice.adjustments.tp_mult > 1.0);
}

#[test]
fn stop_loss_streak_overrides_reversal() {
    let h = harness();
    use Outcome::*;
    record_series(&h, &[StopLoss, StopLoss, Timeout, Timeout, Timeout], 0.2, -2.0);
    let regime = h.engine.get_regime_lite(SYM).unwrap();
    let advice = h.engine.get_advice(&regime, Direction::Long);
    assert_eq!(advice.action, AdviceAction::Take);
    assert_eq!(advice.reason, AdviceReason::TrendOverride);
    assert!(advice.adjustments.confidence_delta < 0.0);
}

#[tokio::test]
async fn extreme_adverse_without_streak_reverses_the_order() {
    let h = harness();
    record_series(&h, &[Outcome::Timeout; 5], 0.2, -2.0);
    let out = h.engine.execute(&buy(70.0)).await;
    match out {
        ExecutionOutcome::Placed { plan, advice, .. } => {
            assert_eq!(advice.action, AdviceAction::Reverse);
            assert_eq!(plan.side, OrderSide::Sell);
            assert!(plan.stop_loss > plan.entry_price);
        }
        other => panic!("expected a placed reverse order, got {other:?}"),
    }
    assert_eq!(h.paper.placed_orders()[0].1.side, OrderSide::Sell);
}

// ---------------------------------------------------------------------------
// Execution guard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_funds_errors_disable_trading_with_one_alert() {
    let h = harness();
    strong_history(&h);
    let cooldown = h.engine.config().cooldown_ms();

    for expected in 1..=3u32 {
        h.paper.fail_next_order(funds_error());
        let out = h.engine.execute(&buy(70.0)).await;
        let ExecutionOutcome::Failed { failure, .. } = out else {
            panic!("attempt {expected} did not fail: {out:?}");
        };
        if expected < 3 {
            assert_eq!(failure, FailureOutcome::Counted { consecutive: expected });
        } else {
            assert_eq!(failure, FailureOutcome::Tripped);
        }
        h.clock.advance(cooldown);
    }

    let fourth = h.engine.execute(&buy(70.0)).await;
    assert_eq!(fourth, ExecutionOutcome::Blocked(GuardStatus::Disabled));
    assert!(h.paper.placed_orders().is_empty());
    assert_eq!(h.notes.breaker_trips(), 1);
    assert!(!h.engine.guard_state().enabled);

    // Still disabled much later; nothing heals it but an explicit reset.
    h.clock.advance(24 * HOUR_MS);
    assert_eq!(h.engine.execute(&buy(70.0)).await, ExecutionOutcome::Blocked(GuardStatus::Disabled));
    assert_eq!(h.notes.breaker_trips(), 1);

    h.engine.reset_guard();
    h.clock.set(T0);
    strong_history(&h);
    assert!(h.engine.execute(&buy(70.0)).await.is_placed());
}

#[tokio::test]
async fn success_resets_failure_count() {
    let h = harness();
    strong_history(&h);
    let cooldown = h.engine.config().cooldown_ms();

    for _ in 0..2 {
        h.paper.fail_next_order(funds_error());
        h.engine.execute(&buy(70.0)).await;
        h.clock.advance(cooldown);
    }
    assert_eq!(h.engine.guard_state().consecutive_failures, 2);
    assert!(h.engine.execute(&buy(70.0)).await.is_placed());
    assert_eq!(h.engine.guard_state().consecutive_failures, 0);
    h.clock.advance(cooldown);

    for _ in 0..2 {
        h.paper.fail_next_order(funds_error());
        h.engine.execute(&buy(70.0)).await;
        h.clock.advance(cooldown);
    }
    assert!(h.engine.guard_state().enabled);
    assert_eq!(h.notes.breaker_trips(), 0);
}

#[tokio::test]
async fn cooling_down_execute_is_a_no_op() {
    let h = harness();
    strong_history(&h);
    assert!(h.engine.execute(&buy(70.0)).await.is_placed());
    let notes_before = h.notes.notes().len();
    let state_before = h.engine.guard_state();

    h.clock.advance(MINUTE);
    let out = h.engine.execute(&buy(70.0)).await;
    assert!(matches!(out, ExecutionOutcome::Blocked(GuardStatus::CoolingDown { .. })));
    assert_eq!(h.engine.guard_state(), state_before);
    assert_eq!(h.notes.notes().len(), notes_before);
    assert_eq!(h.paper.placed_orders().len(), 1);
}

#[tokio::test]
async fn placed_order_is_announced_with_final_parameters() {
    let h = harness();
    strong_history(&h);
    let out = h.engine.execute(&buy(70.0)).await;
    let ExecutionOutcome::Placed { order_id, plan, .. } = out else {
        panic!("not placed: {out:?}");
    };
    assert!(plan.reward_risk >= 1.0);
    let announced = h.notes.notes().into_iter().any(|n| {
        matches!(n, Notification::OrderPlaced { order_id: ref id, plan: ref p } if *id == order_id && *p == plan)
    });
    assert!(announced);
}

#[tokio::test]
async fn low_confidence_signal_is_dropped() {
    let h = harness();
    strong_history(&h);
    let out = h.engine.execute(&buy(30.0)).await;
    assert!(matches!(out, ExecutionOutcome::Rejected { .. }));
    assert!(h.paper.placed_orders().is_empty());
    assert!(h.engine.guard_state().enabled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executes_place_a_single_order() {
    let Harness { engine, paper, .. } = harness();
    let engine = Arc::new(engine);
    for (i, outcome) in [Outcome::TakeProfit; 5].iter().enumerate() {
        let update = sim(T0 - i as u64 * MINUTE, Direction::Long, *outcome, 3.0, -0.8);
        engine.record(SYM, &format!("sim-{i}"), update).unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move { engine.execute(&buy(70.0)).await }));
    }
    let mut placed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ExecutionOutcome::Placed { .. } => placed += 1,
            ExecutionOutcome::Blocked(GuardStatus::CoolingDown { .. }) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(placed, 1);
    assert_eq!(paper.placed_orders().len(), 1);
}
