//! The trading engine: one instance owns the regime cache, the advice policy
//! and the execution guard, and wires them to an exchange and a notifier.
//!
//! Locking: the store and its aggregator sit behind one mutex (the single
//! critical section for writes and pruning). The guard has its own mutex.
//! Neither is held across an await. `execute` is additionally serialized
//! by an async mutex so the guard check and its state update cannot
//! interleave between two concurrent callers.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::advice::{AdviceAction, AdviceEngine, AdviceResult};
use crate::exchange::{Exchange, OrderSide};
use crate::guard::{ExecutionGuard, ExecutionState, FailureOutcome, GuardStatus};
use crate::logging::{log, log_advice, log_order_submit, obj, params_hash, v_num, v_str, Domain, Level};
use crate::monitor::{run_and_report, MonitorConfig, TradeReport};
use crate::notify::{Notification, Notifier};
use crate::outcome::{Direction, EntryError, PruneReport, SimulationOutcomeStore, SimulationUpdate};
use crate::regime::{Regime, RegimeAggregator};
use crate::risk::{OrderPlan, RiskEngine, ShapeRejection};
use crate::signal::Signal;
use crate::state::{Clock, Config};

/// What one `execute` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The signal said hold.
    Hold,
    /// `shutdown` has been requested; nothing is evaluated.
    ShuttingDown,
    /// Guard refused: cooling down or disabled. No state changed.
    Blocked(GuardStatus),
    /// Advice said skip.
    Skipped(AdviceResult),
    /// The venue does not list the symbol.
    UnknownSymbol,
    /// Order shaping dropped the signal.
    Rejected { advice: AdviceResult, reason: ShapeRejection },
    Placed { order_id: String, plan: OrderPlan, advice: AdviceResult },
    /// An exchange call failed; `failure` is how the guard took it.
    Failed { error: String, failure: FailureOutcome },
}

impl ExecutionOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, ExecutionOutcome::Placed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub symbols: usize,
    pub total_entries: usize,
    pub cached_regimes: usize,
    pub regime_computations: u64,
    pub guard: ExecutionState,
    pub status: GuardStatus,
    pub background_tasks: usize,
}

struct Book {
    store: SimulationOutcomeStore,
    regimes: RegimeAggregator,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TradingEngine {
    cfg: Config,
    book: Mutex<Book>,
    advisor: AdviceEngine,
    guard: Mutex<ExecutionGuard>,
    risk: RiskEngine,
    exchange: Arc<dyn Exchange>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    monitor_cfg: MonitorConfig,
    exec_lock: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<JoinSet<()>>,
    reports_tx: mpsc::UnboundedSender<TradeReport>,
    reports_rx: Mutex<Option<mpsc::UnboundedReceiver<TradeReport>>>,
}

impl TradingEngine {
    pub fn new(
        cfg: Config,
        exchange: Arc<dyn Exchange>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cfg = cfg.validate();
        let (shutdown_tx, _) = watch::channel(false);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            book: Mutex::new(Book {
                store: SimulationOutcomeStore::new(cfg.window_ms(), cfg.max_entries_per_symbol),
                regimes: RegimeAggregator::new(cfg.ratio_cap),
            }),
            advisor: AdviceEngine::new(cfg.advice.clone()),
            guard: Mutex::new(ExecutionGuard::new(cfg.cooldown_ms(), cfg.max_consecutive_failures)),
            risk: RiskEngine::new(&cfg),
            monitor_cfg: MonitorConfig::new(cfg.monitor_poll_secs, cfg.monitor_max_secs),
            exchange,
            notifier,
            clock,
            exec_lock: tokio::sync::Mutex::new(()),
            shutdown_tx,
            tasks: Mutex::new(JoinSet::new()),
            reports_tx,
            reports_rx: Mutex::new(Some(reports_rx)),
            cfg,
        }
    }

    pub fn with_monitor_config(mut self, monitor_cfg: MonitorConfig) -> Self {
        self.monitor_cfg = monitor_cfg;
        self
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Simulation completion callback.
    pub fn record(&self, symbol: &str, id: &str, update: SimulationUpdate) -> Result<(), EntryError> {
        let now = self.clock.now_ms();
        let mut book = lock(&self.book);
        book.store.record(symbol, id, update, now)?;
        book.regimes.invalidate(symbol);
        Ok(())
    }

    pub fn remove(&self, symbol: &str, id: &str) -> bool {
        let mut book = lock(&self.book);
        let removed = book.store.remove(symbol, id);
        if removed {
            book.regimes.invalidate(symbol);
        }
        removed
    }

    /// Full view, including the raw entries newest first.
    pub fn get_regime(&self, symbol: &str) -> Option<Regime> {
        let now = self.clock.now_ms();
        let mut guard = lock(&self.book);
        let book = &mut *guard;
        let lite = book.regimes.get(&book.store, symbol, now)?;
        let history = book.store.history(symbol)?;
        let mut full = Regime::clone(&lite);
        full.history = Some(history.entries.to_vec());
        Some(full)
    }

    /// Summary only; cheap to call on every signal.
    pub fn get_regime_lite(&self, symbol: &str) -> Option<Arc<Regime>> {
        let now = self.clock.now_ms();
        let mut guard = lock(&self.book);
        let book = &mut *guard;
        book.regimes.get(&book.store, symbol, now)
    }

    pub fn get_advice(&self, regime: &Regime, direction: Direction) -> AdviceResult {
        self.advisor.advise(regime, direction)
    }

    pub fn prune_all(&self) -> PruneReport {
        let now = self.clock.now_ms();
        let mut guard = lock(&self.book);
        let book = &mut *guard;
        let report = book.store.prune_all(now);
        book.regimes.retain_known(&book.store);
        report
    }

    pub fn guard_state(&self) -> ExecutionState {
        lock(&self.guard).state()
    }

    /// Operator action: re-enable trading after the breaker tripped.
    pub fn reset_guard(&self) {
        lock(&self.guard).reset();
    }

    pub fn stats(&self) -> EngineStats {
        let now = self.clock.now_ms();
        let (symbols, total_entries, cached_regimes, regime_computations) = {
            let book = lock(&self.book);
            (
                book.store.symbol_count(),
                book.store.total_entries(),
                book.regimes.cached_symbols(),
                book.regimes.computations(),
            )
        };
        let (guard, status) = {
            let g = lock(&self.guard);
            (g.state(), g.status(now))
        };
        EngineStats {
            symbols,
            total_entries,
            cached_regimes,
            regime_computations,
            guard,
            status,
            background_tasks: lock(&self.tasks).len(),
        }
    }

    /// Receiver for finished trade monitors. Only the first call gets it.
    pub fn take_trade_reports(&self) -> Option<mpsc::UnboundedReceiver<TradeReport>> {
        lock(&self.reports_rx).take()
    }

    /// Run one signal through guard, advice, shaping and the venue.
    ///
    /// Never returns an error: every failure is folded into the guard and
    /// reported in the outcome.
    pub async fn execute(&self, signal: &Signal) -> ExecutionOutcome {
        let Some(direction) = signal.direction.direction() else {
            return ExecutionOutcome::Hold;
        };
        let _serial = self.exec_lock.lock().await;
        if self.is_shutting_down() {
            return ExecutionOutcome::ShuttingDown;
        }
        let symbol = signal.symbol.as_str();

        {
            let guard = lock(&self.guard);
            let now = self.clock.now_ms();
            if !guard.check(symbol, now) {
                return ExecutionOutcome::Blocked(guard.status(now));
            }
        }

        let regime = self
            .get_regime_lite(symbol)
            .unwrap_or_else(|| Arc::new(Regime::empty(symbol, self.clock.now_ms())));
        let advice = self.advisor.advise(&regime, direction);
        log_advice(
            symbol,
            direction.as_str(),
            advice.action.as_str(),
            advice.adjustments.confidence_delta,
            &advice.explanation,
        );
        self.notifier.notify(&Notification::Advice {
            symbol: symbol.to_string(),
            direction,
            action: advice.action,
            explanation: advice.explanation.clone(),
        });

        let side = match advice.action {
            AdviceAction::Skip => return ExecutionOutcome::Skipped(advice),
            AdviceAction::Take => OrderSide::from_direction(direction),
            AdviceAction::Reverse => OrderSide::from_direction(direction.opposite()),
        };

        match self.exchange.validate_symbol(symbol).await {
            Ok(true) => {}
            Ok(false) => {
                log(Level::Warn, Domain::Exec, "unknown_symbol", obj(&[("symbol", v_str(symbol))]));
                return ExecutionOutcome::UnknownSymbol;
            }
            Err(err) => return self.on_failure(symbol, err),
        }
        let price = match self.exchange.get_latest_price(symbol).await {
            Ok(p) => p,
            Err(err) => return self.on_failure(symbol, err),
        };
        let balance = if self.risk.needs_balance() {
            match self.exchange.get_account_balance().await {
                Ok(b) => Some(b),
                Err(err) => return self.on_failure(symbol, err),
            }
        } else {
            None
        };

        let plan = match self.risk.shape(signal, side, &advice.adjustments, price, balance) {
            Ok(plan) => plan,
            Err(reason) => {
                log(
                    Level::Info,
                    Domain::Exec,
                    "signal_dropped",
                    obj(&[("symbol", v_str(symbol)), ("reason", v_str(&reason.to_string()))]),
                );
                return ExecutionOutcome::Rejected { advice, reason };
            }
        };

        let request = plan.to_request();
        let hash = params_hash(&serde_json::to_string(&request).unwrap_or_default());
        log_order_submit(symbol, side.as_str(), plan.amount, price, &hash);

        match self.exchange.place_order(&request).await {
            Ok(order_id) => {
                let now = self.clock.now_ms();
                lock(&self.guard).on_success(now);
                log(
                    Level::Info,
                    Domain::Exec,
                    "order_placed",
                    obj(&[
                        ("symbol", v_str(symbol)),
                        ("order_id", v_str(&order_id)),
                        ("params_hash", v_str(&hash)),
                        ("reward_risk", v_num(plan.reward_risk)),
                    ]),
                );
                self.notifier.notify(&Notification::OrderPlaced { order_id: order_id.clone(), plan: plan.clone() });
                if self.cfg.monitor_trades {
                    self.spawn_monitor(symbol, &order_id, now);
                }
                ExecutionOutcome::Placed { order_id, plan, advice }
            }
            Err(err) => self.on_failure(symbol, err),
        }
    }

    fn on_failure(&self, symbol: &str, err: anyhow::Error) -> ExecutionOutcome {
        let now = self.clock.now_ms();
        let error = format!("{:#}", err);
        let (failure, threshold) = {
            let mut guard = lock(&self.guard);
            (guard.on_error(symbol, &err, now), guard.max_consecutive_failures())
        };
        if failure == FailureOutcome::Tripped {
            self.notifier.notify(&Notification::BreakerTripped {
                symbol: symbol.to_string(),
                failures: threshold,
                last_error: error.clone(),
            });
        }
        ExecutionOutcome::Failed { error, failure }
    }

    fn spawn_monitor(&self, symbol: &str, order_id: &str, opened_ms: u64) {
        let exchange = self.exchange.clone();
        let notifier = self.notifier.clone();
        let cancel = self.shutdown_tx.subscribe();
        let reports = self.reports_tx.clone();
        let cfg = self.monitor_cfg.clone();
        let (symbol, order_id) = (symbol.to_string(), order_id.to_string());

        let mut tasks = lock(&self.tasks);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let report = run_and_report(exchange, symbol, order_id, opened_ms, cfg, cancel, reports).await;
            notifier.notify(&Notification::TradeFinished {
                symbol: report.symbol,
                order_id: report.order_id,
                outcome: report.outcome,
            });
        });
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Periodic window/count enforcement until `shutdown`.
    pub fn spawn_pruner(self: &Arc<Self>) {
        if self.is_shutting_down() {
            return;
        }
        let engine = Arc::clone(self);
        let mut cancel = self.shutdown_tx.subscribe();
        let period = Duration::from_secs(self.cfg.prune_interval_secs.max(1));
        lock(&self.tasks).spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick is immediate.
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        engine.prune_all();
                    }
                }
            }
            log(Level::Debug, Domain::System, "pruner_stopped", obj(&[]));
        });
    }

    /// Cancel the pruner and every trade monitor, then wait for them.
    /// Later `execute` calls return `ShuttingDown`.
    pub async fn shutdown(&self) {
        // Stored even with no live receivers.
        self.shutdown_tx.send_replace(true);
        // Wait out an in-flight execute so it cannot spawn a monitor after the drain.
        drop(self.exec_lock.lock().await);
        let mut tasks = std::mem::take(&mut *lock(&self.tasks));
        let pending = tasks.len();
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tasks.abort_all();
        }
        log(
            Level::Info,
            Domain::System,
            "engine_shutdown",
            obj(&[("tasks", v_num(pending as f64)), ("clean", serde_json::Value::Bool(drained.is_ok()))]),
        );
    }
}
