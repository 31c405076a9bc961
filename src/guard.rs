//! Safety gate in front of live order placement.
//!
//! Two states: ACTIVE and COOLDOWN, plus a latching breaker that disables
//! execution after repeated funds/margin failures. Nothing here heals the
//! breaker automatically; [`ExecutionGuard::reset`] is the manual path.

use serde::Serialize;

use crate::exchange::ExchangeError;
use crate::logging::{log, log_breaker_tripped, log_guard, obj, v_num, v_str, Domain, Level};
use crate::reliability::circuit::CircuitBreaker;

/// Venue codes that mean "not enough money": Binance futures
/// (-2018 balance, -2019 margin, -2027 leverage/margin) and Bybit
/// (110004, 110007, 110012, 110045).
const FUNDS_CODES: &[i64] = &[-2018, -2019, -2027, 110004, 110007, 110012, 110045];

const FUNDS_PATTERNS: &[&str] = &[
    "insufficient balance",
    "insufficient margin",
    "insufficient funds",
    "insufficient available balance",
    "margin is insufficient",
    "balance is insufficient",
    "balance not enough",
    "not enough balance",
    "not enough margin",
    "not enough funds",
    "exceeds available balance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Counted toward the breaker and starts a cooldown.
    Funds,
    /// Logged only.
    Other,
}

pub fn classify_error(err: &anyhow::Error) -> ErrorClass {
    if let Some(ex) = err.downcast_ref::<ExchangeError>() {
        if ex.code.is_some_and(|c| FUNDS_CODES.contains(&c)) {
            return ErrorClass::Funds;
        }
    }
    classify_message(&format!("{:#}", err))
}

/// Phrase match, plus funds codes that appear as whole tokens
/// (`code -2019`, `retCode=110007`), never as part of a longer number.
pub fn classify_message(msg: &str) -> ErrorClass {
    let lower = msg.to_lowercase();
    if FUNDS_PATTERNS.iter().any(|p| lower.contains(p)) || has_funds_code_token(&lower) {
        ErrorClass::Funds
    } else {
        ErrorClass::Other
    }
}

fn has_funds_code_token(msg: &str) -> bool {
    msg.split(|c: char| !(c.is_ascii_digit() || c == '-'))
        .filter_map(|tok| tok.parse::<i64>().ok())
        .any(|code| FUNDS_CODES.contains(&code))
}

/// Snapshot of the guard's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionState {
    pub cooldown_until_ms: u64,
    pub consecutive_failures: u32,
    pub last_failure_ms: Option<u64>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum GuardStatus {
    Active,
    CoolingDown { remaining_ms: u64 },
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Nothing changed: a non-funds failure, or the breaker is already open.
    Ignored,
    /// Funds failure counted; cooldown started.
    Counted { consecutive: u32 },
    /// This failure tripped the breaker.
    Tripped,
}

#[derive(Debug, Clone)]
pub struct ExecutionGuard {
    cooldown_ms: u64,
    cooldown_until_ms: u64,
    last_failure_ms: Option<u64>,
    breaker: CircuitBreaker,
}

impl ExecutionGuard {
    pub fn new(cooldown_ms: u64, max_consecutive_failures: u32) -> Self {
        Self {
            cooldown_ms,
            cooldown_until_ms: 0,
            last_failure_ms: None,
            breaker: CircuitBreaker::new(max_consecutive_failures),
        }
    }

    pub fn status(&self, now_ms: u64) -> GuardStatus {
        if !self.breaker.allow() {
            GuardStatus::Disabled
        } else if now_ms < self.cooldown_until_ms {
            GuardStatus::CoolingDown { remaining_ms: self.cooldown_until_ms - now_ms }
        } else {
            GuardStatus::Active
        }
    }

    /// Whether an execution may start now. Has no side effects.
    pub fn check(&self, symbol: &str, now_ms: u64) -> bool {
        match self.status(now_ms) {
            GuardStatus::Active => true,
            GuardStatus::CoolingDown { remaining_ms } => {
                log_guard(symbol, "cooldown", "block", remaining_ms as f64, self.cooldown_ms as f64);
                false
            }
            GuardStatus::Disabled => {
                log_guard(symbol, "breaker", "block", 0.0, self.breaker.threshold as f64);
                false
            }
        }
    }

    pub fn on_success(&mut self, now_ms: u64) {
        self.cooldown_until_ms = now_ms.saturating_add(self.cooldown_ms);
        self.breaker.record_success();
    }

    pub fn on_error(&mut self, symbol: &str, err: &anyhow::Error, now_ms: u64) -> FailureOutcome {
        let message = format!("{:#}", err);
        match classify_error(err) {
            ErrorClass::Other => {
                log(
                    Level::Warn,
                    Domain::Exec,
                    "execution_error",
                    obj(&[("symbol", v_str(symbol)), ("class", v_str("other")), ("error", v_str(&message))]),
                );
                FailureOutcome::Ignored
            }
            ErrorClass::Funds if !self.breaker.allow() => {
                log(
                    Level::Warn,
                    Domain::Exec,
                    "execution_error",
                    obj(&[("symbol", v_str(symbol)), ("class", v_str("funds")), ("breaker", v_str("open")), ("error", v_str(&message))]),
                );
                FailureOutcome::Ignored
            }
            ErrorClass::Funds => {
                self.last_failure_ms = Some(now_ms);
                self.cooldown_until_ms = now_ms.saturating_add(self.cooldown_ms);
                let threshold = self.breaker.threshold;
                if self.breaker.record_failure() {
                    log_breaker_tripped(symbol, threshold, &message);
                    FailureOutcome::Tripped
                } else {
                    log(
                        Level::Warn,
                        Domain::Exec,
                        "execution_error",
                        obj(&[
                            ("symbol", v_str(symbol)),
                            ("class", v_str("funds")),
                            ("error", v_str(&message)),
                            ("consecutive", v_num(self.breaker.failures as f64)),
                        ]),
                    );
                    FailureOutcome::Counted { consecutive: self.breaker.failures }
                }
            }
        }
    }

    /// Manual re-enable after an operator has looked at the account.
    pub fn reset(&mut self) {
        self.breaker.reset();
        self.cooldown_until_ms = 0;
        log(Level::Info, Domain::Exec, "guard_reset", obj(&[]));
    }

    pub fn state(&self) -> ExecutionState {
        ExecutionState {
            cooldown_until_ms: self.cooldown_until_ms,
            consecutive_failures: self.breaker.failures,
            last_failure_ms: self.last_failure_ms,
            enabled: self.breaker.allow(),
        }
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.breaker.threshold
    }
}
