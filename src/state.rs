use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::advice::AdviceThresholds;

pub const HOUR_MS: u64 = 3_600_000;

/// How the base amount of an order is derived from the quote side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizingMode {
    /// Spend a fixed quote notional per trade.
    FixedNotional { quote: f64 },
    /// Commit a fraction of the account balance as margin, levered.
    BalancePercent { pct: f64 },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub recency_window_hours: f64,
    pub max_entries_per_symbol: usize,
    pub prune_interval_secs: u64,
    pub ratio_cap: f64,
    pub cooldown_secs: u64,
    pub max_consecutive_failures: u32,
    pub leverage: f64,
    pub target_account_gain: f64,
    pub max_account_risk: f64,
    pub sizing_mode: SizingMode,
    pub min_signal_confidence: f64,
    pub monitor_trades: bool,
    pub monitor_poll_secs: u64,
    pub monitor_max_secs: u64,
    pub notify_webhook: Option<String>,
    pub advice: AdviceThresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recency_window_hours: 6.0,
            max_entries_per_symbol: 5,
            prune_interval_secs: 1800,
            ratio_cap: 50.0,
            cooldown_secs: 600,
            max_consecutive_failures: 3,
            leverage: 10.0,
            target_account_gain: 0.05,
            max_account_risk: 0.02,
            sizing_mode: SizingMode::FixedNotional { quote: 100.0 },
            min_signal_confidence: 50.0,
            monitor_trades: true,
            monitor_poll_secs: 30,
            monitor_max_secs: 4 * 3600,
            notify_webhook: None,
            advice: AdviceThresholds::default(),
        }
    }
}

pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        let sizing_mode = match std::env::var("SIZING_MODE").unwrap_or_default().as_str() {
            "balance" => SizingMode::BalancePercent { pct: env_or("BALANCE_PCT", 0.1) },
            _ => SizingMode::FixedNotional { quote: env_or("QUOTE_NOTIONAL", 100.0) },
        };
        Self {
            recency_window_hours: env_or("RECENCY_WINDOW_HOURS", d.recency_window_hours),
            max_entries_per_symbol: env_or("MAX_ENTRIES_PER_SYMBOL", d.max_entries_per_symbol),
            prune_interval_secs: env_or("PRUNE_INTERVAL_SECS", d.prune_interval_secs),
            ratio_cap: env_or("EXCURSION_RATIO_CAP", d.ratio_cap),
            cooldown_secs: env_or("COOLDOWN_SECS", d.cooldown_secs),
            max_consecutive_failures: env_or("MAX_CONSECUTIVE_FAILURES", d.max_consecutive_failures),
            leverage: env_or("LEVERAGE", d.leverage),
            target_account_gain: env_or("TARGET_ACCOUNT_GAIN", d.target_account_gain),
            max_account_risk: env_or("MAX_ACCOUNT_RISK", d.max_account_risk),
            sizing_mode,
            min_signal_confidence: env_or("MIN_SIGNAL_CONFIDENCE", d.min_signal_confidence),
            monitor_trades: env_flag("MONITOR_TRADES", d.monitor_trades),
            monitor_poll_secs: env_or("MONITOR_POLL_SECS", d.monitor_poll_secs),
            monitor_max_secs: env_or("MONITOR_MAX_SECS", d.monitor_max_secs),
            notify_webhook: std::env::var("NOTIFY_WEBHOOK").ok().filter(|v| !v.is_empty()),
            advice: AdviceThresholds::from_env(),
        }
        .validate()
    }

    /// Replace values that would break downstream math with their defaults.
    pub fn validate(mut self) -> Self {
        let d = Self::default();
        if !(self.recency_window_hours.is_finite() && self.recency_window_hours > 0.0) {
            self.recency_window_hours = d.recency_window_hours;
        }
        if self.max_entries_per_symbol == 0 {
            self.max_entries_per_symbol = d.max_entries_per_symbol;
        }
        if self.prune_interval_secs == 0 {
            self.prune_interval_secs = d.prune_interval_secs;
        }
        if !(self.ratio_cap.is_finite() && self.ratio_cap > 0.0) {
            self.ratio_cap = d.ratio_cap;
        }
        if self.max_consecutive_failures == 0 {
            self.max_consecutive_failures = d.max_consecutive_failures;
        }
        if !(self.leverage.is_finite() && self.leverage >= 1.0) {
            self.leverage = d.leverage;
        }
        if !(self.target_account_gain.is_finite() && self.target_account_gain > 0.0) {
            self.target_account_gain = d.target_account_gain;
        }
        if !(self.max_account_risk.is_finite() && self.max_account_risk > 0.0) {
            self.max_account_risk = d.max_account_risk;
        }
        self.sizing_mode = match self.sizing_mode {
            SizingMode::FixedNotional { quote } if !(quote.is_finite() && quote > 0.0) => d.sizing_mode,
            SizingMode::BalancePercent { pct } if !(pct.is_finite() && pct > 0.0 && pct <= 1.0) => {
                SizingMode::BalancePercent { pct: 0.1 }
            }
            other => other,
        };
        if !self.min_signal_confidence.is_finite() {
            self.min_signal_confidence = d.min_signal_confidence;
        }
        self.min_signal_confidence = self.min_signal_confidence.clamp(0.0, 100.0);
        if self.monitor_poll_secs == 0 {
            self.monitor_poll_secs = d.monitor_poll_secs;
        }
        if self.monitor_max_secs == 0 {
            self.monitor_max_secs = d.monitor_max_secs;
        }
        self
    }

    pub fn window_ms(&self) -> u64 {
        (self.recency_window_hours * HOUR_MS as f64) as u64
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_secs.saturating_mul(1000)
    }
}

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Source of wall-clock time, injectable so cooldowns and windows are testable.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        now_ms()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { ms: Arc::new(AtomicU64::new(start_ms)) }
    }

    pub fn set(&self, ms: u64) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_entries_per_symbol, 5);
        assert_eq!(cfg.window_ms(), 6 * HOUR_MS);
        assert_eq!(cfg.cooldown_ms(), 600_000);
        assert_eq!(cfg.max_consecutive_failures, 3);
    }

    #[test]
    fn test_validate_repairs_broken_values() {
        let mut cfg = Config::default();
        cfg.max_entries_per_symbol = 0;
        cfg.leverage = f64::NAN;
        cfg.max_account_risk = -1.0;
        cfg.sizing_mode = SizingMode::FixedNotional { quote: 0.0 };
        cfg.min_signal_confidence = 250.0;
        let cfg = cfg.validate();
        assert_eq!(cfg.max_entries_per_symbol, 5);
        assert_eq!(cfg.leverage, 10.0);
        assert_eq!(cfg.max_account_risk, 0.02);
        assert_eq!(cfg.sizing_mode, SizingMode::FixedNotional { quote: 100.0 });
        assert_eq!(cfg.min_signal_confidence, 100.0);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();
        clock.advance(500);
        assert_eq!(other.now_ms(), 1_500);
        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }
}
