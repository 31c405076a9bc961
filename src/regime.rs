//! Per-symbol regime snapshots derived from recent simulation outcomes.
//!
//! A [`Regime`] is a pure function of one symbol's history in the
//! [`SimulationOutcomeStore`]; the [`RegimeAggregator`] only caches it,
//! keyed by the history version, so a write is always visible to the next
//! read.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::outcome::{Direction, Outcome, SimulationEntry, SimulationOutcomeStore};

pub const DEFAULT_RATIO_CAP: f64 = 50.0;
/// |MAE| below this is float noise, not a real adverse move.
pub const MAE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub tp: usize,
    pub partial_tp: usize,
    pub sl: usize,
    pub timeout: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::TakeProfit => self.tp += 1,
            Outcome::PartialTakeProfit => self.partial_tp += 1,
            Outcome::StopLoss => self.sl += 1,
            Outcome::Timeout => self.timeout += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.tp + self.partial_tp + self.sl + self.timeout
    }
}

/// Statistics over one subset of entries (all of them, or one direction).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionalStats {
    pub sample_count: usize,
    pub avg_r: f64,
    pub win_rate: f64,
    pub reverse_count: usize,
    pub avg_mfe: f64,
    pub avg_mae: f64,
    pub excursion_ratio: f64,
    pub outcomes: OutcomeCounts,
}

impl DirectionalStats {
    fn from_entries<'a>(entries: impl Iterator<Item = &'a SimulationEntry>, ratio_cap: f64) -> Self {
        let mut n = 0usize;
        let (mut r_sum, mut mfe_sum, mut mae_sum) = (0.0, 0.0, 0.0);
        let (mut wins, mut reverses) = (0usize, 0usize);
        let mut outcomes = OutcomeCounts::default();
        for e in entries {
            n += 1;
            r_sum += finite_or_zero(e.r_multiple);
            mfe_sum += finite_or_zero(e.mfe);
            mae_sum += finite_or_zero(e.mae);
            if e.label >= 1 {
                wins += 1;
            }
            if e.label.abs() >= 1 && e.r_multiple < 0.0 {
                reverses += 1;
            }
            outcomes.add(e.outcome);
        }
        let avg_mfe = mean(mfe_sum, n);
        let avg_mae = mean(mae_sum, n);
        Self {
            sample_count: n,
            avg_r: mean(r_sum, n),
            win_rate: ratio_of(wins, n),
            reverse_count: reverses,
            avg_mfe,
            avg_mae,
            excursion_ratio: excursion_ratio(avg_mfe, avg_mae, ratio_cap),
            outcomes,
        }
    }

    /// MFE minus |MAE|: positive when favorable excursions dominate.
    pub fn excursion_gap(&self) -> f64 {
        finite_or_zero(self.avg_mfe - self.avg_mae.abs())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Regime {
    pub symbol: String,
    pub sample_count: usize,
    pub avg_r: f64,
    pub win_rate: f64,
    pub reverse_count: usize,
    pub avg_mfe: f64,
    pub avg_mae: f64,
    pub excursion_ratio: f64,
    /// `None` means no long samples, which is not the same as zeros.
    pub long: Option<DirectionalStats>,
    pub short: Option<DirectionalStats>,
    pub outcomes: OutcomeCounts,
    /// Consecutive stop-losses counted from the newest entry.
    pub sl_streak: usize,
    pub timeout_ratio: f64,
    pub snapshot_ts_ms: u64,
    /// History version this snapshot was built from; 0 for synthetic regimes.
    pub version: u64,
    /// Raw entries, newest first. Only present on the full view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<SimulationEntry>>,
}

impl Regime {
    /// Build a snapshot from entries ordered newest first.
    pub fn compute(
        symbol: &str,
        entries: &[SimulationEntry],
        ratio_cap: f64,
        now_ms: u64,
        version: u64,
    ) -> Self {
        let overall = DirectionalStats::from_entries(entries.iter(), ratio_cap);
        let directional = |dir: Direction| {
            let stats = DirectionalStats::from_entries(
                entries.iter().filter(|e| e.direction == dir),
                ratio_cap,
            );
            (stats.sample_count > 0).then_some(stats)
        };
        let sl_streak = entries
            .iter()
            .take_while(|e| e.outcome == Outcome::StopLoss)
            .count();

        Self {
            symbol: symbol.to_string(),
            sample_count: overall.sample_count,
            avg_r: overall.avg_r,
            win_rate: overall.win_rate,
            reverse_count: overall.reverse_count,
            avg_mfe: overall.avg_mfe,
            avg_mae: overall.avg_mae,
            excursion_ratio: overall.excursion_ratio,
            long: directional(Direction::Long),
            short: directional(Direction::Short),
            outcomes: overall.outcomes,
            sl_streak,
            timeout_ratio: ratio_of(overall.outcomes.timeout, overall.sample_count),
            snapshot_ts_ms: now_ms,
            version,
            history: None,
        }
    }

    /// A regime with no samples, for symbols the store knows nothing about.
    pub fn empty(symbol: &str, now_ms: u64) -> Self {
        Self::compute(symbol, &[], DEFAULT_RATIO_CAP, now_ms, 0)
    }

    pub fn directional(&self, direction: Direction) -> Option<&DirectionalStats> {
        match direction {
            Direction::Long => self.long.as_ref(),
            Direction::Short => self.short.as_ref(),
        }
    }

    /// The overall numbers viewed as one stats block.
    pub fn overall(&self) -> DirectionalStats {
        DirectionalStats {
            sample_count: self.sample_count,
            avg_r: self.avg_r,
            win_rate: self.win_rate,
            reverse_count: self.reverse_count,
            avg_mfe: self.avg_mfe,
            avg_mae: self.avg_mae,
            excursion_ratio: self.excursion_ratio,
            outcomes: self.outcomes,
        }
    }
}

/// MFE / |MAE|, defined as 0 when either side carries no information and
/// capped at `cap`. Non-decreasing in `mfe`, non-increasing in `|mae|`.
pub fn excursion_ratio(mfe: f64, mae: f64, cap: f64) -> f64 {
    let cap = if cap.is_finite() && cap > 0.0 { cap } else { DEFAULT_RATIO_CAP };
    if !mfe.is_finite() || !mae.is_finite() || mfe <= 0.0 {
        return 0.0;
    }
    let adverse = mae.abs();
    if adverse == 0.0 || adverse < MAE_EPSILON {
        return 0.0;
    }
    finite_or_zero(mfe / adverse).min(cap)
}

pub(crate) fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

fn mean(sum: f64, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        finite_or_zero(sum / n as f64)
    }
}

fn ratio_of(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Lazily computed, version-checked cache of lite regimes.
#[derive(Debug)]
pub struct RegimeAggregator {
    ratio_cap: f64,
    cache: HashMap<String, Arc<Regime>>,
    computations: u64,
}

impl RegimeAggregator {
    pub fn new(ratio_cap: f64) -> Self {
        Self { ratio_cap, cache: HashMap::new(), computations: 0 }
    }

    /// Current regime for `symbol` (without raw history), or `None` when the
    /// store holds nothing for it.
    pub fn get(
        &mut self,
        store: &SimulationOutcomeStore,
        symbol: &str,
        now_ms: u64,
    ) -> Option<Arc<Regime>> {
        let Some(history) = store.history(symbol) else {
            self.cache.remove(symbol);
            return None;
        };
        if let Some(cached) = self.cache.get(symbol) {
            if cached.version == history.version {
                return Some(cached.clone());
            }
        }
        let regime = Arc::new(Regime::compute(
            symbol,
            &history.entries,
            self.ratio_cap,
            now_ms,
            history.version,
        ));
        self.computations += 1;
        self.cache.insert(symbol.to_string(), regime.clone());
        Some(regime)
    }

    pub fn invalidate(&mut self, symbol: &str) {
        self.cache.remove(symbol);
    }

    /// Drop cached snapshots for symbols the store no longer holds.
    pub fn retain_known(&mut self, store: &SimulationOutcomeStore) {
        self.cache.retain(|symbol, _| store.version(symbol).is_some());
    }

    pub fn cached_symbols(&self) -> usize {
        self.cache.len()
    }

    pub fn computations(&self) -> u64 {
        self.computations
    }
}
