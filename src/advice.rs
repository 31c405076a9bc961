//! Take / reverse / skip verdicts from a regime snapshot.
//!
//! [`AdviceEngine::advise`] is pure: same regime and direction, same
//! answer. Rules are evaluated in priority order; the first that fires
//! picks the action, then outcome annotations may only add penalties and
//! text on top.

use serde::{Deserialize, Serialize};

use crate::outcome::Direction;
use crate::regime::{finite_or_zero, DirectionalStats, Regime};
use crate::state::env_or;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviceThresholds {
    /// Fewer samples than this and nothing is trusted.
    pub min_samples: usize,
    pub strong_min_mfe: f64,
    pub strong_min_ratio: f64,
    /// Minimum MFE - |MAE| for a strong profile.
    pub strong_min_gap: f64,
    /// Reversal count a strong profile may still carry.
    pub strong_max_reversals: usize,
    /// |MAE| (percent) above which the trade is skipped outright.
    pub max_mae_pct: f64,
    pub extreme_ratio: f64,
    /// |MAE| - MFE beyond which adverse moves dominate.
    pub extreme_gap: f64,
    pub reversal_count_th: usize,
    /// Ratio below which the reversal count alone suggests reversing.
    pub reversal_max_ratio: f64,
    /// Stop-loss streak at which a reversal is refused as fighting the trend.
    pub sl_streak_override: usize,
    /// Stop-loss streak at which any verdict takes an extra penalty.
    pub sl_streak_annotate: usize,
    pub high_sl_count: usize,
    pub high_timeout_ratio: f64,
    pub high_timeout_count: usize,
}

impl Default for AdviceThresholds {
    fn default() -> Self {
        Self {
            min_samples: 3,
            strong_min_mfe: 1.0,
            strong_min_ratio: 1.5,
            strong_min_gap: 0.5,
            strong_max_reversals: 1,
            max_mae_pct: 3.0,
            extreme_ratio: 0.5,
            extreme_gap: 1.0,
            reversal_count_th: 3,
            reversal_max_ratio: 1.0,
            sl_streak_override: 2,
            sl_streak_annotate: 2,
            high_sl_count: 3,
            high_timeout_ratio: 0.5,
            high_timeout_count: 2,
        }
    }
}

impl AdviceThresholds {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_samples: env_or("MIN_SAMPLES", d.min_samples),
            strong_min_mfe: env_or("STRONG_MIN_MFE", d.strong_min_mfe),
            strong_min_ratio: env_or("STRONG_MIN_RATIO", d.strong_min_ratio),
            strong_min_gap: env_or("STRONG_MIN_GAP", d.strong_min_gap),
            strong_max_reversals: env_or("STRONG_MAX_REVERSALS", d.strong_max_reversals),
            max_mae_pct: env_or("MAX_MAE_PCT", d.max_mae_pct),
            extreme_ratio: env_or("EXTREME_RATIO", d.extreme_ratio),
            extreme_gap: env_or("EXTREME_GAP", d.extreme_gap),
            reversal_count_th: env_or("REVERSAL_COUNT_TH", d.reversal_count_th),
            reversal_max_ratio: env_or("REVERSAL_MAX_RATIO", d.reversal_max_ratio),
            sl_streak_override: env_or("SL_STREAK_OVERRIDE", d.sl_streak_override),
            sl_streak_annotate: env_or("SL_STREAK_ANNOTATE", d.sl_streak_annotate),
            high_sl_count: env_or("HIGH_SL_COUNT", d.high_sl_count),
            high_timeout_ratio: env_or("HIGH_TIMEOUT_RATIO", d.high_timeout_ratio),
            high_timeout_count: env_or("HIGH_TIMEOUT_COUNT", d.high_timeout_count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdviceAction {
    Take,
    Reverse,
    Skip,
}

impl AdviceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdviceAction::Take => "take",
            AdviceAction::Reverse => "reverse",
            AdviceAction::Skip => "skip",
        }
    }
}

/// Which rule chose the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceReason {
    InsufficientSamples,
    ExcessiveMae,
    StrongProfile,
    ExtremeAdverse,
    TrendOverride,
    ReversalSignal,
    NoEdge,
}

/// Whose numbers the decision was made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBasis {
    Directional,
    Overall,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Adjustments {
    pub sl_mult: f64,
    pub tp_mult: f64,
    pub confidence_delta: f64,
}

impl Adjustments {
    fn new(sl_mult: f64, tp_mult: f64, confidence_delta: f64) -> Self {
        Self { sl_mult, tp_mult, confidence_delta }
    }
}

impl Default for Adjustments {
    fn default() -> Self {
        Self::new(1.0, 1.0, 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdviceResult {
    pub action: AdviceAction,
    pub reason: AdviceReason,
    pub basis: MetricsBasis,
    pub adjustments: Adjustments,
    pub explanation: String,
}

#[derive(Debug, Clone, Default)]
pub struct AdviceEngine {
    th: AdviceThresholds,
}

impl AdviceEngine {
    pub fn new(th: AdviceThresholds) -> Self {
        Self { th }
    }

    pub fn thresholds(&self) -> &AdviceThresholds {
        &self.th
    }

    pub fn advise(&self, regime: &Regime, direction: Direction) -> AdviceResult {
        let th = &self.th;
        let dir = direction.as_str();

        if regime.sample_count < th.min_samples {
            return AdviceResult {
                action: AdviceAction::Skip,
                reason: AdviceReason::InsufficientSamples,
                basis: MetricsBasis::Overall,
                adjustments: Adjustments::new(1.0, 1.0, -5.0),
                explanation: format!(
                    "insufficient samples for {}: {} < {} required",
                    regime.symbol, regime.sample_count, th.min_samples
                ),
            };
        }

        let (basis, stats) = match regime.directional(direction) {
            Some(d) if d.sample_count >= th.min_samples => (MetricsBasis::Directional, sanitized(d)),
            _ => (MetricsBasis::Overall, sanitized(&regime.overall())),
        };
        let basis_note = match basis {
            MetricsBasis::Directional => format!("{dir} metrics ({} samples)", stats.sample_count),
            MetricsBasis::Overall => format!("overall metrics (too few {dir} samples)"),
        };

        let worst_mae = stats.avg_mae.abs().max(finite_or_zero(regime.avg_mae).abs());
        if worst_mae > th.max_mae_pct {
            let mut result = AdviceResult {
                action: AdviceAction::Skip,
                reason: AdviceReason::ExcessiveMae,
                basis,
                adjustments: Adjustments::new(0.8, 0.8, -20.0),
                explanation: format!(
                    "MAE {:.2}% exceeds max {:.2}%; skipping",
                    worst_mae, th.max_mae_pct
                ),
            };
            self.annotate(&mut result, regime, &stats);
            return result;
        }

        let ratio = stats.excursion_ratio;
        let gap = stats.excursion_gap();
        let mut result = if stats.avg_mfe >= th.strong_min_mfe
            && ratio >= th.strong_min_ratio
            && gap >= th.strong_min_gap
            && stats.reverse_count <= th.strong_max_reversals
        {
            AdviceResult {
                action: AdviceAction::Take,
                reason: AdviceReason::StrongProfile,
                basis,
                adjustments: Adjustments::new(1.2, 1.3, 10.0),
                explanation: format!(
                    "strong {dir} profile on {basis_note}: MFE {:.2}%, MAE {:.2}%, ratio {:.2}",
                    stats.avg_mfe, stats.avg_mae, ratio
                ),
            }
        } else if ratio < th.extreme_ratio && -gap > th.extreme_gap {
            if regime.sl_streak >= th.sl_streak_override {
                AdviceResult {
                    action: AdviceAction::Take,
                    reason: AdviceReason::TrendOverride,
                    basis,
                    adjustments: Adjustments::new(0.9, 1.0, -5.0),
                    explanation: format!(
                        "adverse excursions dominate (ratio {:.2}) but {} stop-losses in a row; not fading the trend",
                        ratio, regime.sl_streak
                    ),
                }
            } else {
                AdviceResult {
                    action: AdviceAction::Reverse,
                    reason: AdviceReason::ExtremeAdverse,
                    basis,
                    adjustments: Adjustments::new(1.0, 1.1, 5.0),
                    explanation: format!(
                        "adverse excursions dominate on {basis_note}: ratio {:.2}, |MAE| exceeds MFE by {:.2}%; reversing",
                        ratio, -gap
                    ),
                }
            }
        } else if stats.reverse_count >= th.reversal_count_th && ratio < th.reversal_max_ratio {
            AdviceResult {
                action: AdviceAction::Reverse,
                reason: AdviceReason::ReversalSignal,
                basis,
                adjustments: Adjustments::new(1.0, 1.0, 2.0),
                explanation: format!(
                    "{} reversals with weak ratio {:.2} on {basis_note}; reversing",
                    stats.reverse_count, ratio
                ),
            }
        } else {
            AdviceResult {
                action: AdviceAction::Skip,
                reason: AdviceReason::NoEdge,
                basis,
                adjustments: Adjustments::new(1.0, 1.0, -3.0),
                explanation: format!("no clear edge on {basis_note}: ratio {:.2}, gap {:.2}%", ratio, gap),
            }
        };

        self.annotate(&mut result, regime, &stats);
        result
    }

    /// Outcome-based penalties. Never changes the action.
    fn annotate(&self, result: &mut AdviceResult, regime: &Regime, stats: &DirectionalStats) {
        let th = &self.th;
        let mut notes = Vec::new();
        if stats.outcomes.sl >= th.high_sl_count {
            result.adjustments.confidence_delta -= 5.0;
            notes.push(format!("{} of {} hit stop-loss", stats.outcomes.sl, stats.sample_count));
        }
        let timeout_ratio = if stats.sample_count == 0 {
            0.0
        } else {
            stats.outcomes.timeout as f64 / stats.sample_count as f64
        };
        if timeout_ratio >= th.high_timeout_ratio && stats.outcomes.timeout >= th.high_timeout_count {
            result.adjustments.confidence_delta -= 3.0;
            notes.push(format!("{:.0}% timed out", timeout_ratio * 100.0));
        }
        if regime.sl_streak >= th.sl_streak_annotate {
            result.adjustments.confidence_delta -= 5.0;
            notes.push(format!("stop-loss streak {}", regime.sl_streak));
        }
        if !notes.is_empty() {
            result.explanation.push_str("; ");
            result.explanation.push_str(&notes.join(", "));
        }
    }
}

fn sanitized(stats: &DirectionalStats) -> DirectionalStats {
    DirectionalStats {
        avg_r: finite_or_zero(stats.avg_r),
        win_rate: finite_or_zero(stats.win_rate),
        avg_mfe: finite_or_zero(stats.avg_mfe),
        avg_mae: finite_or_zero(stats.avg_mae),
        excursion_ratio: finite_or_zero(stats.excursion_ratio),
        ..stats.clone()
    }
}
