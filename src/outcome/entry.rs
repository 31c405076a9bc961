use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

/// How a simulated trade ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[serde(alias = "tp")]
    TakeProfit,
    #[serde(alias = "partial_tp")]
    PartialTakeProfit,
    #[serde(alias = "sl")]
    StopLoss,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::TakeProfit => "tp",
            Outcome::PartialTakeProfit => "partial_tp",
            Outcome::StopLoss => "sl",
            Outcome::Timeout => "timeout",
        }
    }
}

/// A completed simulation. Immutable once accepted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationEntry {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub outcome: Outcome,
    pub r_multiple: f64,
    /// In [-2, 2]; >= 1 counts as a win.
    pub label: i8,
    /// Percent of entry price, >= 0.
    pub mfe: f64,
    /// Percent of entry price, <= 0.
    pub mae: f64,
    pub ts_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryError {
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("label {0} outside [-2, 2]")]
    LabelOutOfRange(i64),
    #[error("mfe must be >= 0, got {0}")]
    NegativeMfe(f64),
    #[error("mae must be <= 0, got {0}")]
    PositiveMae(f64),
    #[error("empty {0}")]
    Empty(&'static str),
}

/// Partial description of a simulation result as reported by the simulator.
///
/// Nothing here reaches the store until [`SimulationUpdate::into_entry`]
/// has checked it; a rejected update leaves no trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationUpdate {
    #[serde(default, alias = "timestamp")]
    pub ts_ms: Option<u64>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default, alias = "r")]
    pub r_multiple: Option<f64>,
    #[serde(default)]
    pub label: Option<i64>,
    #[serde(default)]
    pub mfe: Option<f64>,
    #[serde(default)]
    pub mae: Option<f64>,
    #[serde(default, alias = "duration")]
    pub duration_ms: Option<u64>,
}

impl SimulationUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ts_ms(mut self, ts_ms: u64) -> Self {
        self.ts_ms = Some(ts_ms);
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn r_multiple(mut self, r: f64) -> Self {
        self.r_multiple = Some(r);
        self
    }

    pub fn label(mut self, label: i64) -> Self {
        self.label = Some(label);
        self
    }

    pub fn mfe(mut self, mfe: f64) -> Self {
        self.mfe = Some(mfe);
        self
    }

    pub fn mae(mut self, mae: f64) -> Self {
        self.mae = Some(mae);
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Validate into a full entry.
    ///
    /// Timestamp, direction, outcome, mfe and mae must always be supplied.
    /// r-multiple, label and duration fall back to `previous` (the entry
    /// being replaced, if any) and then to zero.
    pub fn into_entry(
        self,
        symbol: &str,
        id: &str,
        previous: Option<&SimulationEntry>,
    ) -> Result<SimulationEntry, EntryError> {
        if symbol.trim().is_empty() {
            return Err(EntryError::Empty("symbol"));
        }
        if id.trim().is_empty() {
            return Err(EntryError::Empty("id"));
        }
        let ts_ms = self.ts_ms.ok_or(EntryError::Missing("timestamp"))?;
        let direction = self.direction.ok_or(EntryError::Missing("direction"))?;
        let outcome = self.outcome.ok_or(EntryError::Missing("outcome"))?;
        let mfe = finite("mfe", self.mfe.ok_or(EntryError::Missing("mfe"))?)?;
        let mae = finite("mae", self.mae.ok_or(EntryError::Missing("mae"))?)?;
        if mfe < 0.0 {
            return Err(EntryError::NegativeMfe(mfe));
        }
        if mae > 0.0 {
            return Err(EntryError::PositiveMae(mae));
        }

        let r_multiple = match self.r_multiple {
            Some(r) => finite("r_multiple", r)?,
            None => previous.map(|p| p.r_multiple).unwrap_or(0.0),
        };
        let label = match self.label {
            Some(l) if (-2..=2).contains(&l) => l as i8,
            Some(l) => return Err(EntryError::LabelOutOfRange(l)),
            None => previous.map(|p| p.label).unwrap_or(0),
        };
        let duration_ms = self
            .duration_ms
            .or_else(|| previous.map(|p| p.duration_ms))
            .unwrap_or(0);

        Ok(SimulationEntry {
            id: id.to_string(),
            symbol: symbol.to_string(),
            direction,
            outcome,
            r_multiple,
            label,
            mfe,
            mae,
            ts_ms,
            duration_ms,
        })
    }
}

fn finite(field: &'static str, v: f64) -> Result<f64, EntryError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(EntryError::NonFinite(field))
    }
}
