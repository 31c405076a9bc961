use std::collections::HashMap;
use std::sync::Arc;

use super::entry::{EntryError, SimulationEntry, SimulationUpdate};
use crate::logging::{log_prune, log_record_rejected};

/// One symbol's entries, newest first, plus the version they were written at.
///
/// The slice is never mutated in place; every write swaps in a new `Arc`, so
/// readers holding an older snapshot keep a consistent view.
#[derive(Debug, Clone)]
pub struct SymbolHistory {
    pub version: u64,
    pub entries: Arc<[SimulationEntry]>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub symbols_before: usize,
    pub symbols_after: usize,
    pub entries_dropped: usize,
}

/// Bounded, time-windowed collection of completed simulations per symbol.
///
/// Invariants after every public call: each symbol holds at most
/// `max_entries` entries, all with `ts_ms >= now - window_ms`, ordered
/// newest first, and no symbol maps to an empty history.
#[derive(Debug)]
pub struct SimulationOutcomeStore {
    window_ms: u64,
    max_entries: usize,
    symbols: HashMap<String, SymbolHistory>,
    next_version: u64,
}

impl SimulationOutcomeStore {
    pub fn new(window_ms: u64, max_entries: usize) -> Self {
        Self {
            window_ms,
            max_entries: max_entries.max(1),
            symbols: HashMap::new(),
            next_version: 1,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Insert or replace the entry with `id` for `symbol`, then re-apply the
    /// window and count limits. A rejected update leaves the store untouched.
    pub fn record(
        &mut self,
        symbol: &str,
        id: &str,
        update: SimulationUpdate,
        now_ms: u64,
    ) -> Result<(), EntryError> {
        let current = self.symbols.get(symbol);
        let previous = current.and_then(|h| h.entries.iter().find(|e| e.id == id));
        let entry = match update.into_entry(symbol, id, previous) {
            Ok(entry) => entry,
            Err(err) => {
                log_record_rejected(symbol, id, &err.to_string());
                return Err(err);
            }
        };

        let mut next: Vec<SimulationEntry> = current
            .map(|h| h.entries.iter().filter(|e| e.id != id).cloned().collect())
            .unwrap_or_default();
        next.push(entry);
        // Stable sort: among equal timestamps the earlier-recorded entry stays ahead.
        next.sort_by(|a, b| b.ts_ms.cmp(&a.ts_ms));
        self.enforce(&mut next, now_ms);
        self.replace(symbol, next);
        Ok(())
    }

    /// Remove one entry by id. Returns whether anything was removed.
    pub fn remove(&mut self, symbol: &str, id: &str) -> bool {
        let Some(current) = self.symbols.get(symbol) else {
            return false;
        };
        if !current.entries.iter().any(|e| e.id == id) {
            return false;
        }
        let next: Vec<SimulationEntry> =
            current.entries.iter().filter(|e| e.id != id).cloned().collect();
        self.replace(symbol, next);
        true
    }

    /// Apply the window and count limits to every symbol. Calling it twice
    /// with the same `now_ms` changes nothing the second time.
    pub fn prune_all(&mut self, now_ms: u64) -> PruneReport {
        let symbols_before = self.symbols.len();
        let mut entries_dropped = 0;
        let keys: Vec<String> = self.symbols.keys().cloned().collect();
        for symbol in keys {
            let Some(current) = self.symbols.get(&symbol) else {
                continue;
            };
            let mut next = current.entries.to_vec();
            let before = next.len();
            self.enforce(&mut next, now_ms);
            if next.len() != before {
                entries_dropped += before - next.len();
                self.replace(&symbol, next);
            }
        }
        let report = PruneReport {
            symbols_before,
            symbols_after: self.symbols.len(),
            entries_dropped,
        };
        log_prune(report.symbols_before, report.symbols_after, report.entries_dropped);
        report
    }

    pub fn history(&self, symbol: &str) -> Option<SymbolHistory> {
        self.symbols.get(symbol).cloned()
    }

    pub fn version(&self, symbol: &str) -> Option<u64> {
        self.symbols.get(symbol).map(|h| h.version)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.symbols.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn total_entries(&self) -> usize {
        self.symbols.values().map(|h| h.entries.len()).sum()
    }

    fn enforce(&self, entries: &mut Vec<SimulationEntry>, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        entries.retain(|e| e.ts_ms >= cutoff);
        entries.truncate(self.max_entries);
    }

    fn replace(&mut self, symbol: &str, entries: Vec<SimulationEntry>) {
        if entries.is_empty() {
            self.symbols.remove(symbol);
            return;
        }
        let version = self.next_version;
        self.next_version += 1;
        self.symbols.insert(
            symbol.to_string(),
            SymbolHistory { version, entries: entries.into() },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::entry::{Direction, Outcome};
    use crate::state::HOUR_MS;

    const NOW: u64 = 100 * HOUR_MS;

    fn update(ts_ms: u64, outcome: Outcome) -> SimulationUpdate {
        SimulationUpdate::new()
            .ts_ms(ts_ms)
            .direction(Direction::Long)
            .outcome(outcome)
            .r_multiple(1.0)
            .label(1)
            .mfe(1.0)
            .mae(-0.5)
    }

    fn store() -> SimulationOutcomeStore {
        SimulationOutcomeStore::new(6 * HOUR_MS, 5)
    }

    #[test]
    fn test_record_orders_newest_first() {
        let mut s = store();
        s.record("BTC/USDT", "a", update(NOW - 3_000, Outcome::TakeProfit), NOW).unwrap();
        s.record("BTC/USDT", "b", update(NOW - 1_000, Outcome::StopLoss), NOW).unwrap();
        s.record("BTC/USDT", "c", update(NOW - 2_000, Outcome::Timeout), NOW).unwrap();
        let ids: Vec<String> = s.history("BTC/USDT").unwrap().entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_record_truncates_to_max_entries() {
        let mut s = store();
        for i in 0..8u64 {
            s.record("BTC/USDT", &format!("e{i}"), update(NOW - 10_000 + i, Outcome::TakeProfit), NOW)
                .unwrap();
        }
        let h = s.history("BTC/USDT").unwrap();
        assert_eq!(h.entries.len(), 5);
        assert_eq!(h.entries[0].id, "e7");
        assert_eq!(h.entries[4].id, "e3");
    }

    #[test]
    fn test_record_replaces_by_id() {
        let mut s = store();
        s.record("BTC/USDT", "a", update(NOW - 1_000, Outcome::TakeProfit), NOW).unwrap();
        s.record("BTC/USDT", "a", update(NOW - 500, Outcome::StopLoss), NOW).unwrap();
        let h = s.history("BTC/USDT").unwrap();
        assert_eq!(h.entries.len(), 1);
        assert_eq!(h.entries[0].outcome, Outcome::StopLoss);
    }

    #[test]
    fn test_rejected_record_leaves_state_untouched() {
        let mut s = store();
        s.record("BTC/USDT", "a", update(NOW - 1_000, Outcome::TakeProfit), NOW).unwrap();
        let before = s.history("BTC/USDT").unwrap();

        let mut bad = update(NOW, Outcome::StopLoss);
        bad.direction = None;
        assert!(s.record("BTC/USDT", "a", bad, NOW).is_err());

        let after = s.history("BTC/USDT").unwrap();
        assert_eq!(before.version, after.version);
        assert_eq!(after.entries[0].outcome, Outcome::TakeProfit);
        assert!(s.record("ETH/USDT", "z", SimulationUpdate::new(), NOW).is_err());
        assert!(s.history("ETH/USDT").is_none());
    }

    #[test]
    fn test_stale_record_leaves_no_empty_symbol() {
        let mut s = store();
        s.record("BTC/USDT", "old", update(NOW - 7 * HOUR_MS, Outcome::TakeProfit), NOW).unwrap();
        assert!(s.history("BTC/USDT").is_none());
        assert_eq!(s.symbol_count(), 0);
    }

    #[test]
    fn test_prune_all_enforces_window_and_is_idempotent() {
        let mut s = store();
        s.record("BTC/USDT", "a", update(NOW - 2 * HOUR_MS, Outcome::TakeProfit), NOW).unwrap();
        s.record("BTC/USDT", "b", update(NOW - 5 * HOUR_MS, Outcome::StopLoss), NOW).unwrap();
        s.record("ETH/USDT", "c", update(NOW - 5 * HOUR_MS, Outcome::StopLoss), NOW).unwrap();

        let later = NOW + 2 * HOUR_MS;
        let first = s.prune_all(later);
        assert_eq!(first.entries_dropped, 2);
        assert_eq!(first.symbols_after, 1);
        assert!(s.history("ETH/USDT").is_none());
        for e in s.history("BTC/USDT").unwrap().entries.iter() {
            assert!(later - e.ts_ms <= 6 * HOUR_MS);
        }

        let version = s.version("BTC/USDT");
        let second = s.prune_all(later);
        assert_eq!(second.entries_dropped, 0);
        assert_eq!(s.version("BTC/USDT"), version);
    }

    #[test]
    fn test_remove_last_entry_drops_symbol() {
        let mut s = store();
        s.record("BTC/USDT", "a", update(NOW, Outcome::TakeProfit), NOW).unwrap();
        assert!(!s.remove("BTC/USDT", "missing"));
        assert!(s.remove("BTC/USDT", "a"));
        assert!(s.history("BTC/USDT").is_none());
        assert!(s.symbols().is_empty());
    }

    #[test]
    fn test_versions_increase_on_mutation() {
        let mut s = store();
        s.record("BTC/USDT", "a", update(NOW, Outcome::TakeProfit), NOW).unwrap();
        let v1 = s.version("BTC/USDT").unwrap();
        s.record("BTC/USDT", "b", update(NOW, Outcome::TakeProfit), NOW).unwrap();
        assert!(s.version("BTC/USDT").unwrap() > v1);
    }
}
