use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::advice::AdviceAction;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::monitor::TradeOutcome;
use crate::outcome::Direction;
use crate::risk::OrderPlan;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Advice {
        symbol: String,
        direction: Direction,
        action: AdviceAction,
        explanation: String,
    },
    OrderPlaced {
        order_id: String,
        plan: OrderPlan,
    },
    BreakerTripped {
        symbol: String,
        failures: u32,
        last_error: String,
    },
    TradeFinished {
        symbol: String,
        order_id: String,
        outcome: TradeOutcome,
    },
}

impl Notification {
    pub fn text(&self) -> String {
        match self {
            Notification::Advice { symbol, direction, action, explanation } => format!(
                "{} {}: {} ({})",
                symbol,
                direction.as_str(),
                action.as_str(),
                explanation
            ),
            Notification::OrderPlaced { order_id, plan } => format!(
                "order {} {} {} {:.6} @ {:.4} sl {:.4} tp {:.4} rr {:.2}",
                order_id,
                plan.symbol,
                plan.side.as_str(),
                plan.amount,
                plan.entry_price,
                plan.stop_loss,
                plan.take_profit,
                plan.reward_risk
            ),
            Notification::BreakerTripped { symbol, failures, last_error } => format!(
                "auto-trading DISABLED after {} consecutive funds failures on {} (last: {}); manual reset required",
                failures, symbol, last_error
            ),
            Notification::TradeFinished { symbol, order_id, outcome } => {
                format!("trade {} on {} finished: {}", order_id, symbol, outcome.describe())
            }
        }
    }
}

/// Operator alert sink. Must not block the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, note: &Notification);
}

/// Writes alerts to the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, note: &Notification) {
        let level = match note {
            Notification::BreakerTripped { .. } => Level::Error,
            _ => Level::Info,
        };
        let payload = serde_json::to_value(note).unwrap_or(serde_json::Value::Null);
        log(level, Domain::Notify, "notification", obj(&[("msg", v_str(&note.text())), ("payload", payload)]));
    }
}

/// POSTs `{"text": ..., "notification": ...}` to a webhook on a detached task.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self { client: reqwest::Client::new(), url: url.to_string() }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, note: &Notification) {
        let body = serde_json::json!({ "text": note.text(), "notification": note });
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log(Level::Warn, Domain::Notify, "webhook_skipped", obj(&[("reason", v_str("no runtime"))]));
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        handle.spawn(async move {
            let result = client
                .post(&url)
                .timeout(std::time::Duration::from_secs(10))
                .json(&body)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(err) = result {
                log(Level::Warn, Domain::Notify, "webhook_failed", obj(&[("error", v_str(&err.to_string()))]));
            }
        });
    }
}

/// Keeps every alert in memory; for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notes: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> Vec<Notification> {
        self.notes.lock().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn breaker_trips(&self) -> usize {
        self.notes()
            .iter()
            .filter(|n| matches!(n, Notification::BreakerTripped { .. }))
            .count()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, note: &Notification) {
        if let Ok(mut notes) = self.notes.lock() {
            notes.push(note.clone());
        }
    }
}

#[derive(Default, Clone)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, note: &Notification) {
        for sink in &self.sinks {
            sink.notify(note);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_delivers_to_every_sink() {
        let a = Arc::new(MemoryNotifier::new());
        let b = Arc::new(MemoryNotifier::new());
        let fan = FanoutNotifier::new().with(a.clone()).with(b.clone()).with(Arc::new(LogNotifier));
        fan.notify(&Notification::BreakerTripped {
            symbol: "BTC/USDT".into(),
            failures: 3,
            last_error: "Margin is insufficient.".into(),
        });
        assert_eq!(a.breaker_trips(), 1);
        assert_eq!(b.notes().len(), 1);
    }

    #[test]
    fn test_breaker_text_mentions_manual_reset() {
        let note = Notification::BreakerTripped {
            symbol: "ETH/USDT".into(),
            failures: 3,
            last_error: "insufficient balance".into(),
        };
        assert!(note.text().contains("manual reset"));
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["kind"], "breaker_tripped");
    }

    #[test]
    fn test_webhook_without_runtime_does_not_panic() {
        WebhookNotifier::new("http://127.0.0.1:9/hook").notify(&Notification::Advice {
            symbol: "BTC/USDT".into(),
            direction: Direction::Long,
            action: AdviceAction::Skip,
            explanation: "insufficient samples".into(),
        });
    }
}
