//! Structured JSON-lines logging.
//!
//! Every record is one JSON object with a run id, a monotonic sequence
//! number, a level, a component and an event name, so a session can be
//! replayed or grepped after the fact. Records go to stdout and to
//! `LOG_DIR/<run_id>/events.jsonl` (trace/debug to `trace.jsonl`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Store,   // Outcome records, pruning
    Regime,  // Snapshot computation
    Advice,  // Take/reverse/skip verdicts
    Exec,    // Guard checks, order placement
    Monitor, // Per-trade outcome polling
    Notify,  // Operator alerts
    System,  // Startup, shutdown
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Store => "store",
            Domain::Regime => "regime",
            Domain::Advice => "advice",
            Domain::Exec => "exec",
            Domain::Monitor => "monitor",
            Domain::Notify => "notify",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_sink(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        // Unset LOG_DIR keeps logging on stdout only, which is what tests want.
        let Ok(base) = std::env::var("LOG_DIR") else {
            return RunContext { run_id, events: None, trace: None };
        };
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
            return RunContext { run_id, events: None, trace: None };
        }
        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );
        RunContext {
            events: open_sink(run_dir.join("events.jsonl")),
            trace: open_sink(run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "api_key", "api_secret", "signature"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["symbol", "order_id", "entry_id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(writer) = writer {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let line = render(level, domain.as_str(), event, fields);
    let ctx = ensure_run_context();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

fn render(level: Level, component: &str, event: &str, fields: Map<String, Value>) -> String {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(sanitize_fields(fields));

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry).to_string()
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_record_rejected(symbol: &str, entry_id: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Store,
        "record_rejected",
        obj(&[
            ("symbol", v_str(symbol)),
            ("entry_id", v_str(entry_id)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_prune(symbols_before: usize, symbols_after: usize, entries_dropped: usize) {
    let level = if entries_dropped > 0 { Level::Info } else { Level::Debug };
    log(
        level,
        Domain::Store,
        "prune",
        obj(&[
            ("symbols_before", json!(symbols_before)),
            ("symbols_after", json!(symbols_after)),
            ("entries_dropped", json!(entries_dropped)),
        ]),
    );
}

pub fn log_advice(symbol: &str, direction: &str, action: &str, confidence_delta: f64, explanation: &str) {
    log(
        Level::Info,
        Domain::Advice,
        "advice",
        obj(&[
            ("symbol", v_str(symbol)),
            ("direction", v_str(direction)),
            ("action", v_str(action)),
            ("confidence_delta", v_num(confidence_delta)),
            ("msg", v_str(explanation)),
        ]),
    );
}

pub fn log_guard(symbol: &str, check: &str, result: &str, value: f64, threshold: f64) {
    log(
        Level::Debug,
        Domain::Exec,
        "guard",
        obj(&[
            ("symbol", v_str(symbol)),
            ("check", v_str(check)),
            ("result", v_str(result)),
            ("value", v_num(value)),
            ("threshold", v_num(threshold)),
        ]),
    );
}

pub fn log_order_submit(symbol: &str, side: &str, amount: f64, price: f64, params_hash: &str) {
    log(
        Level::Info,
        Domain::Exec,
        "order_submit",
        obj(&[
            ("symbol", v_str(symbol)),
            ("side", v_str(side)),
            ("amount", v_num(amount)),
            ("price", v_num(price)),
            ("params_hash", v_str(params_hash)),
        ]),
    );
}

pub fn log_breaker_tripped(symbol: &str, failures: u32, last_error: &str) {
    log(
        Level::Error,
        Domain::Exec,
        "breaker_tripped",
        obj(&[
            ("symbol", v_str(symbol)),
            ("failures", json!(failures)),
            ("last_error", v_str(last_error)),
            ("msg", v_str("auto-trading disabled until manual reset")),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Short stable digest of order parameters, for correlating log lines.
pub fn params_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

/// JSON has no NaN/Infinity; those become null.
pub fn v_num(n: f64) -> Value {
    if n.is_finite() {
        json!(n)
    } else {
        Value::Null
    }
}
