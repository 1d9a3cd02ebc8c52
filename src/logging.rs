//! Structured logging for the intervention pipeline.
//!
//! Every record is one JSON line on stdout. When `LOG_DIR` is set the same
//! lines are also appended to `<LOG_DIR>/<run_id>/events.jsonl` (INFO and
//! above) and `trace.jsonl` (TRACE/DEBUG), so a session can be replayed and
//! audited after the fact.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

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
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,       // Snapshots, fallbacks, technicals
    Interaction,  // Action and pointer-speed capture
    Profile,      // Trade-history profiling
    Tilt,         // Scoring and escalation
    Intervention, // Severity, messages, overlays
    Gateway,      // Text-service calls, cache, backoff
    System,       // Startup, cycle summaries
    Timing,       // Phase timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Interaction => "interaction",
            Domain::Profile => "profile",
            Domain::Tilt => "tilt",
            Domain::Intervention => "intervention",
            Domain::Gateway => "gateway",
            Domain::System => "system",
            Domain::Timing => "timing",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
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

#[derive(Debug)]
struct FileSinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    sinks: Option<FileSinks>,
}

fn open_sinks(run_id: &str) -> Option<FileSinks> {
    let base = std::env::var("LOG_DIR").ok()?;
    let mut run_dir = PathBuf::from(base);
    run_dir.push(run_id);
    if let Err(err) = create_dir_all(&run_dir) {
        eprintln!("[log] failed to create run dir: {}", err);
        return None;
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
    let events = File::create(run_dir.join("events.jsonl"))
        .map_err(|err| eprintln!("[log] failed to create events log: {}", err))
        .ok()?;
    let trace = File::create(run_dir.join("trace.jsonl"))
        .map_err(|err| eprintln!("[log] failed to create trace log: {}", err))
        .ok()?;
    Some(FileSinks {
        events: Mutex::new(BufWriter::new(events)),
        trace: Mutex::new(BufWriter::new(trace)),
    })
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let sinks = open_sinks(&run_id);
        RunContext { run_id, sinks }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["api_key", "key", "authorization", "Authorization", "x-goog-api-key"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["ticker", "severity", "fingerprint", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
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
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

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

    let line = Value::Object(entry).to_string();
    if let Some(sinks) = &ctx.sinks {
        match level {
            Level::Trace | Level::Debug => write_line(&sinks.trace, &line),
            _ => write_line(&sinks.events, &line),
        }
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_market_capture(
    ticker: &str,
    price: f64,
    volatility: f64,
    regime: &str,
    synthetic: bool,
) {
    log(
        Level::Info,
        Domain::Market,
        "market_capture",
        obj(&[
            ("ticker", v_str(ticker)),
            ("price", v_num(price)),
            ("volatility", v_num(volatility)),
            ("regime", v_str(regime)),
            ("synthetic", Value::Bool(synthetic)),
        ]),
    );
}

pub fn log_fallback(domain: Domain, what: &str, reason: &str) {
    log(
        Level::Warn,
        domain,
        "fallback",
        obj(&[("what", v_str(what)), ("reason", v_str(reason))]),
    );
}

pub fn log_gateway_retry(
    fingerprint: &str,
    attempt: u32,
    max_attempts: u32,
    delay_ms: u64,
    err: &str,
) {
    log(
        Level::Warn,
        Domain::Gateway,
        "throttled_retry",
        obj(&[
            ("fingerprint", v_str(fingerprint)),
            ("attempt", json!(attempt)),
            ("max_attempts", json!(max_attempts)),
            ("delay_ms", json!(delay_ms)),
            ("error", v_str(err)),
        ]),
    );
}

pub fn log_tilt(score: u8, escalated: bool, requires_intervention: bool) {
    log(
        Level::Info,
        Domain::Tilt,
        "tilt_scored",
        obj(&[
            ("score", json!(score)),
            ("escalated", Value::Bool(escalated)),
            ("requires_intervention", Value::Bool(requires_intervention)),
        ]),
    );
}

pub fn log_intervention(severity: &str, score: u8, requires_ui_lock: bool) {
    log(
        Level::Info,
        Domain::Intervention,
        "intervention",
        obj(&[
            ("severity", v_str(severity)),
            ("score", json!(score)),
            ("requires_ui_lock", Value::Bool(requires_ui_lock)),
        ]),
    );
}

/// One line per completed cycle, for summarization
pub fn log_cycle_summary(ticker: &str, regime: &str, score: u8, severity: &str, synthetic: bool) {
    log(
        Level::Info,
        Domain::System,
        "cycle_summary",
        obj(&[
            ("ticker", v_str(ticker)),
            ("regime", v_str(regime)),
            ("score", json!(score)),
            ("severity", v_str(severity)),
            ("synthetic_market", Value::Bool(synthetic)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

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

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Phase timing
// =============================================================================

/// Emits elapsed time for a labelled phase when dropped.
pub struct PhaseScope {
    label: &'static str,
    started: Instant,
}

impl PhaseScope {
    pub fn new(label: &'static str) -> Self {
        Self { label, started: Instant::now() }
    }
}

impl Drop for PhaseScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        log(
            Level::Trace,
            Domain::Timing,
            "phase",
            obj(&[("label", v_str(self.label)), ("elapsed_ms", v_num(elapsed_ms))]),
        );
    }
}
