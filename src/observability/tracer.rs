//! Trace/span context propagation and the tracer's public logging API.
//!
//! Three operations form the contract: `run_with_context` establishes a
//! fresh trace, `run_in_child_span` mints a nested span inheriting the
//! caller's trace_id, and `log` appends a structured entry to whichever
//! context is currently active.

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::task_local;

use crate::ids;
use super::report::{generate_report, Report};
use super::sink::TraceSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FunctionStart,
    FunctionEnd,
    Branch,
    Loop,
    ApiCallStart,
    ApiCallEnd,
    Error,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub event_type: EventType,
    pub level: Level,
    pub service: String,
    pub function_name: Option<String>,
    pub payload: serde_json::Value,
    pub duration_ms: Option<u64>,
    pub stack_trace: Option<String>,
}

#[derive(Clone)]
struct SpanScope {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    service: String,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

task_local! {
    static CURRENT: SpanScope;
}

/// Sampling/filtering configuration. Env vars (`CCODE_OBSERVABILITY_*`)
/// override JSON config at load time; see [`TracerConfig::from_env_overrides`].
#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub enabled: bool,
    pub level: Level,
    pub sampling: f64,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: Level::Info,
            sampling: 1.0,
        }
    }
}

impl TracerConfig {
    pub fn from_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("CCODE_OBSERVABILITY_ENABLED") {
            self.enabled = matches!(v.as_str(), "true" | "1");
        }
        if let Ok(v) = std::env::var("CCODE_OBSERVABILITY_LEVEL") {
            if let Some(level) = Level::from_str_loose(&v) {
                self.level = level;
            }
        }
        if let Ok(v) = std::env::var("CCODE_OBSERVABILITY_TRACE_SAMPLING") {
            if let Ok(f) = v.parse::<f64>() {
                self.sampling = f.clamp(0.0, 1.0);
            }
        }
        self
    }
}

pub struct Tracer {
    config: TracerConfig,
    sink: TraceSink,
}

static TRACER: OnceCell<Tracer> = OnceCell::new();

impl Tracer {
    /// Install the process-wide tracer. Call once from `main`; subsequent
    /// calls are ignored (the tracer is an explicit ambient context object,
    /// not a re-introduced mutable global).
    pub fn install(config: TracerConfig, sink: TraceSink) {
        let _ = TRACER.set(Tracer { config, sink });
    }

    fn global() -> Option<&'static Tracer> {
        TRACER.get()
    }
}

/// The trace_id of the currently active context, if any.
pub fn current_trace_id() -> Option<String> {
    CURRENT.try_with(|s| s.trace_id.clone()).ok()
}

/// Establish a fresh trace context (new trace_id, root span_id) and run
/// `f` inside it. Returns the end-of-run [`Report`] alongside `f`'s output.
pub async fn run_with_context<F, Fut, T>(service: &str, f: F) -> (T, Report)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let entries = Arc::new(Mutex::new(Vec::new()));
    let scope = SpanScope {
        trace_id: ids::new_id(ids::prefix::TRACE),
        span_id: ids::new_id(ids::prefix::SPAN),
        parent_span_id: None,
        service: service.to_string(),
        entries: entries.clone(),
    };
    let result = CURRENT.scope(scope, f()).await;
    let snapshot = entries.lock().expect("trace entries lock poisoned").clone();
    let report = generate_report(&snapshot);
    (result, report)
}

/// Inherit the caller's trace_id, mint a new span_id, set parent_span_id
/// to the caller's span_id, and run `f` inside that child span.
///
/// # Panics
/// Panics if called outside an active trace context — callers must nest
/// inside `run_with_context`.
pub async fn run_in_child_span<F, Fut, T>(f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let parent = CURRENT
        .try_with(|s| s.clone())
        .expect("run_in_child_span called outside an active trace context");
    let child = SpanScope {
        trace_id: parent.trace_id.clone(),
        span_id: ids::new_id(ids::prefix::SPAN),
        parent_span_id: Some(parent.span_id.clone()),
        service: parent.service.clone(),
        entries: parent.entries.clone(),
    };
    CURRENT.scope(child, f()).await
}

/// Append an entry to the current context's buffer and write it to the
/// structured sink. A no-op (silently swallowed) when called outside any
/// trace context or when the tracer has not been installed, matching the
/// spec's "buffer append never fails" failure model.
pub fn log(
    event_type: EventType,
    payload: serde_json::Value,
    level: Level,
    function_name: Option<&str>,
    duration_ms: Option<u64>,
    stack: Option<&str>,
) {
    let Ok(scope) = CURRENT.try_with(|s| s.clone()) else {
        return;
    };

    if let Some(tracer) = Tracer::global() {
        if !tracer.config.enabled || level < tracer.config.level {
            return;
        }
        if tracer.config.sampling < 1.0 && rand::random::<f64>() > tracer.config.sampling {
            return;
        }
    }

    let entry = LogEntry {
        timestamp: Utc::now(),
        trace_id: scope.trace_id.clone(),
        span_id: scope.span_id.clone(),
        parent_span_id: scope.parent_span_id.clone(),
        event_type,
        level,
        service: scope.service.clone(),
        function_name: function_name.map(String::from),
        payload,
        duration_ms,
        stack_trace: stack.map(String::from),
    };

    scope
        .entries
        .lock()
        .expect("trace entries lock poisoned")
        .push(entry.clone());

    if let Some(tracer) = Tracer::global() {
        tracer.sink.write(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn child_span_inherits_trace_and_sets_parent() {
        let (_, report) = run_with_context("test-service", || async {
            log(EventType::Point, serde_json::json!({}), Level::Info, None, None, None);
            run_in_child_span(|| async {
                log(EventType::Point, serde_json::json!({}), Level::Info, None, None, None);
            })
            .await;
        })
        .await;

        assert_eq!(report.total_entries, 2);
    }

    #[tokio::test]
    #[should_panic(expected = "active trace context")]
    async fn child_span_outside_context_panics() {
        run_in_child_span(|| async {}).await;
    }

    #[tokio::test]
    async fn log_outside_context_is_swallowed_not_panicking() {
        log(EventType::Point, serde_json::json!({}), Level::Info, None, None, None);
    }
}
