//! End-of-run report generation: timeline, api-call pairing, error digest.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::tracer::{EventType, Level, LogEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub depth: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: EventType,
    pub function_name: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallSpan {
    pub function_name: String,
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDigest {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub function_name: Option<String>,
    pub message: String,
    pub stack_excerpt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Report {
    pub total_entries: usize,
    pub function_call_count: usize,
    pub api_call_count: usize,
    pub error_count: usize,
    pub timeline: Vec<TimelineEntry>,
    pub api_calls: Vec<ApiCallSpan>,
    pub errors: Vec<ErrorDigest>,
}

/// Builds a [`Report`] from a trace's full entry set.
///
/// Timeline depth comes from walking each entry's parent_span_id chain.
/// API-call spans are paired by matching each `api_call_end` to the most
/// recent unmatched `api_call_start` whose function_name shares the
/// longest prefix with the end's function_name.
pub fn generate_report(entries: &[LogEntry]) -> Report {
    let depth_of = span_depths(entries);

    let timeline = entries
        .iter()
        .map(|e| TimelineEntry {
            depth: *depth_of.get(&e.span_id).unwrap_or(&0),
            timestamp: e.timestamp,
            event_type: e.event_type,
            function_name: e.function_name.clone(),
            payload: e.payload.clone(),
        })
        .collect();

    let api_calls = pair_api_calls(entries);

    let errors = entries
        .iter()
        .filter(|e| e.level == Level::Error || e.event_type == EventType::Error)
        .map(|e| ErrorDigest {
            timestamp: e.timestamp,
            function_name: e.function_name.clone(),
            message: e
                .payload
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            stack_excerpt: e.stack_trace.as_ref().map(|s| excerpt(s, 3)),
        })
        .collect::<Vec<_>>();

    Report {
        total_entries: entries.len(),
        function_call_count: entries
            .iter()
            .filter(|e| e.event_type == EventType::FunctionStart)
            .count(),
        api_call_count: entries
            .iter()
            .filter(|e| e.event_type == EventType::ApiCallStart)
            .count(),
        error_count: errors.len(),
        timeline,
        api_calls,
        errors,
    }
}

fn span_depths(entries: &[LogEntry]) -> HashMap<String, usize> {
    let mut parent_of: HashMap<String, Option<String>> = HashMap::new();
    for e in entries {
        parent_of
            .entry(e.span_id.clone())
            .or_insert_with(|| e.parent_span_id.clone());
    }

    let mut depths = HashMap::new();
    for span_id in parent_of.keys() {
        depth_of_span(span_id, &parent_of, &mut depths);
    }
    depths
}

fn depth_of_span(
    span_id: &str,
    parent_of: &HashMap<String, Option<String>>,
    cache: &mut HashMap<String, usize>,
) -> usize {
    if let Some(d) = cache.get(span_id) {
        return *d;
    }
    let depth = match parent_of.get(span_id).and_then(|p| p.as_ref()) {
        Some(parent) if parent != span_id => depth_of_span(parent, parent_of, cache) + 1,
        _ => 0,
    };
    cache.insert(span_id.to_string(), depth);
    depth
}

fn pair_api_calls(entries: &[LogEntry]) -> Vec<ApiCallSpan> {
    let mut open: Vec<(usize, &LogEntry)> = Vec::new();
    let mut spans = Vec::new();

    for e in entries {
        match e.event_type {
            EventType::ApiCallStart => open.push((open.len(), e)),
            EventType::ApiCallEnd => {
                let end_name = e.function_name.as_deref().unwrap_or("");
                let best = open
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, (_, start))| {
                        common_prefix_len(start.function_name.as_deref().unwrap_or(""), end_name)
                    })
                    .map(|(idx, _)| idx);

                if let Some(idx) = best {
                    let (_, start) = open.remove(idx);
                    let duration_ms = (e.timestamp - start.timestamp).num_milliseconds();
                    spans.push(ApiCallSpan {
                        function_name: start.function_name.clone().unwrap_or_default(),
                        start: start.timestamp,
                        end: Some(e.timestamp),
                        duration_ms: Some(duration_ms),
                    });
                }
            }
            _ => {}
        }
    }

    for (_, start) in open {
        spans.push(ApiCallSpan {
            function_name: start.function_name.clone().unwrap_or_default(),
            start: start.timestamp,
            end: None,
            duration_ms: None,
        });
    }

    spans
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

fn excerpt(stack: &str, lines: usize) -> String {
    stack.lines().take(lines).collect::<Vec<_>>().join("\n")
}

/// Fixed-column text renderer for [`Report`], depth-indenting the timeline.
pub fn render_pretty(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "entries={} calls={} api_calls={} errors={}\n",
        report.total_entries, report.function_call_count, report.api_call_count, report.error_count
    ));
    out.push_str("-- timeline --\n");
    for entry in &report.timeline {
        let indent = "  ".repeat(entry.depth);
        out.push_str(&format!(
            "{}{:<16} {}{}\n",
            indent,
            format!("{:?}", entry.event_type),
            entry.function_name.as_deref().unwrap_or("-"),
            ""
        ));
    }
    if !report.api_calls.is_empty() {
        out.push_str("-- api calls --\n");
        for call in &report.api_calls {
            match call.duration_ms {
                Some(ms) => out.push_str(&format!("{:<32} {}ms\n", call.function_name, ms)),
                None => out.push_str(&format!("{:<32} (unfinished)\n", call.function_name)),
            }
        }
    }
    if !report.errors.is_empty() {
        out.push_str("-- errors --\n");
        for err in &report.errors {
            out.push_str(&format!(
                "{} {}\n",
                err.function_name.as_deref().unwrap_or("-"),
                err.message
            ));
        }
    }
    out
}
