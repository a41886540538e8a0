//! Observability Tracer (C2)
//!
//! Per-task structured logging with trace/span propagation and end-of-run
//! reports. Ordinary process logs go through `tracing` and
//! `tracing-subscriber`, while this module owns the durable, queryable
//! trace/span record (JSONL sink, report generation) a task's causal
//! history needs independent of process log verbosity.

pub(crate) mod metrics;
mod report;
mod sink;
mod tracer;

pub use metrics::init_metrics;
pub use report::{ApiCallSpan, ErrorDigest, Report, TimelineEntry};
pub use sink::TraceSink;
pub use tracer::{
    current_trace_id, log, run_in_child_span, run_with_context, EventType, Level, LogEntry,
    Tracer, TracerConfig,
};
