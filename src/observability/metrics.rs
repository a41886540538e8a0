//! Prometheus metrics for the task supervisor, permission engine, and
//! causal graph store.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    /// Task transitions by target state.
    pub static ref TASK_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "codecoder_task_transitions_total",
        "Total task state transitions by target state",
        &["state"]
    )
    .unwrap();

    /// Tasks currently in a non-terminal state.
    pub static ref ACTIVE_TASKS: IntGaugeVec = register_int_gauge_vec!(
        "codecoder_active_tasks",
        "Number of tasks not yet in a terminal state",
        &["status"]
    )
    .unwrap();

    /// Task wall-clock duration from creation to terminal state.
    pub static ref TASK_DURATION: HistogramVec = register_histogram_vec!(
        "codecoder_task_duration_seconds",
        "Task duration from creation to terminal state",
        &["outcome"]
    )
    .unwrap();

    /// Permission decisions by risk tier and outcome.
    pub static ref PERMISSION_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "codecoder_permission_decisions_total",
        "Total permission decisions by risk tier and outcome",
        &["risk_tier", "outcome"]
    )
    .unwrap();

    /// Permission decision latency (adaptive risk adjustment + decision procedure).
    pub static ref PERMISSION_DECISION_LATENCY: HistogramVec = register_histogram_vec!(
        "codecoder_permission_decision_duration_seconds",
        "Permission decision latency in seconds",
        &["tool"]
    )
    .unwrap();

    /// Causal graph writes by entity kind.
    pub static ref CAUSAL_WRITES: IntCounterVec = register_int_counter_vec!(
        "codecoder_causal_writes_total",
        "Total causal graph writes by entity kind",
        &["kind"]
    )
    .unwrap();

    /// Agent runtime invocations by outcome.
    pub static ref AGENT_CALLS: IntCounterVec = register_int_counter_vec!(
        "codecoder_agent_calls_total",
        "Total agent runtime invocations by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Agent runtime call latency.
    pub static ref AGENT_LATENCY: HistogramVec = register_histogram_vec!(
        "codecoder_agent_call_duration_seconds",
        "Agent runtime call duration in seconds",
        &["agent_id"]
    )
    .unwrap();

    /// Trace entries dropped by the sink for being over the write budget.
    pub static ref TRACE_ENTRIES_DROPPED: IntCounterVec = register_int_counter_vec!(
        "codecoder_trace_entries_dropped_total",
        "Total trace entries dropped by the sink",
        &["reason"]
    )
    .unwrap();
}

/// Registers all metrics (lazy_static does the actual registration on
/// first access; calling this early makes startup failures visible).
pub fn init_metrics() {
    lazy_static::initialize(&TASK_TRANSITIONS);
    lazy_static::initialize(&ACTIVE_TASKS);
    lazy_static::initialize(&TASK_DURATION);
    lazy_static::initialize(&PERMISSION_DECISIONS);
    lazy_static::initialize(&PERMISSION_DECISION_LATENCY);
    lazy_static::initialize(&CAUSAL_WRITES);
    lazy_static::initialize(&AGENT_CALLS);
    lazy_static::initialize(&AGENT_LATENCY);
    lazy_static::initialize(&TRACE_ENTRIES_DROPPED);
}
