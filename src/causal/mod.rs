//! Causal Graph Store (C6)
//!
//! An append-only Decision → Action → Outcome chain, embedded in a `redb`
//! database so agent memory stays local and dependency-free. Every
//! externally observable side effect an agent causes is attributable to
//! one of these chains; the permission engine and task supervisor write
//! to it synchronously on every transition.

mod analytics;
mod store;

pub use analytics::{AgentInsights, Pattern, SimilarDecision, TrendPoint};
pub use store::{Action, Chain, CausalStore, Decision, Edge, Outcome, Query};
