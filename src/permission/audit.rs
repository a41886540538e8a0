//! In-memory audit ring buffer for permission decisions.
//!
//! Bounded at 1000 entries with FIFO eviction — enough to answer "what did
//! the engine just do" without becoming an unbounded log sink; durable
//! history lives in the causal graph instead.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::risk::RiskTier;
use super::PermissionOutcome;

const MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tool: String,
    pub risk_tier: RiskTier,
    pub outcome: PermissionOutcome,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(tool: &str, risk_tier: RiskTier, outcome: PermissionOutcome, reason: &str) -> Self {
        Self {
            tool: tool.to_string(),
            risk_tier,
            outcome,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }
}

pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(MAX_ENTRIES)),
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock().expect("audit log lock poisoned");
        if entries.len() >= MAX_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().expect("audit log lock poisoned");
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("audit log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let log = AuditLog::new();
        for i in 0..(MAX_ENTRIES + 10) {
            log.record(AuditEntry::new(
                &format!("tool-{i}"),
                RiskTier::Low,
                PermissionOutcome::AutoApproved,
                "test",
            ));
        }
        assert_eq!(log.len(), MAX_ENTRIES);
        let recent = log.recent(1);
        assert_eq!(recent[0].tool, format!("tool-{}", MAX_ENTRIES + 9));
    }
}
