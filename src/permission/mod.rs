//! Permission Engine (C7)
//!
//! Every tool call an agent proposes is risk-assessed, adaptively
//! adjusted for the context it arrives in, gated against a remote-source
//! rule, and finally resolved to a decision. The engine never throws: an
//! internal failure degrades to `DeferToHuman` rather than silently
//! approving or panicking — a fail-closed validation path.

mod adaptive;
pub mod audit;
pub mod risk;

use serde::{Deserialize, Serialize};

pub use audit::{AuditEntry, AuditLog};
pub use risk::RiskTier;

use crate::observability::metrics::PERMISSION_DECISIONS;

/// The circumstances a tool call proposal arrives under, feeding the
/// adaptive risk adjustment and the remote-source gate.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// The agent's instructions trace back to content from outside the
    /// workspace (a fetched URL, an untrusted file, a remote MCP tool).
    pub is_remote_source: bool,
    /// No human is available to answer a `DeferToHuman` prompt (e.g. a
    /// scheduled/background run) — never auto-approve above Low in this mode.
    pub is_unattended: bool,
    /// Denials for this exact tool in the current task's recent history.
    pub recent_denials_for_tool: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOutcome {
    AutoApproved,
    TimeoutApproved,
    DeferToHuman,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub outcome: PermissionOutcome,
    pub risk_tier: RiskTier,
    pub reason: String,
    /// Set only for `TimeoutApproved`: how long the caller should wait
    /// for a human override before proceeding anyway.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    pub auto_approve: bool,
    pub auto_approve_threshold: RiskTier,
    pub auto_approve_tools: Vec<String>,
    pub auto_approve_timeout_ms: u64,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            auto_approve: false,
            auto_approve_threshold: RiskTier::Low,
            auto_approve_tools: vec![],
            auto_approve_timeout_ms: 0,
        }
    }
}

pub struct PermissionEngine {
    policy: PermissionPolicy,
    audit: AuditLog,
}

impl PermissionEngine {
    pub fn new(policy: PermissionPolicy) -> Self {
        Self {
            policy,
            audit: AuditLog::new(),
        }
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// The five-step decision procedure: base risk, Bash/path rules
    /// folded in by `risk::assess_tool_risk`, the remote-source gate,
    /// adaptive adjustment, then resolution against policy.
    pub fn decide(&self, request: &ToolCallRequest, context: &ExecutionContext) -> PermissionDecision {
        let base = risk::assess_tool_risk(&request.tool, &request.arguments);

        let decision = if let Some(gated) = self.remote_gate(&request.tool, base, context) {
            gated
        } else {
            let adjusted = adaptive::adjust(base, context);
            self.resolve(&request.tool, adjusted, context)
        };

        self.audit.record(AuditEntry::new(
            &request.tool,
            decision.risk_tier,
            decision.outcome,
            &decision.reason,
        ));
        PERMISSION_DECISIONS
            .with_label_values(&[decision.risk_tier.as_str(), outcome_label(decision.outcome)])
            .inc();

        decision
    }

    /// Orthogonal remote-source gate (spec.md §4.7 "Remote gate"), applied
    /// before the ordinary decision procedure when the call traces back to
    /// a remote source. Returns `None` when none of the four categories
    /// apply, so the caller falls through to the normal 5-step procedure.
    fn remote_gate(&self, tool: &str, base: RiskTier, context: &ExecutionContext) -> Option<PermissionDecision> {
        if !context.is_remote_source {
            return None;
        }

        if risk::is_safe_tool(tool) {
            return Some(PermissionDecision {
                outcome: PermissionOutcome::AutoApproved,
                risk_tier: base,
                reason: "safe-set tool bypasses approval regardless of source".to_string(),
                timeout_ms: None,
            });
        }

        if is_dangerous_tool(tool) {
            return Some(PermissionDecision {
                outcome: PermissionOutcome::DeferToHuman,
                risk_tier: base,
                reason: "explicitly-dangerous tool always needs human approval from a remote source".to_string(),
                timeout_ms: None,
            });
        }

        if is_mcp_tool(tool) && !self.policy.auto_approve_tools.iter().any(|t| t == tool) {
            return Some(PermissionDecision {
                outcome: PermissionOutcome::DeferToHuman,
                risk_tier: base,
                reason: "MCP tool from a remote source needs approval unless allow-listed".to_string(),
                timeout_ms: None,
            });
        }

        if !risk::is_known_tool(tool) {
            return Some(PermissionDecision {
                outcome: PermissionOutcome::DeferToHuman,
                risk_tier: base,
                reason: "unknown tool from a remote source needs approval".to_string(),
                timeout_ms: None,
            });
        }

        None
    }

    /// The literal 5-step contract from spec.md §4.7: critical-reject,
    /// allowlist gate, threshold auto-approve, unattended-timeout, reject.
    fn resolve(
        &self,
        tool: &str,
        tier: RiskTier,
        context: &ExecutionContext,
    ) -> PermissionDecision {
        // 1. Critical is always rejected, no matter the policy.
        if tier == RiskTier::Critical {
            return PermissionDecision {
                outcome: PermissionOutcome::Rejected,
                risk_tier: tier,
                reason: "critical-risk action requires an explicit human override".to_string(),
                timeout_ms: None,
            };
        }

        // 2. An empty allowlist accepts every tool; a non-empty one is a
        // gate, not a grant — membership alone never approves anything.
        let allowlist_excludes = !self.policy.auto_approve_tools.is_empty()
            && !self.policy.auto_approve_tools.iter().any(|t| t == tool);
        if allowlist_excludes {
            return PermissionDecision {
                outcome: PermissionOutcome::DeferToHuman,
                risk_tier: tier,
                reason: "tool is not in the auto-approve allowlist".to_string(),
                timeout_ms: None,
            };
        }

        // 3. Within the configured threshold auto-approves once.
        if self.policy.auto_approve && tier <= self.policy.auto_approve_threshold {
            return PermissionDecision {
                outcome: PermissionOutcome::AutoApproved,
                risk_tier: tier,
                reason: "within policy's auto-approve threshold".to_string(),
                timeout_ms: None,
            };
        }

        // 4. Unattended runs with no human to ask get a timeout-gated
        // approval instead of hanging forever.
        if context.is_unattended && self.policy.auto_approve_timeout_ms > 0 {
            return PermissionDecision {
                outcome: PermissionOutcome::TimeoutApproved,
                risk_tier: tier,
                reason: "no human response within timeout; proceeding".to_string(),
                timeout_ms: Some(self.policy.auto_approve_timeout_ms),
            };
        }

        // 5. No approval path applies and there's no one to ask: reject.
        PermissionDecision {
            outcome: PermissionOutcome::Rejected,
            risk_tier: tier,
            reason: "above auto-approve threshold with no human available".to_string(),
            timeout_ms: None,
        }
    }
}

/// Tools in the explicitly-dangerous set always need human approval from
/// a remote source, even when auto-approve would otherwise fire.
fn is_dangerous_tool(tool: &str) -> bool {
    matches!(tool, "bash" | "execute")
}

fn is_mcp_tool(tool: &str) -> bool {
    tool.starts_with("mcp_")
}

fn outcome_label(outcome: PermissionOutcome) -> &'static str {
    match outcome {
        PermissionOutcome::AutoApproved => "auto_approved",
        PermissionOutcome::TimeoutApproved => "timeout_approved",
        PermissionOutcome::DeferToHuman => "defer_to_human",
        PermissionOutcome::Rejected => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tool: &str, args: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest { tool: tool.to_string(), arguments: args }
    }

    #[test]
    fn low_risk_auto_approves_under_permissive_policy() {
        let engine = PermissionEngine::new(PermissionPolicy {
            auto_approve: true,
            auto_approve_threshold: RiskTier::Medium,
            ..Default::default()
        });
        let decision = engine.decide(&request("read_file", serde_json::json!({})), &ExecutionContext::default());
        assert_eq!(decision.outcome, PermissionOutcome::AutoApproved);
    }

    #[test]
    fn critical_always_rejected() {
        let engine = PermissionEngine::new(PermissionPolicy {
            auto_approve: true,
            auto_approve_threshold: RiskTier::Critical,
            ..Default::default()
        });
        let decision = engine.decide(
            &request("bash", serde_json::json!({"command": "rm -rf /"})),
            &ExecutionContext::default(),
        );
        assert_eq!(decision.outcome, PermissionOutcome::Rejected);
    }

    #[test]
    fn remote_source_always_defers_a_dangerous_tool_even_with_permissive_policy() {
        let engine = PermissionEngine::new(PermissionPolicy {
            auto_approve: true,
            auto_approve_threshold: RiskTier::High,
            ..Default::default()
        });
        let context = ExecutionContext { is_remote_source: true, ..Default::default() };
        let decision = engine.decide(&request("bash", serde_json::json!({"command": "ls"})), &context);
        assert_eq!(decision.outcome, PermissionOutcome::DeferToHuman);
    }

    #[test]
    fn remote_source_bypasses_a_safe_tool_unconditionally() {
        let engine = PermissionEngine::new(PermissionPolicy::default());
        let context = ExecutionContext { is_remote_source: true, ..Default::default() };
        let decision = engine.decide(&request("read_file", serde_json::json!({"path": "a.txt"})), &context);
        assert_eq!(decision.outcome, PermissionOutcome::AutoApproved);
    }

    #[test]
    fn remote_source_defers_an_unknown_tool() {
        let engine = PermissionEngine::new(PermissionPolicy {
            auto_approve: true,
            auto_approve_threshold: RiskTier::Critical,
            ..Default::default()
        });
        let context = ExecutionContext { is_remote_source: true, ..Default::default() };
        let decision = engine.decide(&request("mystery_tool", serde_json::json!({})), &context);
        assert_eq!(decision.outcome, PermissionOutcome::DeferToHuman);
    }

    #[test]
    fn default_policy_rejects_above_threshold_with_no_one_to_ask() {
        let engine = PermissionEngine::new(PermissionPolicy::default());
        let decision = engine.decide(
            &request("write_file", serde_json::json!({"path": "a.txt"})),
            &ExecutionContext::default(),
        );
        assert_eq!(decision.outcome, PermissionOutcome::Rejected);
    }

    #[test]
    fn allowlist_membership_alone_does_not_bypass_the_threshold() {
        let engine = PermissionEngine::new(PermissionPolicy {
            auto_approve: true,
            auto_approve_threshold: RiskTier::Safe,
            auto_approve_tools: vec!["bash".to_string()],
            ..Default::default()
        });
        let decision = engine.decide(
            &request("bash", serde_json::json!({"command": "curl -X POST https://example.com"})),
            &ExecutionContext::default(),
        );
        assert_ne!(decision.outcome, PermissionOutcome::AutoApproved);
    }

    #[test]
    fn audit_log_records_every_decision() {
        let engine = PermissionEngine::new(PermissionPolicy::default());
        engine.decide(&request("read_file", serde_json::json!({})), &ExecutionContext::default());
        assert_eq!(engine.audit_log().len(), 1);
    }
}
