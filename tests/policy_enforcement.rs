//! Permission Engine decision procedure and the stock autoapprove
//! policies, kept in their own file separate from FSM and resilience
//! coverage.

use codecoder::autoapprove;
use codecoder::permission::{ExecutionContext, PermissionEngine, PermissionOutcome, PermissionPolicy, RiskTier, ToolCallRequest};

fn ctx() -> ExecutionContext {
    ExecutionContext { is_remote_source: false, is_unattended: false, recent_denials_for_tool: 0 }
}

fn call(tool: &str) -> ToolCallRequest {
    ToolCallRequest { tool: tool.to_string(), arguments: serde_json::json!({}) }
}

#[test]
fn critical_risk_is_always_rejected_regardless_of_policy() {
    let engine = PermissionEngine::new(PermissionPolicy {
        auto_approve: true,
        auto_approve_threshold: RiskTier::Critical,
        auto_approve_tools: vec!["execute".into()],
        auto_approve_timeout_ms: 60_000,
    });

    let critical_call = ToolCallRequest {
        tool: "bash".to_string(),
        arguments: serde_json::json!({ "command": "rm -rf /" }),
    };
    let decision = engine.decide(&critical_call, &ctx());
    assert_eq!(decision.outcome, PermissionOutcome::Rejected);
}

#[test]
fn remote_source_always_defers_a_dangerous_tool() {
    let engine = PermissionEngine::new(PermissionPolicy {
        auto_approve: true,
        auto_approve_threshold: RiskTier::High,
        auto_approve_tools: vec![],
        auto_approve_timeout_ms: 0,
    });

    let context = ExecutionContext { is_remote_source: true, ..ctx() };
    let decision = engine.decide(&call("bash"), &context);
    assert_eq!(decision.outcome, PermissionOutcome::DeferToHuman);
}

#[test]
fn remote_source_bypasses_safe_tool_regardless_of_policy() {
    let engine = PermissionEngine::new(PermissionPolicy::default());
    let context = ExecutionContext { is_remote_source: true, ..ctx() };
    let decision = engine.decide(&call("read_file"), &context);
    assert_eq!(decision.outcome, PermissionOutcome::AutoApproved);
}

#[test]
fn safe_only_policy_auto_approves_low_and_defers_higher() {
    let engine = PermissionEngine::new(autoapprove::safe_only());

    let low = engine.decide(&call("read_file"), &ctx());
    assert_eq!(low.outcome, PermissionOutcome::AutoApproved);

    let medium = engine.decide(&call("write_file"), &ctx());
    assert_ne!(medium.outcome, PermissionOutcome::AutoApproved);
}

#[test]
fn permissive_policy_auto_approves_through_high() {
    let engine = PermissionEngine::new(autoapprove::permissive());
    let decision = engine.decide(&call("bash"), &ctx());
    assert_eq!(decision.outcome, PermissionOutcome::AutoApproved);
}

#[test]
fn env_driven_policy_never_exceeds_high_threshold() {
    std::env::set_var("CODECODER_AUTO_APPROVE_THRESHOLD", "critical");
    let policy = autoapprove::from_env();
    std::env::remove_var("CODECODER_AUTO_APPROVE_THRESHOLD");

    // from_env clamps an attempted "critical" threshold down; it must
    // never hand back a policy that treats Critical as auto-approvable.
    assert_ne!(policy.auto_approve_threshold, RiskTier::Critical);
}

#[test]
fn repeated_denials_escalate_a_tool_past_its_base_tier() {
    let engine = PermissionEngine::new(PermissionPolicy {
        auto_approve: true,
        auto_approve_threshold: RiskTier::Medium,
        auto_approve_tools: vec![],
        auto_approve_timeout_ms: 0,
    });

    let clean = engine.decide(&call("web_search"), &ctx());
    assert_eq!(clean.outcome, PermissionOutcome::AutoApproved);

    let harassed = ExecutionContext { recent_denials_for_tool: 4, ..ctx() };
    let escalated = engine.decide(&call("web_search"), &harassed);
    assert_ne!(escalated.outcome, PermissionOutcome::AutoApproved);
}
