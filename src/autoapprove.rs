//! Autoapprove Handlers (C12)
//!
//! Stock permission policies for common deployment shapes, so callers
//! don't hand-assemble a [`PermissionPolicy`] for the common cases.

use crate::permission::{PermissionPolicy, RiskTier};

/// Nothing above Low auto-approves; everything else defers to a human.
/// The right default for an interactive session with a human at the
/// keyboard.
pub fn safe_only() -> PermissionPolicy {
    PermissionPolicy {
        auto_approve: true,
        auto_approve_threshold: RiskTier::Low,
        auto_approve_tools: vec![],
        auto_approve_timeout_ms: 0,
    }
}

/// Auto-approves through High risk. Intended for sandboxed or
/// disposable environments only — never pair with an unattended run.
pub fn permissive() -> PermissionPolicy {
    PermissionPolicy {
        auto_approve: true,
        auto_approve_threshold: RiskTier::High,
        auto_approve_tools: vec![],
        auto_approve_timeout_ms: 0,
    }
}

/// Reads `CODECODER_AUTO_APPROVE_THRESHOLD` (low|medium|high|critical) and
/// `CODECODER_AUTO_APPROVE_TIMEOUT_MS`, falling back to [`safe_only`] when
/// unset or unparseable. `critical` is refused outright and clamped down
/// to `high` — an unattended, env-driven deployment must never auto-approve
/// the tier the permission engine always rejects anyway.
pub fn from_env() -> PermissionPolicy {
    let mut policy = safe_only();

    if let Ok(threshold) = std::env::var("CODECODER_AUTO_APPROVE_THRESHOLD") {
        if let Some(tier) = RiskTier::from_str(&threshold.to_lowercase()) {
            policy.auto_approve_threshold = if tier == RiskTier::Critical { RiskTier::High } else { tier };
        }
    }

    if let Ok(timeout) = std::env::var("CODECODER_AUTO_APPROVE_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            policy.auto_approve_timeout_ms = ms;
        }
    }

    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_only_caps_at_low() {
        assert_eq!(safe_only().auto_approve_threshold, RiskTier::Low);
    }

    #[test]
    fn permissive_caps_at_high() {
        assert_eq!(permissive().auto_approve_threshold, RiskTier::High);
    }

    #[test]
    fn from_env_clamps_critical_threshold_to_high() {
        std::env::set_var("CODECODER_AUTO_APPROVE_THRESHOLD", "critical");
        let policy = from_env();
        std::env::remove_var("CODECODER_AUTO_APPROVE_THRESHOLD");
        assert_eq!(policy.auto_approve_threshold, RiskTier::High);
    }
}
