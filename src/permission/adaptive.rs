//! Adaptive risk adjustment: the base tier from [`super::risk`] is raised
//! (never lowered) based on the execution context the call arrives in.

use super::risk::RiskTier;
use super::ExecutionContext;

/// Repeated recent denials for the same tool are a signal the agent is
/// probing for a path around an earlier rejection; each one ratchets the
/// tier up by one step.
const DENIALS_PER_ESCALATION: u32 = 2;

pub fn adjust(base: RiskTier, context: &ExecutionContext) -> RiskTier {
    let mut tier = base;

    let escalations = context.recent_denials_for_tool / DENIALS_PER_ESCALATION;
    for _ in 0..escalations {
        tier = step_up(tier);
    }

    if context.is_remote_source && tier < RiskTier::High {
        tier = step_up(tier);
    }

    if context.is_unattended && tier < RiskTier::Medium {
        tier = RiskTier::Medium;
    }

    tier
}

fn step_up(tier: RiskTier) -> RiskTier {
    match tier {
        RiskTier::Safe => RiskTier::Low,
        RiskTier::Low => RiskTier::Medium,
        RiskTier::Medium => RiskTier::High,
        RiskTier::High | RiskTier::Critical => RiskTier::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            is_remote_source: false,
            is_unattended: false,
            recent_denials_for_tool: 0,
        }
    }

    #[test]
    fn remote_source_escalates_by_one_step() {
        let context = ExecutionContext { is_remote_source: true, ..ctx() };
        assert_eq!(adjust(RiskTier::Low, &context), RiskTier::Medium);
    }

    #[test]
    fn repeated_denials_escalate() {
        let context = ExecutionContext { recent_denials_for_tool: 4, ..ctx() };
        assert_eq!(adjust(RiskTier::Low, &context), RiskTier::High);
    }

    #[test]
    fn unattended_floors_at_medium() {
        let context = ExecutionContext { is_unattended: true, ..ctx() };
        assert_eq!(adjust(RiskTier::Low, &context), RiskTier::Medium);
    }

    #[test]
    fn critical_never_deescalates() {
        let context = ctx();
        assert_eq!(adjust(RiskTier::Critical, &context), RiskTier::Critical);
    }
}
