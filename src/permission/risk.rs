//! Base risk assessment: per-tool tables plus Bash command and
//! Write/Edit path elevation rules.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Safe => "safe",
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(RiskTier::Safe),
            "low" => Some(RiskTier::Low),
            "medium" => Some(RiskTier::Medium),
            "high" => Some(RiskTier::High),
            "critical" => Some(RiskTier::Critical),
            _ => None,
        }
    }
}

static BASE_RISK: Lazy<HashMap<&'static str, RiskTier>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("read_file", RiskTier::Safe);
    m.insert("list_files", RiskTier::Safe);
    m.insert("grep", RiskTier::Safe);
    m.insert("glob", RiskTier::Safe);
    m.insert("web_search", RiskTier::Low);
    m.insert("write_file", RiskTier::Medium);
    m.insert("edit_file", RiskTier::Medium);
    m.insert("http_get", RiskTier::Medium);
    m.insert("http_post", RiskTier::High);
    m.insert("bash", RiskTier::High);
    m.insert("execute", RiskTier::High);
    m
});

/// The tools the remote gate lets bypass approval unconditionally.
pub fn is_safe_tool(tool: &str) -> bool {
    BASE_RISK.get(tool).copied() == Some(RiskTier::Safe)
}

/// Whether `tool` has a registered base risk at all — anything else is
/// "unknown" for the purposes of the remote gate.
pub fn is_known_tool(tool: &str) -> bool {
    BASE_RISK.contains_key(tool)
}

/// Ordered, most-severe-first, Bash command substring rules. The first
/// match wins; unmatched commands fall back to Bash's own default.
struct BashRule {
    pattern: Regex,
    tier: RiskTier,
}

/// The four-tier Bash rule table (spec.md §4.7 minimum rule set).
static BASH_RULES: Lazy<Vec<BashRule>> = Lazy::new(|| {
    let critical = [
        r"\bsudo\b",
        r"rm\s+-rf\s+/(\s|$)",
        r"\b(shutdown|reboot|init)\b",
        r"\b(mkfs|fdisk|dd)\b",
        r"\b(chmod|chown)\s+-R\b.*\s+/(\s|$)",
        r"git\s+push\b.*--force",
    ];
    let high = [
        r"rm\s+-rf\b",
        r"^git\s+push\b",
        r"git\s+reset\s+--hard\b",
        r"curl\b.*-X\s*(POST|PUT|DELETE|PATCH)\b",
        r"^npm\s+publish\b",
        r"^cargo\s+publish\b",
        r"^docker\s+(push|rm|rmi)\b",
    ];
    let medium = [
        r"^git\s+(add|commit|checkout|branch)\b",
        r"^npm\s+(install|uninstall)\b",
        r"^cargo\s+(add|remove)\b",
        r"^mkdir\b",
        r"^touch\b",
    ];
    let low = [
        r"^git\s+(status|log|diff|show)\b",
        r"^curl\b",
        r"^(ls|cat|head|tail|pwd|which|whoami|echo)\b",
    ];

    let mut rules = Vec::new();
    for p in critical {
        rules.push(BashRule { pattern: Regex::new(p).unwrap(), tier: RiskTier::Critical });
    }
    for p in high {
        rules.push(BashRule { pattern: Regex::new(p).unwrap(), tier: RiskTier::High });
    }
    for p in medium {
        rules.push(BashRule { pattern: Regex::new(p).unwrap(), tier: RiskTier::Medium });
    }
    for p in low {
        rules.push(BashRule { pattern: Regex::new(p).unwrap(), tier: RiskTier::Low });
    }
    rules
});

static SENSITIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|/)(\.git/|\.ssh/|\.env$|/etc/|/usr/|/boot/|\.aws/|\.config/gh/)").unwrap()
});

/// Base risk for a tool call, before adaptive adjustment or the
/// remote-source gate are applied.
pub fn assess_tool_risk(tool: &str, arguments: &serde_json::Value) -> RiskTier {
    let base = BASE_RISK.get(tool).copied().unwrap_or(RiskTier::Medium);

    match tool {
        "bash" | "execute" => {
            let command = arguments.get("command").and_then(|v| v.as_str()).unwrap_or("");
            // Spec-mandated default when no rule matches: Bash is High,
            // not whatever happens to sit in the base-risk table.
            bash_severity(command).unwrap_or(RiskTier::High)
        }
        "write_file" | "edit_file" => {
            let path = arguments.get("path").and_then(|v| v.as_str()).unwrap_or("");
            if SENSITIVE_PATH.is_match(path) {
                RiskTier::High
            } else {
                base
            }
        }
        _ => base,
    }
}

fn bash_severity(command: &str) -> Option<RiskTier> {
    BASH_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(command))
        .map(|rule| rule.tier)
}
