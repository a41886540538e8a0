//! The agent-runtime seam the task supervisor drives.
//!
//! An `AgentRuntime` turns a task's prompt into output, proposing tool
//! calls along the way. The supervisor gates each proposed tool call
//! through the permission engine before the runtime is allowed to act on
//! its result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A tool invocation an agent wants to make, surfaced to the supervisor
/// for permission evaluation before it is carried out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallProposal {
    pub tool: String,
    pub arguments: serde_json::Value,
}

/// The result handed back to the agent after a tool call proposal has
/// been evaluated and (if approved) executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool: String,
    pub output: serde_json::Value,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub prompt: String,
    pub prior_tool_results: Vec<ToolCallResult>,
}

/// One step of an agent's run: either it proposes a tool call (the
/// supervisor gates it and calls back in with the result), or it's done.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStep {
    ToolCall(ToolCallProposal),
    Done { output: String },
}

/// External-collaborator seam: anything that can take a task's prompt
/// (plus the results of tool calls the supervisor already approved and
/// ran) and produce the next step.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn step(&self, request: AgentRequest) -> Result<AgentStep>;

    /// Cheap liveness probe used before a task is dispatched to this
    /// agent; runtimes backed by a remote provider should check
    /// connectivity/credentials here rather than failing mid-task.
    async fn is_available(&self) -> bool {
        true
    }
}

/// A deterministic test double: replays a fixed script of steps on each
/// call, ignoring the request. Used by supervisor and permission-engine
/// tests that need a predictable agent without a live LLM provider.
pub struct ScriptedAgent {
    steps: std::sync::Mutex<std::collections::VecDeque<AgentStep>>,
}

impl ScriptedAgent {
    pub fn new(steps: Vec<AgentStep>) -> Self {
        Self {
            steps: std::sync::Mutex::new(steps.into()),
        }
    }
}

#[async_trait]
impl AgentRuntime for ScriptedAgent {
    async fn step(&self, _request: AgentRequest) -> Result<AgentStep> {
        let mut steps = self.steps.lock().expect("scripted agent lock poisoned");
        Ok(steps
            .pop_front()
            .unwrap_or(AgentStep::Done { output: String::new() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_agent_replays_in_order() {
        let agent = ScriptedAgent::new(vec![
            AgentStep::ToolCall(ToolCallProposal {
                tool: "bash".into(),
                arguments: serde_json::json!({"command": "ls"}),
            }),
            AgentStep::Done { output: "done".into() },
        ]);

        let req = AgentRequest {
            prompt: "list files".into(),
            prior_tool_results: vec![],
        };

        match agent.step(req.clone()).await.unwrap() {
            AgentStep::ToolCall(p) => assert_eq!(p.tool, "bash"),
            _ => panic!("expected tool call"),
        }
        match agent.step(req).await.unwrap() {
            AgentStep::Done { output } => assert_eq!(output, "done"),
            _ => panic!("expected done"),
        }
    }
}
