//! Task lifecycle and causal-attribution invariants, exercised against
//! the public supervisor + causal store API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use codecoder::agent::{AgentStep, ScriptedAgent, ToolCallProposal};
use codecoder::causal::CausalStore;
use codecoder::permission::{PermissionEngine, PermissionPolicy, RiskTier};
use codecoder::task::{CreateTaskRequest, TaskContext, TaskState, TaskSupervisor};

fn permissive_engine() -> Arc<PermissionEngine> {
    Arc::new(PermissionEngine::new(PermissionPolicy {
        auto_approve: true,
        auto_approve_threshold: RiskTier::Critical,
        auto_approve_tools: vec![],
        auto_approve_timeout_ms: 0,
    }))
}

fn context() -> TaskContext {
    TaskContext { user_id: "u1".into(), platform: "test".into(), source: "local".into() }
}

async fn wait_for(supervisor: &TaskSupervisor, id: &str, target: TaskState) -> codecoder::task::Task {
    for _ in 0..100 {
        let task = supervisor.get(id).await.unwrap();
        if task.status == target {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never reached {target:?}");
}

#[tokio::test]
async fn tool_call_produces_attributable_decision_action_outcome_chain() {
    let dir = tempfile::tempdir().unwrap();
    let causal = Arc::new(CausalStore::open(dir.path().join("causal.redb")).unwrap());
    let permission = permissive_engine();

    let mut agents: HashMap<String, Arc<dyn codecoder::agent::AgentRuntime>> = HashMap::new();
    agents.insert(
        "echo".into(),
        Arc::new(ScriptedAgent::new(vec![
            AgentStep::ToolCall(ToolCallProposal { tool: "read_file".into(), arguments: serde_json::json!({"path": "a.txt"}) }),
            AgentStep::Done { output: "done".into() },
        ])),
    );

    let supervisor = TaskSupervisor::new(causal.clone(), permission, agents);
    let id = supervisor
        .create(CreateTaskRequest { agent_id: "echo".into(), prompt: "read a file".into(), context: context() })
        .await
        .unwrap();

    let task = wait_for(&supervisor, &id, TaskState::Completed).await;
    assert_eq!(task.output.as_deref(), Some("done"));

    // Every recorded Action has exactly one parent Decision and exactly
    // one resulting Outcome, reachable via get_chain.
    let decisions = causal.stats().unwrap();
    assert_eq!(decisions.decision_count, 1);
    assert_eq!(decisions.action_count, 1);
    assert_eq!(decisions.outcome_count, 1);
}

#[tokio::test]
async fn cancel_transitions_to_terminal_and_is_irreversible() {
    let dir = tempfile::tempdir().unwrap();
    let causal = Arc::new(CausalStore::open(dir.path().join("causal.redb")).unwrap());
    let permission = permissive_engine();

    let mut agents: HashMap<String, Arc<dyn codecoder::agent::AgentRuntime>> = HashMap::new();
    agents.insert(
        "slow".into(),
        Arc::new(ScriptedAgent::new(vec![AgentStep::Done { output: "unreachable".into() }])),
    );

    let supervisor = TaskSupervisor::new(causal, permission, agents);
    let id = supervisor
        .create(CreateTaskRequest { agent_id: "slow".into(), prompt: "work".into(), context: context() })
        .await
        .unwrap();

    supervisor.cancel(&id).await.unwrap();
    let task = supervisor.get(&id).await.unwrap();
    assert!(matches!(task.status, TaskState::Cancelled | TaskState::Completed));

    // A second cancel on an already-terminal task must fail, not silently
    // succeed — terminal states never accept another transition.
    if task.status == TaskState::Cancelled {
        assert!(supervisor.cancel(&id).await.is_err());
    }
}
