//! The Task Supervisor (C8): lifecycle management, worker pool, and
//! per-task event fanout.
//!
//! Every task's run loop alternates between driving its [`AgentRuntime`]
//! and gating each proposed tool call through the [`PermissionEngine`],
//! recording a Decision → Action → Outcome triple in the causal graph on
//! every gate. An `execute_with_progress`-style background task streams
//! updates over a bounded channel, except here gating can pause the loop
//! mid-task awaiting a human.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::{AgentRequest, AgentRuntime, AgentStep, ToolCallResult};
use crate::causal::{Action, CausalStore, Decision, Outcome};
use crate::ids;
use crate::observability::metrics::{ACTIVE_TASKS, TASK_DURATION, TASK_TRANSITIONS};
use crate::permission::{ExecutionContext, PermissionEngine, PermissionOutcome, ToolCallRequest};
use crate::{CodeCoderError, Result};

use super::fsm::{TaskState, TaskStateTracker, TransitionReason};
use super::types::{CreateTaskRequest, PendingPermission, Task, TaskEvent, TaskId};

/// Default bound on each subscriber's event channel; a slow consumer
/// drops events rather than stalling the task's run loop.
const DEFAULT_EVENT_CHANNEL: usize = 256;

struct TaskRecord {
    task: Task,
    tracker: TaskStateTracker,
    subscribers: Vec<mpsc::Sender<TaskEvent>>,
    cancellation: CancellationToken,
    pending_approval: Option<oneshot::Sender<bool>>,
}

pub struct TaskSupervisor {
    tasks: AsyncMutex<HashMap<TaskId, TaskRecord>>,
    semaphore: Arc<tokio::sync::Semaphore>,
    causal: Arc<CausalStore>,
    permission: Arc<PermissionEngine>,
    agents: HashMap<String, Arc<dyn AgentRuntime>>,
    event_channel_capacity: usize,
    session_counter: AtomicU64,
}

impl TaskSupervisor {
    pub fn new(
        causal: Arc<CausalStore>,
        permission: Arc<PermissionEngine>,
        agents: HashMap<String, Arc<dyn AgentRuntime>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks: AsyncMutex::new(HashMap::new()),
            semaphore: Arc::new(tokio::sync::Semaphore::new(num_cpus::get())),
            causal,
            permission,
            agents,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL,
            session_counter: AtomicU64::new(0),
        })
    }

    pub async fn create(self: &Arc<Self>, req: CreateTaskRequest) -> Result<TaskId> {
        if !self.agents.contains_key(&req.agent_id) {
            return Err(CodeCoderError::NotFound(format!("unknown agent '{}'", req.agent_id)));
        }

        let task = Task::new(req);
        let task_id = task.id.clone();
        let cancellation = CancellationToken::new();

        {
            let mut tasks = self.tasks.lock().await;
            tasks.insert(
                task_id.clone(),
                TaskRecord {
                    task,
                    tracker: TaskStateTracker::new(),
                    subscribers: Vec::new(),
                    cancellation: cancellation.clone(),
                    pending_approval: None,
                },
            );
        }
        ACTIVE_TASKS.with_label_values(&["pending"]).inc();

        let supervisor = Arc::clone(self);
        let task_id_for_worker = task_id.clone();
        tokio::spawn(async move {
            supervisor.run_task(task_id_for_worker, cancellation).await;
        });

        Ok(task_id)
    }

    pub async fn get(&self, id: &str) -> Result<Task> {
        let tasks = self.tasks.lock().await;
        tasks.get(id).map(|r| r.task.clone()).ok_or_else(|| CodeCoderError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<Task> {
        let tasks = self.tasks.lock().await;
        tasks.values().map(|r| r.task.clone()).collect()
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let record = tasks.get(id).ok_or_else(|| CodeCoderError::NotFound(id.to_string()))?;
        if !record.tracker.is_terminal() {
            return Err(CodeCoderError::StateConflict("cannot delete a non-terminal task".to_string()));
        }
        tasks.remove(id);
        Ok(())
    }

    pub async fn cancel(&self, id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let record = tasks.get_mut(id).ok_or_else(|| CodeCoderError::NotFound(id.to_string()))?;
        record.cancellation.cancel();
        let transition = record.tracker.cancel(true)?.clone();
        record.task.status = transition.to;
        record.task.touch();
        broadcast(record, TaskEvent::Cancelled { task_id: id.to_string(), timestamp: chrono::Utc::now() });
        Ok(())
    }

    /// Resolve a task's `AwaitingApproval` state with a human decision.
    pub async fn interact(&self, id: &str, approved: bool) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let record = tasks.get_mut(id).ok_or_else(|| CodeCoderError::NotFound(id.to_string()))?;
        let sender = record
            .pending_approval
            .take()
            .ok_or_else(|| CodeCoderError::StateConflict("task is not awaiting approval".to_string()))?;
        let _ = sender.send(approved);
        Ok(())
    }

    /// Subscribe to a task's event stream. The channel is bounded at
    /// [`DEFAULT_EVENT_CHANNEL`]; once full, further events for this
    /// subscriber are dropped rather than blocking the task's run loop.
    pub async fn subscribe(&self, id: &str) -> Result<mpsc::Receiver<TaskEvent>> {
        let mut tasks = self.tasks.lock().await;
        let record = tasks.get_mut(id).ok_or_else(|| CodeCoderError::NotFound(id.to_string()))?;
        let (tx, rx) = mpsc::channel(self.event_channel_capacity);
        record.subscribers.push(tx);
        Ok(rx)
    }

    async fn run_task(self: Arc<Self>, task_id: TaskId, cancellation: CancellationToken) {
        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };

        let session_id = format!("sess_{}", self.session_counter.fetch_add(1, Ordering::Relaxed));
        let (agent_id, prompt) = {
            let mut tasks = self.tasks.lock().await;
            let Some(record) = tasks.get_mut(&task_id) else { return };
            let transition = match record.tracker.claim() {
                Ok(t) => t.clone(),
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "failed to claim task");
                    return;
                }
            };
            record.task.status = transition.to;
            record.task.touch();
            TASK_TRANSITIONS.with_label_values(&[transition.to.as_str()]).inc();
            ACTIVE_TASKS.with_label_values(&["pending"]).dec();
            ACTIVE_TASKS.with_label_values(&["running"]).inc();
            broadcast(
                record,
                TaskEvent::StateChanged {
                    task_id: task_id.clone(),
                    from: transition.from,
                    to: transition.to,
                    timestamp: transition.timestamp,
                },
            );
            (record.task.agent_id.clone(), record.task.prompt.clone())
        };

        let Some(agent) = self.agents.get(&agent_id).cloned() else {
            self.finish_failed(&task_id, "agent not found at dispatch time".to_string()).await;
            return;
        };

        let started_at = std::time::Instant::now();
        let result = self.drive_agent(&task_id, &session_id, agent, prompt, &cancellation).await;

        match result {
            Ok(output) => self.finish_completed(&task_id, output).await,
            Err(e) => self.finish_failed(&task_id, e.to_string()).await,
        }
        TASK_DURATION
            .with_label_values(&[if cancellation.is_cancelled() { "cancelled" } else { "finished" }])
            .observe(started_at.elapsed().as_secs_f64());
    }

    async fn drive_agent(
        &self,
        task_id: &str,
        session_id: &str,
        agent: Arc<dyn AgentRuntime>,
        prompt: String,
        cancellation: &CancellationToken,
    ) -> Result<String> {
        let mut prior_tool_results: Vec<ToolCallResult> = Vec::new();

        loop {
            if cancellation.is_cancelled() {
                return Err(CodeCoderError::StateConflict("task cancelled".to_string()));
            }

            let step = agent
                .step(AgentRequest { prompt: prompt.clone(), prior_tool_results: prior_tool_results.clone() })
                .await?;

            match step {
                AgentStep::Done { output } => return Ok(output),
                AgentStep::ToolCall(proposal) => {
                    let decision_id = ids::new_id(ids::prefix::DECISION);
                    self.causal.record_decision(&Decision {
                        id: decision_id.clone(),
                        agent_id: self.agent_id_for(task_id).await,
                        session_id: session_id.to_string(),
                        task_id: Some(task_id.to_string()),
                        summary: format!("proposed tool call: {}", proposal.tool),
                        rationale: "agent runtime proposed this tool call".to_string(),
                        options_considered: vec![proposal.tool.clone()],
                        chosen_option: proposal.tool.clone(),
                        confidence: 1.0,
                        timestamp: chrono::Utc::now(),
                    })?;

                    let decision = self.permission.decide(
                        &ToolCallRequest { tool: proposal.tool.clone(), arguments: proposal.arguments.clone() },
                        &ExecutionContext::default(),
                    );

                    let approved = match decision.outcome {
                        PermissionOutcome::Rejected => false,
                        PermissionOutcome::AutoApproved | PermissionOutcome::TimeoutApproved => true,
                        PermissionOutcome::DeferToHuman => {
                            self.await_human_approval(task_id, &proposal.tool).await?
                        }
                    };

                    let action_id = ids::new_id(ids::prefix::ACTION);
                    self.causal.record_action(&Action {
                        id: action_id.clone(),
                        decision_id,
                        agent_id: self.agent_id_for(task_id).await,
                        tool: proposal.tool.clone(),
                        arguments: proposal.arguments.clone(),
                        risk_tier: decision.risk_tier.as_str().to_string(),
                        timestamp: chrono::Utc::now(),
                    })?;

                    self.causal.record_outcome(&Outcome {
                        id: ids::new_id(ids::prefix::OUTCOME),
                        action_id,
                        success: approved,
                        summary: if approved {
                            "approved".to_string()
                        } else {
                            "denied".to_string()
                        },
                        error: (!approved).then(|| decision.reason.clone()),
                        timestamp: chrono::Utc::now(),
                    })?;

                    prior_tool_results.push(ToolCallResult {
                        tool: proposal.tool,
                        output: serde_json::json!({"approved": approved}),
                        is_error: !approved,
                    });
                }
            }
        }
    }

    async fn await_human_approval(&self, task_id: &str, tool: &str) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        {
            let mut tasks = self.tasks.lock().await;
            let record = tasks.get_mut(task_id).ok_or_else(|| CodeCoderError::NotFound(task_id.to_string()))?;
            let transition = record.tracker.await_approval()?;
            record.task.status = transition.to;
            record.task.touch();
            let permission = PendingPermission {
                permission_id: ids::new_id(ids::prefix::PERMISSION),
                tool: tool.to_string(),
                summary: format!("approve use of tool '{tool}'?"),
                requested_at: chrono::Utc::now(),
            };
            record.task.pending_permission = Some(permission.clone());
            record.pending_approval = Some(tx);
            broadcast(
                record,
                TaskEvent::PermissionRequested {
                    task_id: task_id.to_string(),
                    permission,
                    timestamp: chrono::Utc::now(),
                },
            );
        }

        let approved = rx.await.unwrap_or(false);

        {
            let mut tasks = self.tasks.lock().await;
            if let Some(record) = tasks.get_mut(task_id) {
                record.task.pending_permission = None;
                let reason = if approved {
                    TransitionReason::PermissionGranted
                } else {
                    TransitionReason::PermissionDenied
                };
                if approved {
                    record.tracker.resume()?;
                    record.task.status = TaskState::Running;
                }
                let _ = reason;
                record.task.touch();
            }
        }

        Ok(approved)
    }

    async fn agent_id_for(&self, task_id: &str) -> String {
        self.tasks
            .lock()
            .await
            .get(task_id)
            .map(|r| r.task.agent_id.clone())
            .unwrap_or_default()
    }

    async fn finish_completed(&self, task_id: &str, output: String) {
        let mut tasks = self.tasks.lock().await;
        let Some(record) = tasks.get_mut(task_id) else { return };
        match record.tracker.complete().map(|t| t.clone()) {
            Ok(transition) => {
                record.task.status = transition.to;
                record.task.output = Some(output.clone());
                record.task.touch();
                TASK_TRANSITIONS.with_label_values(&[transition.to.as_str()]).inc();
                ACTIVE_TASKS.with_label_values(&["running"]).dec();
                broadcast(
                    record,
                    TaskEvent::Completed { task_id: task_id.to_string(), output, timestamp: chrono::Utc::now() },
                );
            }
            Err(e) => error!(task_id = %task_id, error = %e, "failed to mark task completed"),
        }
    }

    async fn finish_failed(&self, task_id: &str, error: String) {
        let mut tasks = self.tasks.lock().await;
        let Some(record) = tasks.get_mut(task_id) else { return };
        if record.tracker.current() == TaskState::Cancelled {
            return;
        }
        match record.tracker.fail(TransitionReason::WorkFailed).map(|t| t.clone()) {
            Ok(transition) => {
                record.task.status = transition.to;
                record.task.error = Some(error.clone());
                record.task.touch();
                TASK_TRANSITIONS.with_label_values(&[transition.to.as_str()]).inc();
                ACTIVE_TASKS.with_label_values(&["running"]).dec();
                broadcast(
                    record,
                    TaskEvent::Failed { task_id: task_id.to_string(), error, timestamp: chrono::Utc::now() },
                );
            }
            Err(e) => error!(task_id = %task_id, error = %e, "failed to mark task failed"),
        }
    }
}

/// Send to every subscriber; a full channel (slow consumer) drops the
/// event for that subscriber only, never blocking the run loop.
fn broadcast(record: &mut TaskRecord, event: TaskEvent) {
    record.subscribers.retain(|tx| {
        if tx.is_closed() {
            return false;
        }
        if tx.try_send(event.clone()).is_err() {
            info!("dropped task event for a slow subscriber");
        }
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentStep, ScriptedAgent, ToolCallProposal};
    use crate::permission::{PermissionEngine, PermissionPolicy, RiskTier};
    use crate::task::types::TaskContext;
    use std::time::Duration;

    fn supervisor(agents: HashMap<String, Arc<dyn AgentRuntime>>) -> Arc<TaskSupervisor> {
        let dir = tempfile::tempdir().unwrap();
        let causal = Arc::new(CausalStore::open(dir.path().join("c.redb")).unwrap());
        let permission = Arc::new(PermissionEngine::new(PermissionPolicy {
            auto_approve: true,
            auto_approve_threshold: RiskTier::High,
            ..Default::default()
        }));
        TaskSupervisor::new(causal, permission, agents)
    }

    fn context() -> TaskContext {
        TaskContext { user_id: "u1".into(), platform: "cli".into(), source: "test".into() }
    }

    #[tokio::test]
    async fn task_completes_with_no_tool_calls() {
        let mut agents: HashMap<String, Arc<dyn AgentRuntime>> = HashMap::new();
        agents.insert(
            "echo".to_string(),
            Arc::new(ScriptedAgent::new(vec![AgentStep::Done { output: "hello".into() }])),
        );
        let supervisor = supervisor(agents);

        let id = supervisor
            .create(CreateTaskRequest { agent_id: "echo".into(), prompt: "hi".into(), context: context() })
            .await
            .unwrap();

        for _ in 0..50 {
            let task = supervisor.get(&id).await.unwrap();
            if task.status == TaskState::Completed {
                assert_eq!(task.output.as_deref(), Some("hello"));
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never completed");
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected_at_create() {
        let supervisor = supervisor(HashMap::new());
        let result = supervisor
            .create(CreateTaskRequest { agent_id: "ghost".into(), prompt: "hi".into(), context: context() })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn deferred_tool_call_waits_for_interact() {
        let mut agents: HashMap<String, Arc<dyn AgentRuntime>> = HashMap::new();
        agents.insert(
            "agent".to_string(),
            Arc::new(ScriptedAgent::new(vec![
                AgentStep::ToolCall(ToolCallProposal {
                    tool: "bash".into(),
                    arguments: serde_json::json!({"command": "rm -rf build/"}),
                }),
                AgentStep::Done { output: "done".into() },
            ])),
        );

        let dir = tempfile::tempdir().unwrap();
        let causal = Arc::new(CausalStore::open(dir.path().join("c.redb")).unwrap());
        let permission = Arc::new(PermissionEngine::new(PermissionPolicy::default()));
        let supervisor = TaskSupervisor::new(causal, permission, agents);

        let id = supervisor
            .create(CreateTaskRequest { agent_id: "agent".into(), prompt: "clean".into(), context: context() })
            .await
            .unwrap();

        let mut awaiting = false;
        for _ in 0..50 {
            let task = supervisor.get(&id).await.unwrap();
            if task.status == TaskState::AwaitingApproval {
                awaiting = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(awaiting, "task never reached awaiting_approval");

        supervisor.interact(&id, true).await.unwrap();

        for _ in 0..50 {
            let task = supervisor.get(&id).await.unwrap();
            if task.status == TaskState::Completed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never completed after approval");
    }
}
