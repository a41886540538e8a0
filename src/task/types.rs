//! Task entity and request/event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;
use super::fsm::TaskState;

pub type TaskId = String;

/// Where a task's prompt originated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub user_id: String,
    pub platform: String,
    pub source: String,
}

/// A pending permission request blocking task progress, surfaced to
/// whatever is watching the task's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPermission {
    pub permission_id: String,
    pub tool: String,
    pub summary: String,
    pub requested_at: DateTime<Utc>,
}

/// A unit of agent work under supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub agent_id: String,
    pub prompt: String,
    pub context: TaskContext,
    pub status: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub pending_permission: Option<PendingPermission>,
    /// The observability trace this task's execution is recorded under.
    pub trace_id: Option<String>,
    /// The supervisor worker slot currently driving this task, if any.
    pub worker_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub agent_id: String,
    pub prompt: String,
    pub context: TaskContext,
}

impl Task {
    pub fn new(req: CreateTaskRequest) -> Self {
        let now = Utc::now();
        Self {
            id: ids::new_id(ids::prefix::TASK),
            agent_id: req.agent_id,
            prompt: req.prompt,
            context: req.context,
            status: TaskState::Pending,
            created_at: now,
            updated_at: now,
            output: None,
            error: None,
            pending_permission: None,
            trace_id: None,
            worker_id: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Events emitted on a task's per-subscriber fanout channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Created {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
        timestamp: DateTime<Utc>,
    },
    PermissionRequested {
        task_id: TaskId,
        permission: PendingPermission,
        timestamp: DateTime<Utc>,
    },
    Output {
        task_id: TaskId,
        chunk: String,
        timestamp: DateTime<Utc>,
    },
    Completed {
        task_id: TaskId,
        output: String,
        timestamp: DateTime<Utc>,
    },
    Failed {
        task_id: TaskId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },
}
