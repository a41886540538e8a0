//! Task finite state machine.
//!
//! States: pending → running → (awaiting_approval ↔ running)* → terminal.
//! Terminal states (completed, failed, cancelled) are sticky: no transition
//! out of a terminal state is ever legal.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{CodeCoderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn awaiting_action(&self) -> bool {
        matches!(self, TaskState::AwaitingApproval)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::AwaitingApproval => "awaiting_approval",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "running" => Some(TaskState::Running),
            "awaiting_approval" => Some(TaskState::AwaitingApproval),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            "cancelled" => Some(TaskState::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    WorkerClaimed,
    PermissionRequired,
    PermissionGranted,
    PermissionDenied,
    WorkCompleted,
    WorkFailed,
    CancelledByUser,
    CancelledBySystem,
    Custom(String),
}

impl TransitionReason {
    pub fn as_str(&self) -> &str {
        match self {
            TransitionReason::WorkerClaimed => "worker_claimed",
            TransitionReason::PermissionRequired => "permission_required",
            TransitionReason::PermissionGranted => "permission_granted",
            TransitionReason::PermissionDenied => "permission_denied",
            TransitionReason::WorkCompleted => "work_completed",
            TransitionReason::WorkFailed => "work_failed",
            TransitionReason::CancelledByUser => "cancelled_by_user",
            TransitionReason::CancelledBySystem => "cancelled_by_system",
            TransitionReason::Custom(s) => s,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskFsm {
    allowed_transitions: HashSet<(TaskState, TaskState)>,
}

impl TaskFsm {
    pub fn new() -> Self {
        let mut allowed = HashSet::new();

        allowed.insert((TaskState::Pending, TaskState::Running));
        allowed.insert((TaskState::Pending, TaskState::Cancelled));

        allowed.insert((TaskState::Running, TaskState::AwaitingApproval));
        allowed.insert((TaskState::Running, TaskState::Completed));
        allowed.insert((TaskState::Running, TaskState::Failed));
        allowed.insert((TaskState::Running, TaskState::Cancelled));

        allowed.insert((TaskState::AwaitingApproval, TaskState::Running));
        allowed.insert((TaskState::AwaitingApproval, TaskState::Failed));
        allowed.insert((TaskState::AwaitingApproval, TaskState::Cancelled));

        Self {
            allowed_transitions: allowed,
        }
    }

    pub fn can_transition(&self, from: TaskState, to: TaskState) -> bool {
        self.allowed_transitions.contains(&(from, to))
    }

    pub fn transition(
        &self,
        from: TaskState,
        to: TaskState,
        reason: TransitionReason,
    ) -> Result<Transition> {
        if from.is_terminal() {
            return Err(CodeCoderError::TerminalState);
        }

        if !self.can_transition(from, to) {
            return Err(CodeCoderError::TaskTransitionError(format!(
                "illegal task transition: {} -> {}",
                from.as_str(),
                to.as_str()
            )));
        }

        Ok(Transition {
            from,
            to,
            reason,
            timestamp: chrono::Utc::now(),
        })
    }

    pub fn valid_next_states(&self, current: TaskState) -> Vec<TaskState> {
        if current.is_terminal() {
            return vec![];
        }
        self.allowed_transitions
            .iter()
            .filter(|(from, _)| *from == current)
            .map(|(_, to)| *to)
            .collect()
    }
}

impl Default for TaskFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: TaskState,
    pub to: TaskState,
    pub reason: TransitionReason,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Tracks a single task's current state plus its full transition history.
#[derive(Debug, Clone)]
pub struct TaskStateTracker {
    fsm: TaskFsm,
    current_state: TaskState,
    history: Vec<Transition>,
}

impl TaskStateTracker {
    pub fn new() -> Self {
        Self {
            fsm: TaskFsm::new(),
            current_state: TaskState::Pending,
            history: vec![],
        }
    }

    pub fn with_state(state: TaskState) -> Self {
        Self {
            fsm: TaskFsm::new(),
            current_state: state,
            history: vec![],
        }
    }

    pub fn current(&self) -> TaskState {
        self.current_state
    }

    pub fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.current_state.is_active()
    }

    pub fn awaiting_action(&self) -> bool {
        self.current_state.awaiting_action()
    }

    pub fn transition(&mut self, to: TaskState, reason: TransitionReason) -> Result<&Transition> {
        let transition = self.fsm.transition(self.current_state, to, reason)?;
        self.current_state = to;
        self.history.push(transition);
        Ok(self.history.last().unwrap())
    }

    pub fn valid_next_states(&self) -> Vec<TaskState> {
        self.fsm.valid_next_states(self.current_state)
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn claim(&mut self) -> Result<&Transition> {
        self.transition(TaskState::Running, TransitionReason::WorkerClaimed)
    }

    pub fn await_approval(&mut self) -> Result<&Transition> {
        self.transition(TaskState::AwaitingApproval, TransitionReason::PermissionRequired)
    }

    pub fn resume(&mut self) -> Result<&Transition> {
        self.transition(TaskState::Running, TransitionReason::PermissionGranted)
    }

    pub fn complete(&mut self) -> Result<&Transition> {
        self.transition(TaskState::Completed, TransitionReason::WorkCompleted)
    }

    pub fn fail(&mut self, reason: TransitionReason) -> Result<&Transition> {
        self.transition(TaskState::Failed, reason)
    }

    pub fn cancel(&mut self, by_user: bool) -> Result<&Transition> {
        let reason = if by_user {
            TransitionReason::CancelledByUser
        } else {
            TransitionReason::CancelledBySystem
        };
        self.transition(TaskState::Cancelled, reason)
    }
}

impl Default for TaskStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut tracker = TaskStateTracker::new();
        assert_eq!(tracker.current(), TaskState::Pending);

        tracker.claim().unwrap();
        assert_eq!(tracker.current(), TaskState::Running);

        tracker.complete().unwrap();
        assert_eq!(tracker.current(), TaskState::Completed);
        assert!(tracker.is_terminal());
        assert_eq!(tracker.history().len(), 2);
    }

    #[test]
    fn approval_round_trip() {
        let mut tracker = TaskStateTracker::with_state(TaskState::Running);

        tracker.await_approval().unwrap();
        assert_eq!(tracker.current(), TaskState::AwaitingApproval);
        assert!(tracker.awaiting_action());

        tracker.resume().unwrap();
        assert_eq!(tracker.current(), TaskState::Running);

        tracker.complete().unwrap();
        assert_eq!(tracker.current(), TaskState::Completed);
    }

    #[test]
    fn approval_can_repeat() {
        let mut tracker = TaskStateTracker::with_state(TaskState::Running);
        for _ in 0..3 {
            tracker.await_approval().unwrap();
            tracker.resume().unwrap();
        }
        assert_eq!(tracker.current(), TaskState::Running);
        assert_eq!(tracker.history().len(), 6);
    }

    #[test]
    fn cancellation_from_pending() {
        let mut tracker = TaskStateTracker::new();
        tracker.cancel(true).unwrap();
        assert_eq!(tracker.current(), TaskState::Cancelled);
        assert!(tracker.is_terminal());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut tracker = TaskStateTracker::new();
        let result = tracker.transition(TaskState::Completed, TransitionReason::WorkCompleted);
        assert!(result.is_err());
        assert_eq!(tracker.current(), TaskState::Pending);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut tracker = TaskStateTracker::with_state(TaskState::Completed);
        let result = tracker.claim();
        assert!(matches!(result, Err(CodeCoderError::TerminalState)));
    }

    #[test]
    fn valid_next_states_from_awaiting_approval() {
        let tracker = TaskStateTracker::with_state(TaskState::AwaitingApproval);
        let valid = tracker.valid_next_states();
        assert!(valid.contains(&TaskState::Running));
        assert!(valid.contains(&TaskState::Failed));
        assert!(valid.contains(&TaskState::Cancelled));
        assert!(!valid.contains(&TaskState::Completed));
    }

    #[test]
    fn terminal_state_has_no_next_states() {
        let tracker = TaskStateTracker::with_state(TaskState::Failed);
        assert!(tracker.valid_next_states().is_empty());
    }
}
