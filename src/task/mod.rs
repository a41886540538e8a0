//! Task Supervisor (C8)
//!
//! Owns task lifecycle (create/get/list/cancel/delete), drives each
//! task's agent loop against the permission engine and causal graph, and
//! fans state changes out to subscribers.

pub mod fsm;
pub mod supervisor;
pub mod types;

pub use fsm::{TaskFsm, TaskState, TaskStateTracker, Transition, TransitionReason};
pub use supervisor::TaskSupervisor;
pub use types::{CreateTaskRequest, PendingPermission, Task, TaskContext, TaskEvent, TaskId};
