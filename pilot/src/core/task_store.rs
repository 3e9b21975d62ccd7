//! Owner of the single active task.
//!
//! The plan is held as two sequences: `history` (executed steps, append-only)
//! and `remaining` (the unexecuted suffix, the only place new steps can be
//! spliced in). The cursor is `history.len()`, so "entries before the cursor
//! are immutable" holds by construction.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::types::{ProtoStep, StepRecord, StepStatus, TaskRecord, TaskStatus};

#[derive(Debug, Clone)]
struct ActiveTask {
    id: String,
    goal: String,
    history: Vec<StepRecord>,
    remaining: VecDeque<StepRecord>,
    status: TaskStatus,
    created_at: DateTime<Utc>,
}

impl ActiveTask {
    fn snapshot(&self) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            goal: self.goal.clone(),
            steps: self
                .history
                .iter()
                .chain(self.remaining.iter())
                .cloned()
                .collect(),
            current_step_index: self.history.len(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// Explicitly constructed, exclusively owned task state.
///
/// Holds at most one task. Creating a task discards the previous one.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    active: Option<ActiveTask>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active task with a fresh one built from `initial_steps`.
    pub fn create_task(&mut self, goal: &str, initial_steps: Vec<ProtoStep>) -> TaskRecord {
        let task = ActiveTask {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.to_string(),
            history: Vec::new(),
            remaining: initial_steps.into_iter().map(StepRecord::schedule).collect(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        };
        debug!(task_id = %task.id, steps = task.remaining.len(), "task created");
        let snapshot = task.snapshot();
        self.active = Some(task);
        snapshot
    }

    /// The step at the cursor, if any.
    pub fn current_step(&self) -> Option<&StepRecord> {
        self.active.as_ref()?.remaining.front()
    }

    /// Record the outcome of the step at the cursor.
    ///
    /// Success moves the step into history and advances the cursor. Failure
    /// marks the step and the task `failed`; the cursor stays put. Without an
    /// active task, a current step, or once the task has failed, this is a
    /// no-op.
    pub fn complete_current_step(&mut self, success: bool, result: Option<Value>) {
        let Some(task) = self.active.as_mut() else {
            return;
        };
        if task.status == TaskStatus::Failed {
            return;
        }

        if success {
            let Some(mut step) = task.remaining.pop_front() else {
                return;
            };
            step.status = StepStatus::Completed;
            step.result = result;
            task.history.push(step);
            task.status = if task.remaining.is_empty() {
                TaskStatus::Completed
            } else {
                TaskStatus::Running
            };
        } else {
            let Some(step) = task.remaining.front_mut() else {
                return;
            };
            step.status = StepStatus::Failed;
            step.result = result;
            task.status = TaskStatus::Failed;
        }
        debug!(
            cursor = task.history.len(),
            status = task.status.as_str(),
            "step recorded"
        );
    }

    /// Splice new steps in at the cursor so they run next, ahead of anything
    /// already scheduled. Reopens a `completed` task.
    ///
    /// Returns how many steps were inserted. Nothing is inserted into a failed
    /// task.
    pub fn insert_next_steps(&mut self, new_steps: Vec<ProtoStep>) -> usize {
        let Some(task) = self.active.as_mut() else {
            return 0;
        };
        if task.status == TaskStatus::Failed || new_steps.is_empty() {
            return 0;
        }

        let count = new_steps.len();
        for proto in new_steps.into_iter().rev() {
            task.remaining.push_front(StepRecord::schedule(proto));
        }
        if task.status == TaskStatus::Completed {
            task.status = TaskStatus::Running;
        }
        debug!(
            inserted = count,
            cursor = task.history.len(),
            "steps inserted at cursor"
        );
        count
    }

    /// True when there is nothing left to drive: no task, or a terminal status.
    pub fn is_task_complete(&self) -> bool {
        self.active
            .as_ref()
            .is_none_or(|task| task.status.is_terminal())
    }

    pub fn task(&self) -> Option<TaskRecord> {
        self.active.as_ref().map(ActiveTask::snapshot)
    }

    /// Hand the active task back to the caller, leaving the store empty.
    pub fn take_task(&mut self) -> Option<TaskRecord> {
        self.active.take().map(|task| task.snapshot())
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.active.as_ref().map(|task| task.status)
    }

    pub fn current_step_index(&self) -> Option<usize> {
        self.active.as_ref().map(|task| task.history.len())
    }

    /// Total number of steps in the active plan (history plus remaining).
    pub fn step_count(&self) -> usize {
        self.active
            .as_ref()
            .map_or(0, |task| task.history.len() + task.remaining.len())
    }
}
