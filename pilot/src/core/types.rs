//! Shared deterministic types for the task engine.
//!
//! These records are the stable contract between the task store, the
//! dispatcher and callers of the orchestrator. They carry no I/O handles and
//! serialize to the run report as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

/// Lifecycle status of a task.
///
/// `Failed` is terminal. `Completed` only means the plan is currently
/// exhausted; a later insertion reopens the task to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// A step before it has been scheduled: no id, no status.
///
/// Produced by planners, by the plan expansion policy and by callers building
/// an initial plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoStep {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl ProtoStep {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }
}

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl StepRecord {
    /// Schedule a proto step under a fresh, never-reused id.
    pub fn schedule(proto: ProtoStep) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: proto.kind,
            description: proto.description,
            params: proto.params,
            status: StepStatus::Pending,
            result: None,
        }
    }
}

/// Snapshot of a task: its goal, the full ordered plan and the cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub goal: String,
    pub steps: Vec<StepRecord>,
    pub current_step_index: usize,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Steps that ran to completion, in execution order.
    pub fn completed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
    }

    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(TaskStatus::Completed).unwrap(),
            json!("completed")
        );
        assert_eq!(
            serde_json::to_value(StepStatus::Pending).unwrap(),
            json!("pending")
        );
    }

    #[test]
    fn proto_step_reads_type_field() {
        let proto: ProtoStep = serde_json::from_value(json!({
            "type": "search_contact",
            "description": "find Zhang San",
            "params": { "name": "Zhang San" }
        }))
        .unwrap();
        assert_eq!(proto.kind, "search_contact");
        assert_eq!(proto.params.unwrap()["name"], json!("Zhang San"));
    }

    #[test]
    fn scheduled_steps_get_distinct_ids() {
        let a = StepRecord::schedule(ProtoStep::new("tap", "a"));
        let b = StepRecord::schedule(ProtoStep::new("tap", "b"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, StepStatus::Pending);
        assert!(a.result.is_none());
    }
}
