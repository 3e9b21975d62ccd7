//! Run report: the terminal task record written as JSON after `pilot run`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{TaskRecord, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub status: TaskStatus,
    pub steps_completed: usize,
    /// Id of the step that halted the task, if any.
    pub failed_step: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub task: TaskRecord,
}

impl RunReport {
    pub fn new(task: TaskRecord, finished_at: DateTime<Utc>) -> Self {
        Self {
            status: task.status,
            steps_completed: task.completed_steps().count(),
            failed_step: task.failed_step().map(|step| step.id.clone()),
            finished_at,
            task,
        }
    }
}

/// Load a report from disk.
pub fn load_report(path: &Path) -> Result<RunReport> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse report {}", path.display()))
}

/// Atomically write the report (temp file + rename).
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    debug!(path = %path.display(), status = report.status.as_str(), "writing run report");
    let mut buf = serde_json::to_string_pretty(report)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task_store::TaskStore;
    use crate::core::types::{ProtoStep, StepStatus};
    use serde_json::json;

    fn failed_task() -> TaskRecord {
        let mut store = TaskStore::new();
        store.create_task(
            "send hi",
            vec![ProtoStep::new("enter_chat", "a"), ProtoStep::new("click_send", "b")],
        );
        store.complete_current_step(true, None);
        store.complete_current_step(false, Some(json!({"error": "boom", "kind": "actuation"})));
        store.take_task().expect("task")
    }

    #[test]
    fn summarises_terminal_task() {
        let task = failed_task();
        let failed_id = task.steps[1].id.clone();
        let report = RunReport::new(task, Utc::now());
        assert_eq!(report.status, TaskStatus::Failed);
        assert_eq!(report.steps_completed, 1);
        assert_eq!(report.failed_step, Some(failed_id));
    }

    #[test]
    fn written_report_reloads_and_uses_wire_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out/report.json");
        let report = RunReport::new(failed_task(), Utc::now());

        write_report(&path, &report).expect("write");

        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["status"], json!("failed"));
        assert_eq!(value["task"]["current_step_index"], json!(1));
        assert_eq!(value["task"]["steps"][1]["type"], json!("click_send"));
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = load_report(&path).expect("load");
        assert_eq!(loaded, report);
        assert_eq!(loaded.task.steps[1].status, StepStatus::Failed);
    }
}
