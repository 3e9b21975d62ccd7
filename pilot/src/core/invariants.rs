//! Structural invariants of a task snapshot.

use std::collections::HashSet;

use super::types::{StepStatus, TaskRecord, TaskStatus};

/// Check invariants the task store is expected to maintain:
/// - No duplicate step ids
/// - `current_step_index <= steps.len()`
/// - Steps before the cursor are completed
/// - Steps after the cursor are pending
/// - The step at the cursor is failed iff the task failed
/// - `completed` implies the cursor is at the end
pub fn validate_task(task: &TaskRecord) -> Vec<String> {
    let mut errors = Vec::new();
    let cursor = task.current_step_index;

    let mut seen = HashSet::new();
    for step in &task.steps {
        if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }
    }

    if cursor > task.steps.len() {
        errors.push(format!(
            "cursor {} exceeds step count {}",
            cursor,
            task.steps.len()
        ));
        return errors;
    }

    for (idx, step) in task.steps.iter().enumerate() {
        let expected_ok = if idx < cursor {
            step.status == StepStatus::Completed
        } else if idx == cursor && task.status == TaskStatus::Failed {
            step.status == StepStatus::Failed
        } else {
            step.status == StepStatus::Pending
        };
        if !expected_ok {
            errors.push(format!(
                "step {} ('{}') has status {:?} with cursor {} and task {}",
                idx,
                step.kind,
                step.status,
                cursor,
                task.status.as_str()
            ));
        }
    }

    if task.status == TaskStatus::Completed && cursor != task.steps.len() {
        errors.push(format!(
            "task completed with cursor {} of {}",
            cursor,
            task.steps.len()
        ));
    }

    errors
}
