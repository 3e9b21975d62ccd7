//! Orchestration loop: read the step at the cursor, run it, record the outcome,
//! splice in any follow-up steps, repeat.
//!
//! The loop is strictly sequential and fail-fast: the first step error marks
//! the step and the task `failed` and ends the run.

use std::time::Duration;

use tracing::{error, info, instrument};

use crate::core::budget::bounded;
use crate::core::task_store::TaskStore;
use crate::core::types::{ProtoStep, StepRecord, TaskRecord};
use crate::dispatch::{DispatchSettings, Dispatcher};
use crate::error::{ConfigError, PilotError, PlanningError};
use crate::io::actuation::Actuator;
use crate::io::perception::Perception;
use crate::io::planning::Planner;
use crate::io::prompt::PromptLibrary;

/// How a dispatched step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEventStatus {
    Completed { inserted: usize },
    Failed { error: String },
}

/// Emitted after every dispatched step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEvent {
    /// 1-based position of the step in the plan when it ran.
    pub position: usize,
    /// Plan length when the step ran, before any insertion.
    pub total: usize,
    pub step_id: String,
    pub kind: String,
    pub description: String,
    pub status: StepEventStatus,
}

impl StepEvent {
    fn new(step: &StepRecord, position: usize, total: usize, status: StepEventStatus) -> Self {
        Self {
            position,
            total,
            step_id: step.id.clone(),
            kind: step.kind.clone(),
            description: step.description.clone(),
            status,
        }
    }
}

/// Drive the active task in `store` until it completes, fails, or runs out
/// of steps, and hand the store back.
///
/// `step_delay` is slept after every successful step. `on_step` observes each
/// dispatched step.
pub async fn run_task<P, A, L, F>(
    mut store: TaskStore,
    dispatcher: &Dispatcher<'_, P, A, L>,
    step_delay: Duration,
    mut on_step: F,
) -> TaskStore
where
    P: Perception,
    A: Actuator,
    L: Planner,
    F: FnMut(&StepEvent),
{
    loop {
        if store.is_task_complete() {
            break;
        }
        let Some(step) = store.current_step().cloned() else {
            break;
        };
        let position = store.current_step_index().unwrap_or_default() + 1;
        let total = store.step_count();
        info!(
            step = position,
            total,
            step_type = %step.kind,
            description = %step.description,
            "executing step"
        );

        let outcome = match dispatcher.normalize_environment().await {
            Ok(()) => dispatcher.dispatch(&step).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(outcome) => {
                store.complete_current_step(true, outcome.result);
                let inserted = store.insert_next_steps(outcome.suggestions);
                if inserted > 0 {
                    info!(inserted, "follow-up steps scheduled");
                }
                info!(step = position, "step succeeded");
                on_step(&StepEvent::new(
                    &step,
                    position,
                    total,
                    StepEventStatus::Completed { inserted },
                ));
            }
            Err(err) => {
                error!(
                    step = position,
                    kind = err.kind(),
                    err = %err,
                    "step failed; halting task"
                );
                store.complete_current_step(false, Some(err.to_result()));
                on_step(&StepEvent::new(
                    &step,
                    position,
                    total,
                    StepEventStatus::Failed {
                        error: err.to_string(),
                    },
                ));
                break;
            }
        }

        if !step_delay.is_zero() {
            tokio::time::sleep(step_delay).await;
        }
    }
    store
}

/// Owns the collaborators for one automation session.
pub struct Orchestrator<P, A, L> {
    perception: P,
    actuator: A,
    planner: L,
    prompts: PromptLibrary,
    settings: DispatchSettings,
}

impl<P: Perception, A: Actuator, L: Planner> Orchestrator<P, A, L> {
    pub fn new(
        perception: P,
        actuator: A,
        planner: L,
        prompts: PromptLibrary,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            perception,
            actuator,
            planner,
            prompts,
            settings,
        }
    }

    pub fn perception(&self) -> &P {
        &self.perception
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn dispatcher(&self) -> Dispatcher<'_, P, A, L> {
        Dispatcher::new(
            &self.perception,
            &self.actuator,
            &self.planner,
            &self.prompts,
            &self.settings,
        )
    }

    /// Build the initial plan for `instruction` without running it.
    pub async fn plan(&self, instruction: &str) -> Result<Vec<ProtoStep>, PilotError> {
        if instruction.trim().is_empty() {
            return Err(ConfigError::Invalid("instruction must be non-empty".to_string()).into());
        }
        let steps = bounded(
            "plan",
            self.settings.call_timeout,
            self.planner.plan(instruction),
            PlanningError::Timeout,
        )
        .await?;
        if steps.is_empty() {
            return Err(PlanningError::InvalidPlan("plan has no steps".to_string()).into());
        }
        Ok(steps)
    }

    /// Plan, run and return the terminal task record.
    pub async fn start(&self, instruction: &str) -> Result<TaskRecord, PilotError> {
        self.start_with(instruction, |_| {}).await
    }

    /// [`Self::start`] with a per-step observer.
    #[instrument(skip_all)]
    pub async fn start_with<F: FnMut(&StepEvent)>(
        &self,
        instruction: &str,
        on_step: F,
    ) -> Result<TaskRecord, PilotError> {
        info!(instruction, "starting task");
        let steps = self.plan(instruction).await?;

        let mut store = TaskStore::new();
        let created = store.create_task(instruction, steps);
        info!(task_id = %created.id, steps = created.steps.len(), "task initialized");

        let dispatcher = self.dispatcher();
        let mut store = run_task(store, &dispatcher, self.settings.pacing.step_delay(), on_step).await;

        let task = store.take_task().unwrap_or(created);
        info!(
            task_id = %task.id,
            status = task.status.as_str(),
            steps = task.steps.len(),
            "task finished"
        );
        Ok(task)
    }
}
