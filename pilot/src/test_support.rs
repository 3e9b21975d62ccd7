//! Scripted collaborators and fixtures for tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::core::action::{ActionDefaults, ScrollDirection};
use crate::core::types::ProtoStep;
use crate::dispatch::DispatchSettings;
use crate::error::{ActuationError, PerceptionError, PlanningError};
use crate::io::actuation::{Actuator, PointerProbe};
use crate::io::config::{LayoutConfig, PacingConfig, PilotConfig, write_config};
use crate::io::perception::{Perception, Screenshot};
use crate::io::planning::Planner;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("test double mutex poisoned")
}

/// Proto step with `params` taken from a JSON object (anything else means no params).
pub fn proto(kind: &str, params: Value) -> ProtoStep {
    let step = ProtoStep::new(kind, format!("{kind} step"));
    match params {
        Value::Object(map) => step.with_params(map),
        _ => step,
    }
}

/// Dispatch settings with all pacing delays disabled.
pub fn test_settings() -> DispatchSettings {
    DispatchSettings {
        layout: LayoutConfig::default(),
        pacing: PacingConfig {
            step_delay_ms: 0,
            search_delay_ms: 0,
            page_load_delay_ms: 0,
            scroll_render_delay_ms: 0,
            feed_read_delay_ms: 0,
        },
        call_timeout: Duration::from_secs(5),
        defaults: ActionDefaults::default(),
        feed_scroll_magnitude: 1000,
    }
}

/// One recorded `Perception::analyze` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeCall {
    pub instruction: String,
    pub override_prompt: Option<String>,
}

/// Perception that answers `analyze` from a queue of canned replies.
///
/// An exhausted queue is a request error.
#[derive(Debug, Default)]
pub struct ScriptedPerception {
    replies: Mutex<VecDeque<Result<Value, String>>>,
    calls: Mutex<Vec<AnalyzeCall>>,
    captures: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedPerception {
    pub fn new(replies: Vec<Value>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// Queue a failing reply after the ones already scripted.
    pub fn then_fail(self, message: &str) -> Self {
        lock(&self.replies).push_back(Err(message.to_string()));
        self
    }

    /// Make every capture take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<AnalyzeCall> {
        lock(&self.calls).clone()
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Perception for ScriptedPerception {
    async fn capture(&self) -> Result<Screenshot, PerceptionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(Screenshot::new(b"\x89PNG\r\n\x1a\nscripted".to_vec()))
    }

    async fn analyze(
        &self,
        _screenshot: &Screenshot,
        instruction: &str,
        override_prompt: Option<&str>,
    ) -> Result<Value, PerceptionError> {
        lock(&self.calls).push(AnalyzeCall {
            instruction: instruction.to_string(),
            override_prompt: override_prompt.map(str::to_string),
        });
        match lock(&self.replies).pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(PerceptionError::Request(message)),
            None => Err(PerceptionError::Request(
                "no scripted reply left".to_string(),
            )),
        }
    }
}

/// Something the actuator was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actuation {
    Click { x: i32, y: i32 },
    Type(String),
    Scroll(ScrollDirection, u32),
    Normalize,
}

/// Actuator that records every request and simulates the pointer.
///
/// Clicks move the simulated pointer to the click position; tests can move
/// it elsewhere with [`RecordingActuator::set_pointer`] to imitate a human.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    actions: Mutex<Vec<Actuation>>,
    pointer: Mutex<(i32, i32)>,
    fail_click: Mutex<Option<String>>,
    fail_normalize: Mutex<Option<String>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded, including window normalization.
    pub fn actions(&self) -> Vec<Actuation> {
        lock(&self.actions).clone()
    }

    /// Input actions only (clicks, typing, scrolling).
    pub fn inputs(&self) -> Vec<Actuation> {
        self.actions()
            .into_iter()
            .filter(|action| *action != Actuation::Normalize)
            .collect()
    }

    pub fn set_pointer(&self, x: i32, y: i32) {
        *lock(&self.pointer) = (x, y);
    }

    pub fn fail_next_click(&self, message: &str) {
        *lock(&self.fail_click) = Some(message.to_string());
    }

    pub fn fail_normalize(&self, message: &str) {
        *lock(&self.fail_normalize) = Some(message.to_string());
    }

    fn record(&self, action: Actuation) {
        lock(&self.actions).push(action);
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn point_click(&self, x: i32, y: i32) -> Result<(), ActuationError> {
        if let Some(message) = lock(&self.fail_click).take() {
            return Err(ActuationError::Command(message));
        }
        self.set_pointer(x, y);
        self.record(Actuation::Click { x, y });
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), ActuationError> {
        self.record(Actuation::Type(text.to_string()));
        Ok(())
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        magnitude: u32,
    ) -> Result<(), ActuationError> {
        self.record(Actuation::Scroll(direction, magnitude));
        Ok(())
    }

    async fn normalize_environment(&self) -> Result<(), ActuationError> {
        if let Some(message) = lock(&self.fail_normalize).clone() {
            return Err(ActuationError::Command(message));
        }
        self.record(Actuation::Normalize);
        Ok(())
    }
}

#[async_trait]
impl PointerProbe for RecordingActuator {
    async fn pointer_position(&self) -> Result<(i32, i32), ActuationError> {
        Ok(*lock(&self.pointer))
    }
}

/// Planner returning a fixed plan (or a fixed failure) and recording goals.
#[derive(Debug)]
pub struct ScriptedPlanner {
    plan: Result<Vec<ProtoStep>, String>,
    goals: Mutex<Vec<String>>,
}

impl Default for ScriptedPlanner {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScriptedPlanner {
    pub fn new(steps: Vec<ProtoStep>) -> Self {
        Self {
            plan: Ok(steps),
            goals: Mutex::new(Vec::new()),
        }
    }

    /// Planner whose every answer is an invalid plan.
    pub fn invalid(message: &str) -> Self {
        Self {
            plan: Err(message.to_string()),
            goals: Mutex::new(Vec::new()),
        }
    }

    pub fn goals(&self) -> Vec<String> {
        lock(&self.goals).clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, goal: &str) -> Result<Vec<ProtoStep>, PlanningError> {
        lock(&self.goals).push(goal.to_string());
        self.plan.clone().map_err(PlanningError::InvalidPlan)
    }
}

/// Oracle reply suggesting `steps` (each `{"action": ..}` object) as follow-ups.
pub fn suggestion_reply(steps: Value) -> Value {
    json!({ "description": "scripted", "action_suggestion": { "steps": steps } })
}

/// A config file in a temporary directory.
pub struct TempConfig {
    dir: tempfile::TempDir,
    path: PathBuf,
}

impl TempConfig {
    /// Write `config` as `pilot.toml` in a fresh temp dir.
    pub fn new(config: &PilotConfig) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pilot.toml");
        write_config(&path, config)?;
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
