//! Error taxonomy for the automation engine.
//!
//! Planning and configuration errors are fatal before a task exists. Perception
//! and actuation errors raised by a step handler propagate to the orchestration
//! loop, which records them on the failing step and halts the task.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

/// Required setup is missing or invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    Missing(String),
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The planning collaborator did not produce a usable step list.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("planning request failed: {0}")]
    Request(String),
    #[error("planning response is not valid JSON: {0}")]
    Parse(String),
    #[error("invalid plan format: {0}")]
    InvalidPlan(String),
    #[error("planning timed out after {0:?}")]
    Timeout(Duration),
    #[error("planning prompt: {0}")]
    Prompt(#[from] PromptError),
}

/// A perception call failed or returned data that could not be parsed.
#[derive(Debug, Error)]
pub enum PerceptionError {
    #[error("screen capture failed: {0}")]
    Capture(String),
    #[error("vision request failed: {0}")]
    Request(String),
    #[error("vision response is not valid JSON: {0}")]
    Parse(String),
    #[error("perception timed out after {0:?}")]
    Timeout(Duration),
}

/// An actuation call failed or was aborted.
#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("actuation command failed: {0}")]
    Command(String),
    #[error("actuation timed out after {0:?}")]
    Timeout(Duration),
    /// The pointer moved away from the last controlled position, which signals
    /// that a human has taken over the target.
    #[error("safety interlock tripped: pointer moved {moved_px}px since last controlled position")]
    SafetyInterlockTripped { moved_px: u32 },
}

/// Prompt template could not be loaded or rendered.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("unknown prompt template '{0}'")]
    Unknown(String),
    #[error("read prompt override {path}: {message}")]
    Override { path: String, message: String },
    #[error("render prompt '{name}': {message}")]
    Render { name: String, message: String },
}

/// Any error a step handler can raise.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Perception(#[from] PerceptionError),
    #[error(transparent)]
    Actuation(#[from] ActuationError),
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl StepError {
    /// Stable classification used in step results and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Perception(_) => "perception",
            StepError::Actuation(ActuationError::SafetyInterlockTripped { .. }) => {
                "safety_interlock"
            }
            StepError::Actuation(_) => "actuation",
            StepError::Planning(_) => "planning",
            StepError::Prompt(_) => "prompt",
        }
    }

    /// Payload recorded as the failed step's `result`.
    pub fn to_result(&self) -> Value {
        json!({
            "error": self.to_string(),
            "kind": self.kind(),
        })
    }
}

/// Errors surfaced before a task exists: while wiring collaborators or in
/// [`crate::orchestrator::Orchestrator::start`].
#[derive(Debug, Error)]
pub enum PilotError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interlock_trip_is_classified_separately() {
        let err = StepError::from(ActuationError::SafetyInterlockTripped { moved_px: 120 });
        assert_eq!(err.kind(), "safety_interlock");
        let result = err.to_result();
        assert_eq!(result["kind"], "safety_interlock");
        assert!(result["error"].as_str().unwrap().contains("120px"));
    }

    #[test]
    fn perception_errors_keep_their_message() {
        let err = StepError::from(PerceptionError::Parse("expected value".to_string()));
        assert_eq!(
            err.to_string(),
            "vision response is not valid JSON: expected value"
        );
        assert_eq!(err.kind(), "perception");
    }
}
