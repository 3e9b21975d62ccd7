//! Initial plan strategies.

use async_trait::async_trait;
use jsonschema::Draft;
use minijinja::context;
use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use crate::core::action::ANALYZE;
use crate::core::types::ProtoStep;
use crate::error::PlanningError;
use crate::io::llm::{ChatClient, ChatMessage, parse_json_reply};
use crate::io::prompt::{self, PromptLibrary};

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

/// Turns a goal into an ordered list of proto steps.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str) -> Result<Vec<ProtoStep>, PlanningError>;
}

#[async_trait]
impl<T: Planner + ?Sized> Planner for Box<T> {
    async fn plan(&self, goal: &str) -> Result<Vec<ProtoStep>, PlanningError> {
        (**self).plan(goal).await
    }
}

/// Starts every task with a single perceive-and-reason step; the oracle's
/// suggestions then grow the plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservePlanner;

#[async_trait]
impl Planner for ObservePlanner {
    async fn plan(&self, goal: &str) -> Result<Vec<ProtoStep>, PlanningError> {
        let mut params = Map::new();
        params.insert("instruction".to_string(), Value::from(goal));
        Ok(vec![
            ProtoStep::new(
                ANALYZE,
                format!("analyze current state and start task: {goal}"),
            )
            .with_params(params),
        ])
    }
}

/// Asks the chat model for the whole plan up front.
pub struct LlmPlanner {
    client: ChatClient,
    prompts: PromptLibrary,
}

impl LlmPlanner {
    pub fn new(client: ChatClient, prompts: PromptLibrary) -> Self {
        Self { client, prompts }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    #[instrument(skip_all)]
    async fn plan(&self, goal: &str) -> Result<Vec<ProtoStep>, PlanningError> {
        let system = self.prompts.render(prompt::PLANNING, context! { goal })?;
        let messages = [ChatMessage::system(system), ChatMessage::user(goal)];
        let reply = self
            .client
            .complete(&messages)
            .await
            .map_err(|e| PlanningError::Request(e.to_string()))?;
        let value = parse_json_reply(&reply).map_err(PlanningError::Parse)?;
        let steps = parse_plan(value)?;
        info!(steps = steps.len(), "model produced plan");
        Ok(steps)
    }
}

/// Validate a planner reply and extract its steps.
///
/// Replies without a non-empty `steps` list are rejected rather than turned
/// into an empty task.
pub fn parse_plan(value: Value) -> Result<Vec<ProtoStep>, PlanningError> {
    let Some(steps) = value.get("steps") else {
        return Err(PlanningError::InvalidPlan(format!(
            "missing steps in {}",
            compact(&value)
        )));
    };
    if steps.as_array().is_some_and(Vec::is_empty) {
        return Err(PlanningError::InvalidPlan("plan has no steps".to_string()));
    }
    validate_schema(&value)?;
    let plan: PlanReply = serde_json::from_value(value)
        .map_err(|e| PlanningError::InvalidPlan(e.to_string()))?;
    Ok(plan.steps)
}

#[derive(serde::Deserialize)]
struct PlanReply {
    steps: Vec<ProtoStep>,
}

fn validate_schema(instance: &Value) -> Result<(), PlanningError> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA)
        .map_err(|e| PlanningError::InvalidPlan(format!("plan schema: {e}")))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|e| PlanningError::InvalidPlan(format!("plan schema: {e}")))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(PlanningError::InvalidPlan(messages.join("; ")));
    }
    Ok(())
}

fn compact(value: &Value) -> String {
    let text = value.to_string();
    if text.len() > 200 {
        let cut = (0..=200).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
        format!("{}...", &text[..cut])
    } else {
        text
    }
}

/// Proto steps as pretty JSON, for `pilot plan`.
pub fn plan_to_json(steps: &[ProtoStep]) -> Value {
    json!({ "steps": steps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observe_planner_starts_with_analyze() {
        let steps = ObservePlanner.plan("send hi to Li").await.expect("plan");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind, "analyze");
        assert_eq!(
            steps[0].params.as_ref().unwrap()["instruction"],
            json!("send hi to Li")
        );
        assert!(steps[0].description.contains("send hi to Li"));
    }

    #[test]
    fn parses_valid_plan() {
        let steps = parse_plan(json!({
            "steps": [
                { "type": "search_contact", "description": "find Li", "params": { "name": "Li" } },
                { "type": "enter_chat" }
            ]
        }))
        .expect("plan");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kind, "search_contact");
        assert_eq!(steps[1].description, "");
        assert!(steps[1].params.is_none());
    }

    #[test]
    fn missing_steps_is_invalid() {
        let err = parse_plan(json!({ "plan": [] })).unwrap_err();
        assert!(matches!(err, PlanningError::InvalidPlan(msg) if msg.contains("missing steps")));
    }

    #[test]
    fn empty_steps_is_invalid() {
        let err = parse_plan(json!({ "steps": [] })).unwrap_err();
        assert!(matches!(err, PlanningError::InvalidPlan(_)));
    }

    #[test]
    fn schema_rejects_untyped_steps() {
        let err = parse_plan(json!({ "steps": [ { "description": "no type" } ] })).unwrap_err();
        assert!(matches!(err, PlanningError::InvalidPlan(msg) if msg.contains("type")));
    }

    #[test]
    fn schema_rejects_non_object_params() {
        let err = parse_plan(json!({ "steps": [ { "type": "tap", "params": [1, 2] } ] }))
            .unwrap_err();
        assert!(matches!(err, PlanningError::InvalidPlan(_)));
    }

    #[test]
    fn plan_json_uses_wire_names() {
        let value = plan_to_json(&[ProtoStep::new("enter_chat", "open it")]);
        assert_eq!(value["steps"][0]["type"], json!("enter_chat"));
    }
}
