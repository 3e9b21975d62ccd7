//! Turns the oracle's suggested follow-up actions into proto steps.
//!
//! A missing or malformed suggestion list never fails the step that produced
//! it; it simply yields no new steps.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::action::{END, is_point_click};
use super::params::number_as_i32;
use super::types::ProtoStep;

/// Extract follow-up steps from `action_suggestion.steps` of a perception result.
pub fn suggested_steps(result: &Value) -> Vec<ProtoStep> {
    let Some(entries) = result
        .get("action_suggestion")
        .and_then(|s| s.get("steps"))
    else {
        return Vec::new();
    };
    let Some(entries) = entries.as_array() else {
        warn!(got = %entries, "action_suggestion.steps is not a list; ignoring");
        return Vec::new();
    };

    let steps: Vec<ProtoStep> = entries.iter().filter_map(suggestion_to_step).collect();
    debug!(
        suggested = entries.len(),
        accepted = steps.len(),
        "parsed action suggestions"
    );
    steps
}

fn suggestion_to_step(entry: &Value) -> Option<ProtoStep> {
    let action = entry.get("action").and_then(Value::as_str)?;
    if action.is_empty() || action == END {
        return None;
    }

    let mut params = match entry.get("params") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            warn!(action, got = %other, "suggestion params are not an object; dropping them");
            Map::new()
        }
    };

    if is_point_click(action) {
        let pair = params
            .get("coordinate")
            .and_then(coordinate_pair)
            .or_else(|| entry.get("coordinate").and_then(coordinate_pair));
        if let Some((x, y)) = pair {
            params.insert("x".to_string(), Value::from(x));
            params.insert("y".to_string(), Value::from(y));
        }
    }

    let description = entry
        .get("description")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("vision suggested {action}"));

    Some(ProtoStep::new(action, description).with_params(params))
}

/// A two-element numeric `[x, y]` array.
fn coordinate_pair(value: &Value) -> Option<(i32, i32)> {
    match value.as_array()?.as_slice() {
        [x, y] => Some((number_as_i32(x)?, number_as_i32(y)?)),
        _ => None,
    }
}
