//! Unvalidated step parameters.
//!
//! Parameters coming from planners and the vision oracle are free-form JSON.
//! Extraction is fallible and logged at the use site; values of the wrong
//! shape are reported and treated as absent, never coerced (`"10"` is not a
//! number).

use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct Params<'a> {
    kind: &'a str,
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Params<'a> {
    pub fn new(kind: &'a str, map: Option<&'a Map<String, Value>>) -> Self {
        Self { kind, map }
    }

    fn field(&self, key: &str) -> Option<&'a Value> {
        self.map.and_then(|map| map.get(key)).filter(|v| !v.is_null())
    }

    /// Non-empty string parameter.
    pub fn string(&self, key: &str) -> Option<String> {
        match self.field(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::String(_) => None,
            other => {
                self.mismatch(key, "string", other);
                None
            }
        }
    }

    /// Integral coordinate. Fractional values are rounded; the oracle often
    /// answers with floats.
    pub fn coordinate(&self, key: &str) -> Option<i32> {
        let value = self.field(key)?;
        match number_as_i32(value) {
            Some(n) => Some(n),
            None => {
                self.mismatch(key, "number", value);
                None
            }
        }
    }

    /// Positive count parameter.
    pub fn count(&self, key: &str) -> Option<u32> {
        let value = self.field(key)?;
        match value.as_u64().and_then(|n| u32::try_from(n).ok()) {
            Some(n) if n > 0 => Some(n),
            _ => {
                self.mismatch(key, "positive integer", value);
                None
            }
        }
    }

    /// Both `x` and `y`, or nothing.
    pub fn point(&self) -> Option<(i32, i32)> {
        Some((self.coordinate("x")?, self.coordinate("y")?))
    }

    fn mismatch(&self, key: &str, expected: &str, got: &Value) {
        warn!(
            step_type = self.kind,
            key,
            expected,
            got = %got,
            "ignoring step parameter with unexpected shape"
        );
    }
}

/// Read a JSON number as an `i32` coordinate.
pub fn number_as_i32(value: &Value) -> Option<i32> {
    if let Some(n) = value.as_i64() {
        return i32::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if !f.is_finite() || f < i32::MIN as f64 || f > i32::MAX as f64 {
        return None;
    }
    Some(f.round() as i32)
}
