//! Structured events flowing through the outbox.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name holding the event time, used by `%{+FORMAT}` topic references.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Field name non-object input is wrapped under.
pub const MESSAGE_FIELD: &str = "message";

/// An application event: a JSON object with named fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// Create an empty event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an event from any JSON value.
    ///
    /// Objects become the event's fields; anything else is stored under
    /// `message`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            other => {
                let mut fields = Map::new();
                fields.insert(MESSAGE_FIELD.to_string(), other);
                Self { fields }
            }
        }
    }

    /// Build an event from one line of input.
    ///
    /// JSON lines are parsed; anything that is not JSON becomes a plain
    /// `message` string.
    pub fn from_line(line: &str) -> Self {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => Self::from_value(value),
            Err(_) => Self::from_value(Value::String(line.to_string())),
        }
    }

    /// Set a top-level field, returning the event for chaining.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a top-level field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Look up a field by reference.
    ///
    /// Accepts a plain top-level name (`host`) or a bracketed path
    /// (`[request][path]`) into nested objects.
    pub fn get(&self, reference: &str) -> Option<&Value> {
        let mut segments = field_path(reference).into_iter();
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Names of the top-level fields.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// The underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the event has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn field_path(reference: &str) -> Vec<&str> {
    let trimmed = reference.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        trimmed[1..trimmed.len() - 1]
            .split("][")
            .filter(|s| !s.is_empty())
            .collect()
    } else {
        vec![trimmed]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_object() {
        let event = Event::from_value(json!({"message": "hi", "level": 3}));
        assert_eq!(event.len(), 2);
        assert_eq!(event.get("message"), Some(&json!("hi")));
    }

    #[test]
    fn test_from_value_wraps_scalars() {
        let event = Event::from_value(json!(42));
        assert_eq!(event.get("message"), Some(&json!(42)));
    }

    #[test]
    fn test_from_line_plain_text() {
        let event = Event::from_line("not json at all");
        assert_eq!(event.get("message"), Some(&json!("not json at all")));
    }

    #[test]
    fn test_nested_lookup() {
        let event = Event::from_value(json!({"request": {"path": "/a", "meta": {"id": 7}}}));
        assert_eq!(event.get("[request][path]"), Some(&json!("/a")));
        assert_eq!(event.get("[request][meta][id]"), Some(&json!(7)));
        assert_eq!(event.get("[request][missing]"), None);
        assert_eq!(event.get("[request][path][deeper]"), None);
    }

    #[test]
    fn test_single_bracket_is_top_level() {
        let event = Event::new().with("host", "edge-1");
        assert_eq!(event.get("[host]"), Some(&json!("edge-1")));
    }

    #[test]
    fn test_field_names() {
        let event = Event::new().with("b", 1).with("a", 2);
        let mut names: Vec<_> = event.field_names().collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_serializes_transparently() {
        let event = Event::new().with("message", "test message");
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"message":"test message"}"#
        );
    }
}
