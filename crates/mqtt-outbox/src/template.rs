//! Per-event topic templating.
//!
//! Templates mix literal text with references that are resolved against each
//! event at publish time:
//!
//! - `%{field}` or `%{[nested][field]}` inserts a field value. Strings are
//!   inserted raw, other values as their JSON text. Unresolved references are
//!   left in the output verbatim.
//! - `%{+FORMAT}` formats the event's `@timestamp` (RFC 3339) with a chrono
//!   strftime FORMAT, falling back to the current UTC time.

use crate::event::{Event, TIMESTAMP_FIELD};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
    Time(String),
}

/// A parsed topic template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl TopicTemplate {
    /// Parse a template string. Parsing never fails; malformed references are
    /// kept as literal text.
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let segments = parse_segments(&source);
        Self { source, segments }
    }

    /// The template text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the template contains no references.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Render the template against one event.
    pub fn render(&self, event: &Event) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(reference) => match event.get(reference) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {
                        out.push_str("%{");
                        out.push_str(reference);
                        out.push('}');
                    }
                },
                Segment::Time(format) => {
                    let at = event_time(event).unwrap_or_else(Utc::now);
                    out.push_str(&at.format(format).to_string());
                }
            }
        }
        out
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl From<&str> for TopicTemplate {
    fn from(source: &str) -> Self {
        Self::parse(source)
    }
}

fn event_time(event: &Event) -> Option<DateTime<Utc>> {
    let raw = event.get(TIMESTAMP_FIELD)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_segments(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = source;

    while let Some(start) = rest.find("%{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        literal.push_str(&rest[..start]);
        let reference = &after[..end];

        let segment = if let Some(format) = reference.strip_prefix('+') {
            valid_strftime(format).then(|| Segment::Time(format.to_string()))
        } else if !reference.trim().is_empty() {
            Some(Segment::Field(reference.to_string()))
        } else {
            None
        };

        match segment {
            Some(segment) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(segment);
            }
            None => {
                literal.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

// Rendering an invalid strftime string panics inside chrono's Display impl.
fn valid_strftime(format: &str) -> bool {
    !format.is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}
