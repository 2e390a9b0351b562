//! Event encoders.

use crate::error::EncodeError;
use crate::event::{Event, MESSAGE_FIELD};
use crate::template::TopicTemplate;
use serde::{Deserialize, Serialize};

/// Turns an event into the bytes published to the broker.
pub trait Encoder: Send + Sync {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, EncodeError>;
}

/// Serializes the whole event as a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(event)?)
    }
}

/// Renders a format template per event and terminates it with a newline.
///
/// Without a format the `message` field is used, or the JSON text of the
/// event when it has no `message`.
#[derive(Debug, Clone, Default)]
pub struct LineEncoder {
    format: Option<TopicTemplate>,
}

impl LineEncoder {
    pub fn new(format: Option<&str>) -> Self {
        Self {
            format: format.map(TopicTemplate::parse),
        }
    }
}

impl Encoder for LineEncoder {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, EncodeError> {
        let mut line = match &self.format {
            Some(format) => format.render(event),
            None => match event.get(MESSAGE_FIELD) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => serde_json::to_string(event)?,
            },
        };
        line.push('\n');
        Ok(line.into_bytes())
    }
}

/// Encoder selection in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CodecConfig {
    #[default]
    Json,
    Line {
        #[serde(default)]
        format: Option<String>,
    },
}

impl CodecConfig {
    /// Build the configured encoder.
    pub fn build(&self) -> Box<dyn Encoder> {
        match self {
            CodecConfig::Json => Box::new(JsonEncoder),
            CodecConfig::Line { format } => Box::new(LineEncoder::new(format.as_deref())),
        }
    }
}
