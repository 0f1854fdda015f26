use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One structured event emitted by a worker script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Workers send `null` when a message carries no details.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub details: Map<String, Value>,
}

impl WorkerMessage {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: None,
            details: Map::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    /// Renders a detail for a human: strings without quotes, everything else as JSON.
    pub fn detail_text(&self, key: &str) -> String {
        match self.details.get(key) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => "unknown".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Which envelope slot a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Error,
    Info,
    Warn,
    Log,
}

impl Slot {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Log => "log",
        }
    }
}

/// Tag handed to output handlers naming the stdout slot that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputTag {
    Info,
    Warn,
    Log,
}

impl OutputTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Log => "LOG",
        }
    }
}

impl fmt::Display for OutputTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire wrapper around a [`WorkerMessage`]: one JSON object per line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<WorkerMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn: Option<WorkerMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<WorkerMessage>,
}

impl WorkerEnvelope {
    pub fn wrap(slot: Slot, message: WorkerMessage) -> Self {
        let mut envelope = Self::default();
        match slot {
            Slot::Error => envelope.error = Some(message),
            Slot::Info => envelope.info = Some(message),
            Slot::Warn => envelope.warn = Some(message),
            Slot::Log => envelope.log = Some(message),
        }
        envelope
    }

    /// Parses one output line. `None` means the line is raw text: not a JSON
    /// object, or an object with none of the four slots populated.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        let envelope: Self = serde_json::from_str(trimmed).ok()?;
        if envelope.is_empty() {
            return None;
        }
        Some(envelope)
    }

    pub fn is_empty(&self) -> bool {
        self.error.is_none() && self.info.is_none() && self.warn.is_none() && self.log.is_none()
    }

    /// The stdout-facing slot, checked in `info`, `warn`, `log` order.
    pub fn into_output(self) -> Option<(OutputTag, WorkerMessage)> {
        if let Some(message) = self.info {
            return Some((OutputTag::Info, message));
        }
        if let Some(message) = self.warn {
            return Some((OutputTag::Warn, message));
        }
        self.log.map(|message| (OutputTag::Log, message))
    }

    pub fn into_error(self) -> Option<WorkerMessage> {
        self.error
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
