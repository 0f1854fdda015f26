use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::SessionError;

/// Receives every line meant for the person driving the app.
pub type UserLogSink = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    /// `1 | 2 | 3`; anything else renders like info.
    pub fn from_code(code: u8) -> Self {
        match code {
            2 => Self::Warn,
            3 => Self::Error,
            _ => Self::Info,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Info => "",
            Self::Warn => "Warning! ",
            Self::Error => "Error! ",
        }
    }

    pub fn render(&self, text: &str) -> String {
        format!("{}{text}", self.prefix())
    }
}

/// Holder for the single registered sink.
#[derive(Default)]
pub struct UserLog {
    sink: RwLock<Option<UserLogSink>>,
}

impl UserLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previously registered sink.
    pub fn set_sink(&self, sink: UserLogSink) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    pub fn has_sink(&self) -> bool {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn log(&self, level: LogLevel, text: &str) -> Result<(), SessionError> {
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SessionError::NoUserLogSink)?;
        sink(&level.render(text));
        Ok(())
    }

    /// Like [`UserLog::log`] for callers that have nowhere to report a
    /// missing sink, such as worker event handlers.
    pub fn emit(&self, level: LogLevel, text: &str) {
        if self.log(level, text).is_err() {
            tracing::debug!(level = ?level, text = text, "dropping user log line, no sink");
        }
    }
}

impl fmt::Debug for UserLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserLog")
            .field("has_sink", &self.has_sink())
            .finish()
    }
}
