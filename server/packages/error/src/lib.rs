use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification shared by every error the bridge surfaces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Process spawn failure, connection refused, HTTP timeout.
    Transport,
    /// Malformed worker output or an unexpected liveness reply.
    Protocol,
    /// The worker reported an error of its own.
    Domain,
    /// The long-lived worker never became reachable.
    ReadinessTimeout,
    /// A request was rejected before dispatch.
    Validation,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Domain => "domain",
            Self::ReadinessTimeout => "readiness_timeout",
            Self::Validation => "validation",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-level rejection of a task request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} must be between {min} and {max}, got {got}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        got: i64,
    },
    #[error("{field} is not valid: {value:?}")]
    Invalid { field: &'static str, value: String },
    #[error("{field} must be after the year 2000")]
    DateTooEarly { field: &'static str },
    #[error("from date {from} is after to date {to}")]
    DateOrder { from: String, to: String },
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Required { field }
            | Self::OutOfRange { field, .. }
            | Self::Invalid { field, .. }
            | Self::DateTooEarly { field } => field,
            Self::DateOrder { .. } => "from_date",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}
