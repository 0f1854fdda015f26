use std::path::PathBuf;

use tdsoft_error::{ErrorKind, ValidationError};
use tdsoft_worker_stream::TaskError;
use tdsoft_worker_supervisor::SupervisorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no user log function set")]
    NoUserLogSink,
    #[error("need auth")]
    NeedAuth,
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("failed to remove session file {path}: {error}")]
    SessionFile {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to write credentials {path}: {error}")]
    CredentialsFile {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to encode credentials: {0}")]
    CredentialsFormat(#[from] toml::ser::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoUserLogSink
            | Self::SessionFile { .. }
            | Self::CredentialsFile { .. }
            | Self::CredentialsFormat(_) => ErrorKind::Internal,
            Self::NeedAuth => ErrorKind::Domain,
            Self::Validation(err) => err.kind(),
            Self::Task(err) => err.kind(),
            Self::Supervisor(err) => err.kind(),
        }
    }

    /// The account has a second factor; follow up with `check_password`.
    pub fn is_password_needed(&self) -> bool {
        matches!(self, Self::Supervisor(err) if err.is_password_needed())
    }
}
