use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {error}")]
    Open {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to install log subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Installs logfmt output on stderr, plus a copy appended to `app_log_path`
/// when one is configured. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(app_log_path: Option<&Path>) -> Result<(), LoggingError> {
    let file_layer = match app_log_path {
        Some(path) => {
            let file = open_append(path)?;
            Some(
                tracing_logfmt::builder()
                    .layer()
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()?;
    Ok(())
}

fn open_append(path: &Path) -> Result<fs::File, LoggingError> {
    let to_error = |error| LoggingError::Open {
        path: path.to_path_buf(),
        error,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_parent_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("app.log");
        open_append(&path).expect("open log");
        assert!(path.exists());
    }
}
