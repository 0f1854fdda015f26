use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tdsoft_error::ErrorKind;
use tdsoft_worker_stream::LaunchSpec;
use tdsoft_worker_supervisor::{SupervisorConfig, Timings};
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "app.toml";
/// Script the long-lived login worker runs from `scripts_path`.
pub const LOGIN_WORKER_SCRIPT: &str = "connect.py";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to parse config {path}: {error}")]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },
    #[error("config key `{0}` must not be empty")]
    Missing(&'static str),
    #[error("invalid creator_uri {value:?}: {reason}")]
    InvalidUri { value: String, reason: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

/// Application settings, read once at startup from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Python virtualenv the worker scripts run in.
    pub venv_path: PathBuf,
    pub scripts_path: PathBuf,
    /// Session reference handed to every worker; the session file is
    /// `<session_name>.session`.
    pub session_name: String,
    /// Log file the long-lived worker's stdout and stderr are appended to.
    pub creator_log_path: PathBuf,
    #[serde(default)]
    pub app_log_path: Option<PathBuf>,
    /// Base URI of the long-lived worker's control surface.
    pub creator_uri: String,
    #[serde(default)]
    pub api_id: Option<String>,
    #[serde(default)]
    pub api_hash: Option<String>,
    #[serde(default)]
    pub worker: WorkerTimings,
}

/// Overrides for the supervisor's timing budget, all in milliseconds.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkerTimings {
    pub ready_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub stop_grace_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
    pub ping_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

impl WorkerTimings {
    pub fn timings(&self) -> Timings {
        let defaults = Timings::default();
        let pick = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };
        Timings {
            ready_timeout: pick(self.ready_timeout_ms, defaults.ready_timeout),
            poll_interval: pick(self.poll_interval_ms, defaults.poll_interval),
            ping_timeout: pick(self.ping_timeout_ms, defaults.ping_timeout),
            request_timeout: pick(self.request_timeout_ms, defaults.request_timeout),
            shutdown_timeout: pick(self.shutdown_timeout_ms, defaults.shutdown_timeout),
            stop_grace: pick(self.stop_grace_ms, defaults.stop_grace),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|error| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            error,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, &Path); 3] = [
            ("venv_path", &self.venv_path),
            ("scripts_path", &self.scripts_path),
            ("creator_log_path", &self.creator_log_path),
        ];
        for (key, path) in required {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Missing(key));
            }
        }
        if self.session_name.trim().is_empty() {
            return Err(ConfigError::Missing("session_name"));
        }
        if self.creator_uri.trim().is_empty() {
            return Err(ConfigError::Missing("creator_uri"));
        }

        let invalid = |reason: String| ConfigError::InvalidUri {
            value: self.creator_uri.clone(),
            reason,
        };
        let uri = Url::parse(&self.creator_uri).map_err(|err| invalid(err.to_string()))?;
        if !matches!(uri.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", uri.scheme())));
        }
        if uri.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(())
    }

    pub fn interpreter(&self) -> PathBuf {
        self.venv_path.join("bin").join("python3")
    }

    pub fn script(&self, name: &str) -> PathBuf {
        self.scripts_path.join(name)
    }

    pub fn session_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.session", self.session_name))
    }

    /// API credentials saved by `login`, next to the session file.
    pub fn credentials_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.credentials.toml", self.session_name))
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            launch: LaunchSpec::script(self.interpreter(), self.script(LOGIN_WORKER_SCRIPT)),
            base_url: self.creator_uri.trim_end_matches('/').to_string(),
            log_path: self.creator_log_path.clone(),
            session_path: self.session_name.clone(),
            timings: self.worker.timings(),
        }
    }
}

/// `./app.toml` when present, otherwise `<config dir>/tdsoft/app.toml`.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("tdsoft").join(DEFAULT_CONFIG_FILE))
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
venv_path = "/opt/tdsoft/venv"
scripts_path = "/opt/tdsoft/scripts"
session_name = "sessions/account"
creator_log_path = "/var/log/tdsoft/creator_server.log"
creator_uri = "http://127.0.0.1:9001"
"#;

    #[test]
    fn minimal_config_uses_default_timings() {
        let config = AppConfig::from_toml_str(MINIMAL).expect("config");
        assert_eq!(config.app_log_path, None);
        assert_eq!(config.worker.timings(), Timings::default());
        assert_eq!(
            config.interpreter(),
            PathBuf::from("/opt/tdsoft/venv/bin/python3")
        );
        assert_eq!(
            config.session_file(),
            PathBuf::from("sessions/account.session")
        );
        assert_eq!(
            config.credentials_file(),
            PathBuf::from("sessions/account.credentials.toml")
        );
    }

    #[test]
    fn worker_table_overrides_timings() {
        let raw = format!("{MINIMAL}\n[worker]\nready_timeout_ms = 250\nstop_grace_ms = 100\n");
        let config = AppConfig::from_toml_str(&raw).expect("config");
        let timings = config.worker.timings();
        assert_eq!(timings.ready_timeout, Duration::from_millis(250));
        assert_eq!(timings.stop_grace, Duration::from_millis(100));
        assert_eq!(timings.poll_interval, Timings::default().poll_interval);
    }

    #[test]
    fn supervisor_launches_the_login_worker() {
        let config = AppConfig::from_toml_str(MINIMAL).expect("config");
        let supervisor = config.supervisor_config();
        assert_eq!(
            supervisor.launch.program,
            PathBuf::from("/opt/tdsoft/venv/bin/python3")
        );
        assert_eq!(supervisor.launch.args, vec!["/opt/tdsoft/scripts/connect.py"]);
        assert_eq!(supervisor.base_url, "http://127.0.0.1:9001");
        assert_eq!(supervisor.session_path, "sessions/account");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = format!("{MINIMAL}\nforce_auth = true\n");
        assert!(matches!(
            AppConfig::from_toml_str(&raw),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn empty_session_name_is_rejected() {
        let raw = MINIMAL.replace("sessions/account", " ");
        assert!(matches!(
            AppConfig::from_toml_str(&raw),
            Err(ConfigError::Missing("session_name"))
        ));
    }

    #[test]
    fn creator_uri_must_be_http() {
        for uri in ["ftp://127.0.0.1:9001", "127.0.0.1:9001", "not a uri"] {
            let raw = MINIMAL.replace("http://127.0.0.1:9001", uri);
            let err = AppConfig::from_toml_str(&raw).expect_err(uri);
            assert!(matches!(err, ConfigError::InvalidUri { .. }), "{uri}: {err}");
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
    }
}
