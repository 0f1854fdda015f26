//! Lifecycle and HTTP control of the long-lived login worker.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use tdsoft_error::ErrorKind;
use tdsoft_worker_stream::LaunchSpec;
use thiserror::Error;
use tokio::process::Child;
use tokio::time::{sleep, timeout};

pub mod signal;

use signal::{signal_group, GroupSignal};

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const PING_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Decoded body of a control call: a flat JSON object.
pub type ControlResponse = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// How long `start` polls `/ping` before giving up.
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub ping_timeout: Duration,
    pub request_timeout: Duration,
    /// Budget for the cooperative `/shutdown` call.
    pub shutdown_timeout: Duration,
    /// Wait after the interrupt before escalating to a kill.
    pub stop_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ready_timeout: READY_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            ping_timeout: PING_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
            stop_grace: STOP_GRACE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub launch: LaunchSpec,
    /// Base URI of the worker's control surface, e.g. `http://127.0.0.1:9001`.
    pub base_url: String,
    /// Worker stdout and stderr are appended here.
    pub log_path: PathBuf,
    /// Forwarded to `/session_path` once the worker answers pings.
    pub session_path: String,
    pub timings: Timings,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("worker is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },
    #[error("failed to open worker log {path}: {error}")]
    Log {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to spawn worker `{command}`: {error}")]
    Spawn {
        command: String,
        #[source]
        error: std::io::Error,
    },
    #[error("timeout waiting for worker after {0:?}")]
    ReadinessTimeout(Duration),
    #[error("ping to worker failed")]
    PingFailed,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response from /{endpoint}: {error}")]
    InvalidResponse {
        endpoint: &'static str,
        #[source]
        error: serde_json::Error,
    },
    #[error("{context} error: {message}")]
    Remote {
        context: &'static str,
        message: String,
    },
    #[error("password needed")]
    PasswordNeeded,
    #[error("failed to wait for worker: {0}")]
    Wait(#[source] std::io::Error),
    #[error("worker exited with {status}")]
    Exited { status: ExitStatus },
}

impl SupervisorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRunning { .. } => ErrorKind::Internal,
            Self::Log { .. } | Self::Spawn { .. } | Self::Http(_) | Self::Wait(_) => {
                ErrorKind::Transport
            }
            Self::ReadinessTimeout(_) => ErrorKind::ReadinessTimeout,
            Self::PingFailed | Self::InvalidResponse { .. } => ErrorKind::Protocol,
            Self::Remote { .. } | Self::PasswordNeeded | Self::Exited { .. } => ErrorKind::Domain,
        }
    }

    pub fn is_password_needed(&self) -> bool {
        matches!(self, Self::PasswordNeeded)
    }
}

/// How a call to [`Supervisor::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning,
    /// The worker exited within the grace window.
    Graceful(ExitStatus),
    /// The worker ignored the interrupt and was killed.
    Killed(ExitStatus),
}

#[derive(Debug)]
struct SupervisedProcess {
    child: Child,
    pid: u32,
    /// Equal to `pid`: the worker leads its own process group.
    pgid: u32,
    started_at: Instant,
}

/// Owns at most one long-lived worker process.
///
/// `start` and `stop` take `&mut self`, so callers sharing a supervisor must
/// serialise them; control calls only need `&self`.
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    http_client: Client,
    process: Option<SupervisedProcess>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            http_client: Client::new(),
            process: None,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|process| process.pid)
    }

    /// Spawns the worker in its own process group, waits until it answers
    /// pings and hands it the session path. Any failure after the spawn stops
    /// the worker again before the error is returned.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if let Some(process) = &self.process {
            return Err(SupervisorError::AlreadyRunning { pid: process.pid });
        }

        let process = self.spawn_worker()?;
        let pid = process.pid;
        self.process = Some(process);

        let ready = match self.wait_until_ready().await {
            Ok(()) => self.send_session_path().await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = ready {
            tracing::warn!(pid = pid, error = %err, "worker failed to start, stopping it");
            if let Err(stop_err) = self.stop().await {
                tracing::warn!(pid = pid, error = %stop_err, "cleanup after failed start failed");
            }
            return Err(err);
        }

        tracing::info!(pid = pid, base_url = %self.config.base_url, "worker started");
        Ok(())
    }

    /// Asks the worker to shut down, interrupts its process group and, if it
    /// is still alive after the grace window, kills the group and waits for
    /// the OS to reap it. A no-op when nothing is running.
    pub async fn stop(&mut self) -> Result<StopOutcome, SupervisorError> {
        let Some(mut process) = self.process.take() else {
            return Ok(StopOutcome::NotRunning);
        };
        let pid = process.pid;

        if let Err(err) = self.request_shutdown().await {
            tracing::warn!(
                pid = pid,
                error = %err,
                "worker shutdown request failed, proceeding to signal"
            );
        }

        if let Err(err) = signal_group(process.pgid, GroupSignal::Interrupt) {
            tracing::debug!(pid = pid, error = %err, "interrupting worker process group failed");
        }

        match timeout(self.config.timings.stop_grace, process.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(
                    pid = pid,
                    status = %status,
                    uptime_ms = process.started_at.elapsed().as_millis() as u64,
                    "worker stopped"
                );
                if exited_cleanly(status) {
                    Ok(StopOutcome::Graceful(status))
                } else {
                    Err(SupervisorError::Exited { status })
                }
            }
            Ok(Err(err)) => Err(SupervisorError::Wait(err)),
            Err(_) => {
                tracing::warn!(
                    pid = pid,
                    grace_ms = self.config.timings.stop_grace.as_millis() as u64,
                    "worker ignored interrupt, killing process group"
                );
                if let Err(err) = signal_group(process.pgid, GroupSignal::Kill) {
                    tracing::warn!(pid = pid, error = %err, "killing worker process group failed");
                    let _ = process.child.start_kill();
                }
                let status = process.child.wait().await.map_err(SupervisorError::Wait)?;
                tracing::info!(pid = pid, status = %status, "worker killed");
                Ok(StopOutcome::Killed(status))
            }
        }
    }

    /// Liveness check: `200` with `{"message": "pong"}`. Every other outcome
    /// is [`SupervisorError::PingFailed`]; the cause is only logged.
    pub async fn ping(&self) -> Result<(), SupervisorError> {
        self.ping_within(self.config.timings.ping_timeout).await
    }

    async fn ping_within(&self, budget: Duration) -> Result<(), SupervisorError> {
        let response = match self
            .http_client
            .get(self.endpoint("ping"))
            .query(&[("message", "ping")])
            .timeout(budget)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = %err, "ping: request failed");
                return Err(SupervisorError::PingFailed);
            }
        };

        if response.status() != StatusCode::OK {
            tracing::debug!(status = %response.status(), "ping: unexpected status");
            return Err(SupervisorError::PingFailed);
        }

        let body = match response.json::<Map<String, Value>>().await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!(error = %err, "ping: undecodable body");
                return Err(SupervisorError::PingFailed);
            }
        };
        match body.get("message").and_then(Value::as_str) {
            Some("pong") => Ok(()),
            other => {
                tracing::debug!(message = ?other, "ping: unexpected reply");
                Err(SupervisorError::PingFailed)
            }
        }
    }

    pub async fn send_session_path(&self) -> Result<ControlResponse, SupervisorError> {
        let path = self.config.session_path.as_str();
        self.call(
            Method::POST,
            "session_path",
            &[("path", path)],
            "send session path",
        )
        .await
    }

    pub async fn send_api_data(
        &self,
        api_id: &str,
        api_hash: &str,
    ) -> Result<ControlResponse, SupervisorError> {
        self.call(
            Method::POST,
            "api_data",
            &[("api_id", api_id), ("api_hash", api_hash)],
            "send api data",
        )
        .await
    }

    pub async fn send_phone(&self, phone: &str) -> Result<ControlResponse, SupervisorError> {
        self.call(Method::POST, "send_code", &[("phone", phone)], "send phone")
            .await
    }

    /// Fails with [`SupervisorError::PasswordNeeded`] when the account has a
    /// second factor and [`Supervisor::check_password`] must follow.
    pub async fn sign_in(&self, phone: &str, code: &str) -> Result<ControlResponse, SupervisorError> {
        self.call(
            Method::POST,
            "sign_in",
            &[("phone", phone), ("code", code)],
            "sign in",
        )
        .await
        .map_err(|err| match err {
            SupervisorError::Remote { message, .. } if message.starts_with("password") => {
                SupervisorError::PasswordNeeded
            }
            other => other,
        })
    }

    pub async fn check_password(&self, password: &str) -> Result<ControlResponse, SupervisorError> {
        self.call(
            Method::POST,
            "check_password",
            &[("password", password)],
            "check password",
        )
        .await
    }

    /// Summary of the signed-in account (`id`, `first_name`, `username`).
    pub async fn get_me(&self) -> Result<ControlResponse, SupervisorError> {
        self.call(Method::GET, "get_me", &[], "get me").await
    }

    /// Logs the account out and deletes the worker-side session.
    pub async fn remove_session(&self) -> Result<ControlResponse, SupervisorError> {
        self.call(Method::GET, "remove_session", &[], "remove session")
            .await
    }

    fn spawn_worker(&self) -> Result<SupervisedProcess, SupervisorError> {
        let log = open_worker_log(&self.config.log_path)?;
        let log_for_stderr = log.try_clone().map_err(|error| SupervisorError::Log {
            path: self.config.log_path.clone(),
            error,
        })?;

        let launch = &self.config.launch;
        let mut command = launch.command();
        command
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_for_stderr));
        #[cfg(unix)]
        command.process_group(0);

        tracing::info!(program = ?launch.program, args = ?launch.args, "spawning worker");
        let child = command.spawn().map_err(|error| {
            tracing::error!(program = ?launch.program, error = %error, "failed to spawn worker");
            SupervisorError::Spawn {
                command: launch.display(),
                error,
            }
        })?;
        let pid = child.id().unwrap_or(0);

        Ok(SupervisedProcess {
            child,
            pid,
            pgid: pid,
            started_at: Instant::now(),
        })
    }

    async fn wait_until_ready(&mut self) -> Result<(), SupervisorError> {
        let deadline = Instant::now() + self.config.timings.ready_timeout;
        loop {
            // A slow ping must not carry start past the deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget = self.config.timings.ping_timeout.min(remaining);
            if !budget.is_zero() && self.ping_within(budget).await.is_ok() {
                return Ok(());
            }
            if let Some(process) = self.process.as_mut() {
                if let Ok(Some(status)) = process.child.try_wait() {
                    tracing::warn!(pid = process.pid, status = %status, "worker exited before becoming ready");
                    return Err(SupervisorError::Exited { status });
                }
            }
            if Instant::now() >= deadline {
                return Err(SupervisorError::ReadinessTimeout(
                    self.config.timings.ready_timeout,
                ));
            }
            sleep(self.config.timings.poll_interval).await;
        }
    }

    async fn request_shutdown(&self) -> Result<(), SupervisorError> {
        self.http_client
            .get(self.endpoint("shutdown"))
            .timeout(self.config.timings.shutdown_timeout)
            .send()
            .await?;
        Ok(())
    }

    /// Ping, call, decode, and turn an `error` field into [`SupervisorError::Remote`].
    async fn call(
        &self,
        method: Method,
        endpoint: &'static str,
        params: &[(&str, &str)],
        context: &'static str,
    ) -> Result<ControlResponse, SupervisorError> {
        self.ping().await?;

        let response = self
            .http_client
            .request(method, self.endpoint(endpoint))
            .query(params)
            .timeout(self.config.timings.request_timeout)
            .send()
            .await?;
        let body = response.bytes().await?;
        let decoded: ControlResponse = serde_json::from_slice(&body)
            .map_err(|error| SupervisorError::InvalidResponse { endpoint, error })?;

        if let Some(error) = decoded.get("error") {
            let message = match error {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            tracing::warn!(endpoint = endpoint, error = %message, "worker reported an error");
            return Err(SupervisorError::Remote { context, message });
        }

        tracing::info!(endpoint = endpoint, response = ?decoded, "worker control call succeeded");
        Ok(decoded)
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.config.base_url.trim_end_matches('/'))
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            tracing::warn!(pid = process.pid, "supervisor dropped with a running worker, killing it");
            if signal_group(process.pgid, GroupSignal::Kill).is_err() {
                let _ = process.child.start_kill();
            }
        }
    }
}

fn open_worker_log(path: &Path) -> Result<File, SupervisorError> {
    let to_error = |error| SupervisorError::Log {
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

/// Success, or the interrupt `stop` itself delivered.
fn exited_cleanly(status: ExitStatus) -> bool {
    if status.success() {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // 130 is how shells and Python report death by SIGINT.
        if status.signal() == Some(libc::SIGINT) || status.code() == Some(130) {
            return true;
        }
    }
    false
}
