use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use tdsoft_worker_stream::{
    compose_on_err, compose_on_out, run_streaming, HandlerTable, LaunchSpec, UNCAUGHT_ERROR_CODE,
};
use tdsoft_worker_supervisor::{ControlResponse, StopOutcome, Supervisor};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::config::AppConfig;
use crate::error::SessionError;
use crate::handlers;
use crate::requests::{
    GetChatStatsRequest, GetMembersRequest, PrintDialogsRequest, Request, SearchMessagesRequest,
    TaskRequest,
};
use crate::user_log::{LogLevel, UserLog};

/// Telegram API credentials handed to workers as `API_ID` / `API_HASH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub api_id: String,
    pub api_hash: String,
    pub phone: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.api_id.trim().is_empty() && !self.api_hash.trim().is_empty()
    }

    /// Saved credentials first, config keys for whatever is missing.
    fn load(config: &AppConfig) -> Self {
        let mut credentials = read_saved(&config.credentials_file()).unwrap_or_default();
        if credentials.api_id.trim().is_empty() {
            credentials.api_id = config.api_id.clone().unwrap_or_default();
        }
        if credentials.api_hash.trim().is_empty() {
            credentials.api_hash = config.api_hash.clone().unwrap_or_default();
        }
        credentials
    }
}

fn read_saved(path: &Path) -> Option<Credentials> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return None,
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "reading saved credentials failed");
            return None;
        }
    };
    match toml::from_str(&raw) {
        Ok(credentials) => Some(credentials),
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "ignoring unreadable credentials");
            None
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

/// Facade over the login worker and the task scripts.
///
/// Worker start and stop are serialised by an async mutex; tasks only read the
/// handler tables and may run concurrently.
#[derive(Debug)]
pub struct SessionController {
    config: Arc<AppConfig>,
    supervisor: AsyncMutex<Supervisor>,
    user_log: Arc<UserLog>,
    defaults: Arc<HandlerTable>,
    credentials: Mutex<Credentials>,
}

impl SessionController {
    pub fn new(config: AppConfig) -> Self {
        let user_log = Arc::new(UserLog::new());
        let defaults = Arc::new(handlers::defaults(&user_log));
        let credentials = Credentials::load(&config);
        Self {
            supervisor: AsyncMutex::new(Supervisor::new(config.supervisor_config())),
            config: Arc::new(config),
            user_log,
            defaults,
            credentials: Mutex::new(credentials),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn set_user_logger<F>(&self, sink: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.user_log.set_sink(Arc::new(sink));
    }

    pub fn user_log(&self, level: LogLevel, text: &str) -> Result<(), SessionError> {
        self.user_log.log(level, text)
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True when there is no session file or no API credentials to use it with.
    pub fn needs_auth(&self) -> bool {
        !self.config.session_file().exists() || !self.credentials().is_complete()
    }

    /// Persists the current credentials so later runs can use the session.
    pub fn save_credentials(&self) -> Result<(), SessionError> {
        let raw = toml::to_string(&self.credentials())?;
        let path = self.config.credentials_file();
        let to_error = |error| SessionError::CredentialsFile {
            path: path.clone(),
            error,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(to_error)?;
        }
        fs::write(&path, raw).map_err(to_error)?;
        tracing::info!(path = %path.display(), "credentials saved");
        Ok(())
    }

    /// Forgets the stored credentials and removes the session and
    /// credentials files.
    pub fn delete_session(&self) -> Result<(), SessionError> {
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Credentials::default();

        let path = self.config.credentials_file();
        remove_if_present(&path).map_err(|error| SessionError::SessionFile { path, error })?;

        let path = self.config.session_file();
        match remove_if_present(&path) {
            Ok(removed) => {
                if removed {
                    tracing::info!(path = %path.display(), "session file removed");
                }
                Ok(())
            }
            Err(error) => Err(SessionError::SessionFile { path, error }),
        }
    }

    pub async fn start_worker(&self) -> Result<(), SessionError> {
        self.supervisor.lock().await.start().await?;
        Ok(())
    }

    pub async fn stop_worker(&self) -> Result<StopOutcome, SessionError> {
        Ok(self.supervisor.lock().await.stop().await?)
    }

    pub async fn worker_running(&self) -> bool {
        self.supervisor.lock().await.is_running()
    }

    pub async fn send_api_data(&self, api_id: &str, api_hash: &str) -> Result<(), SessionError> {
        let (api_id, api_hash) = (api_id.trim(), api_hash.trim());
        self.supervisor
            .lock()
            .await
            .send_api_data(api_id, api_hash)
            .await?;
        let mut credentials = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
        credentials.api_id = api_id.to_string();
        credentials.api_hash = api_hash.to_string();
        Ok(())
    }

    pub async fn send_phone(&self, phone: &str) -> Result<(), SessionError> {
        let phone = phone.trim();
        self.supervisor.lock().await.send_phone(phone).await?;
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phone = phone.to_string();
        Ok(())
    }

    /// Check [`SessionError::is_password_needed`] on failure.
    pub async fn sign_in(&self, phone: &str, code: &str) -> Result<(), SessionError> {
        self.supervisor
            .lock()
            .await
            .sign_in(phone.trim(), code.trim())
            .await?;
        Ok(())
    }

    pub async fn check_password(&self, password: &str) -> Result<(), SessionError> {
        self.supervisor
            .lock()
            .await
            .check_password(password)
            .await?;
        Ok(())
    }

    pub async fn get_me(&self) -> Result<ControlResponse, SessionError> {
        Ok(self.supervisor.lock().await.get_me().await?)
    }

    /// Logs out on the worker side; the local file is left to [`Self::delete_session`].
    pub async fn remove_session(&self) -> Result<ControlResponse, SessionError> {
        Ok(self.supervisor.lock().await.remove_session().await?)
    }

    pub async fn get_members(&self, request: GetMembersRequest) -> Result<(), SessionError> {
        self.run_task(request, handlers::members(&self.user_log))
            .await
    }

    pub async fn get_chat_stats(&self, request: GetChatStatsRequest) -> Result<(), SessionError> {
        self.run_task(request, handlers::chat_stats(&self.user_log))
            .await
    }

    pub async fn search_messages(
        &self,
        request: SearchMessagesRequest,
    ) -> Result<(), SessionError> {
        self.run_task(request, handlers::search_messages(&self.user_log))
            .await
    }

    pub async fn print_dialogs(&self, request: PrintDialogsRequest) -> Result<(), SessionError> {
        self.run_task(request, handlers::print_dialogs(&self.user_log))
            .await
    }

    pub async fn run(&self, request: TaskRequest) -> Result<(), SessionError> {
        match request {
            TaskRequest::Members(request) => self.get_members(request).await,
            TaskRequest::ChatStats(request) => self.get_chat_stats(request).await,
            TaskRequest::SearchMessages(request) => self.search_messages(request).await,
            TaskRequest::PrintDialogs(request) => self.print_dialogs(request).await,
        }
    }

    /// Runs `request` on its own tokio task; the result arrives on the
    /// returned receiver. Must be called inside a tokio runtime.
    pub fn spawn_task(
        self: &Arc<Self>,
        request: TaskRequest,
    ) -> oneshot::Receiver<Result<(), SessionError>> {
        let (tx, rx) = oneshot::channel();
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let script = request.script();
            let result = controller.run(request).await;
            if tx.send(result).is_err() {
                tracing::debug!(script = script, "task result dropped, receiver gone");
            }
        });
        rx
    }

    async fn run_task<R: Request>(
        &self,
        mut request: R,
        extra: HandlerTable,
    ) -> Result<(), SessionError> {
        if !self.user_log.has_sink() {
            tracing::error!("no user log function set");
            return Err(SessionError::NoUserLogSink);
        }
        if let Err(err) = request.validate() {
            tracing::warn!(script = R::SCRIPT, error = %err, "validating request failed");
            return Err(err.into());
        }

        let launch = self.task_launch(R::SCRIPT, request.args());
        let extra = Some(Arc::new(extra));
        let on_out = compose_on_out(self.defaults.clone(), extra.clone());
        let on_err = compose_on_err(self.defaults.clone(), extra);

        let mut reported = false;
        let result = run_streaming(
            &launch,
            |tag, msg| {
                on_out.dispatch(tag, Some(msg));
            },
            |msg| {
                reported |= msg.code != UNCAUGHT_ERROR_CODE;
                on_err.dispatch(Some(msg));
            },
        )
        .await;

        match result {
            Ok(summary) => {
                tracing::info!(
                    script = R::SCRIPT,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    stdout_lines = summary.stdout_lines,
                    "worker script finished"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    script = R::SCRIPT,
                    error = %err,
                    reported = reported,
                    "running worker script failed"
                );
                // The worker already told the user what went wrong.
                if !reported {
                    self.user_log.emit(LogLevel::Error, "something went wrong");
                }
                Err(err.into())
            }
        }
    }

    fn task_launch(&self, script: &str, args: Vec<String>) -> LaunchSpec {
        let credentials = self.credentials();
        let mut launch = LaunchSpec::script(self.config.interpreter(), self.config.script(script))
            .arg(self.config.session_name.as_str())
            .args(args);
        if credentials.is_complete() {
            launch = launch
                .env("API_ID", credentials.api_id)
                .env("API_HASH", credentials.api_hash);
        }
        launch
    }
}
