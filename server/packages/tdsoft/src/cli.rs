use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tdsoft_error::ValidationError;
use thiserror::Error;

use crate::config::{default_config_path, AppConfig, ConfigError};
use crate::error::SessionError;
use crate::logging::{init_logging, LoggingError};
use crate::requests::{
    parse_date, GetChatStatsRequest, GetMembersRequest, PrintDialogsRequest,
    SearchMessagesRequest, TaskRequest, DEFAULT_DIALOGS_LIMIT,
};
use crate::session::SessionController;
use crate::user_log::LogLevel;

mod build_version {
    include!(concat!(env!("OUT_DIR"), "/version.rs"));
}

#[derive(Parser, Debug)]
#[command(name = "tdsoft", bin_name = "tdsoft")]
#[command(about = "Telegram data collection through worker scripts", version = build_version::VERSION)]
#[command(arg_required_else_help = true)]
pub struct TdsoftCli {
    #[command(subcommand)]
    command: Command,

    /// Defaults to ./app.toml, then the user config directory.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in through the login worker and create a session file.
    Login(LoginArgs),
    /// Collect members of a group or channel.
    Members(MembersArgs),
    /// Collect message statistics for a chat.
    ChatStats(ChatStatsArgs),
    /// Collect one user's messages in a chat between two dates.
    Search(SearchArgs),
    /// Print recent dialogs, handy for finding chat ids.
    Dialogs(DialogsArgs),
    /// Log out and delete the local session.
    Logout,
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    #[arg(long)]
    phone: String,

    /// Falls back to `api_id` in the config.
    #[arg(long)]
    api_id: Option<String>,

    /// Falls back to `api_hash` in the config.
    #[arg(long)]
    api_hash: Option<String>,
}

#[derive(Args, Debug)]
pub struct MembersArgs {
    chat: String,

    #[arg(long, default_value_t = 0)]
    limit: u32,

    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    #[arg(long)]
    parse_from_messages: bool,

    #[arg(long, default_value_t = 0)]
    messages_limit: u32,

    #[arg(long)]
    parse_bio: bool,

    #[arg(long)]
    add_additional_info: bool,

    #[arg(long)]
    invite_link: Option<String>,
}

#[derive(Args, Debug)]
pub struct ChatStatsArgs {
    chat: String,

    /// Messages of history to read; 0 reads everything.
    #[arg(long, default_value_t = 0)]
    history_limit: u32,

    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    chat: String,

    username: String,

    /// MM/DD/YYYY
    #[arg(long)]
    from_date: String,

    /// MM/DD/YYYY
    #[arg(long)]
    to_date: String,

    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DialogsArgs {
    #[arg(long, default_value_t = DEFAULT_DIALOGS_LIMIT)]
    limit: u32,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("invalid argument: {0}")]
    Validation(#[from] ValidationError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("missing {0}: pass it on the command line or set it in the config")]
    MissingCredential(&'static str),
    #[error("interrupted")]
    Interrupted,
}

pub fn run_tdsoft() -> Result<(), CliError> {
    let TdsoftCli { command, config } = TdsoftCli::parse();
    let config_path = config.unwrap_or_else(default_config_path);
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config: {err}");
            return Err(err.into());
        }
    };
    if let Err(err) = init_logging(config.app_log_path.as_deref()) {
        eprintln!("failed to init logging: {err}");
        return Err(err.into());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run_command(command, config));
    // A prompt may still be blocked on stdin after Ctrl-C.
    runtime.shutdown_background();
    result
}

pub async fn run_command(command: Command, config: AppConfig) -> Result<(), CliError> {
    let controller = Arc::new(SessionController::new(config));
    controller.set_user_logger(|line| println!("{line}"));

    match command {
        Command::Login(args) => login(&controller, args).await,
        Command::Logout => logout(&controller).await,
        Command::Members(args) => {
            let request = GetMembersRequest {
                chat: args.chat,
                limit: args.limit,
                output: args.output,
                parse_from_messages: args.parse_from_messages,
                messages_limit: args.messages_limit,
                parse_bio: args.parse_bio,
                add_additional_info: args.add_additional_info,
                invite_link: args.invite_link,
            };
            run_task(&controller, TaskRequest::Members(request)).await
        }
        Command::ChatStats(args) => {
            let request = GetChatStatsRequest {
                chat: args.chat,
                messages_limit: args.history_limit,
                output: args.output,
            };
            run_task(&controller, TaskRequest::ChatStats(request)).await
        }
        Command::Search(args) => {
            let request = SearchMessagesRequest {
                chat: args.chat,
                username: args.username,
                from_date: Some(parse_date("from_date", &args.from_date)?),
                to_date: Some(parse_date("to_date", &args.to_date)?),
                output: args.output,
            };
            run_task(&controller, TaskRequest::SearchMessages(request)).await
        }
        Command::Dialogs(args) => {
            let request = PrintDialogsRequest { limit: args.limit };
            run_task(&controller, TaskRequest::PrintDialogs(request)).await
        }
    }
}

async fn run_task(controller: &Arc<SessionController>, request: TaskRequest) -> Result<(), CliError> {
    if controller.needs_auth() {
        controller.user_log(LogLevel::Error, "no session found, run `tdsoft login` first")?;
        return Err(SessionError::NeedAuth.into());
    }
    let result = controller.spawn_task(request).await;
    match result {
        Ok(result) => Ok(result?),
        Err(_) => Err(CliError::Interrupted),
    }
}

async fn login(controller: &SessionController, args: LoginArgs) -> Result<(), CliError> {
    let api_id = args
        .api_id
        .or_else(|| controller.config().api_id.clone())
        .ok_or(CliError::MissingCredential("api_id"))?;
    let api_hash = args
        .api_hash
        .or_else(|| controller.config().api_hash.clone())
        .ok_or(CliError::MissingCredential("api_hash"))?;

    controller.start_worker().await?;
    let result = tokio::select! {
        result = sign_in(controller, &args.phone, &api_id, &api_hash) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("login interrupted");
            Err(CliError::Interrupted)
        }
    };
    match controller.stop_worker().await {
        Ok(outcome) => tracing::debug!(outcome = ?outcome, "login worker stopped"),
        Err(err) => tracing::warn!(error = %err, "stopping login worker failed"),
    }
    result
}

async fn sign_in(
    controller: &SessionController,
    phone: &str,
    api_id: &str,
    api_hash: &str,
) -> Result<(), CliError> {
    controller.send_api_data(api_id, api_hash).await?;
    controller.send_phone(phone).await?;
    controller.user_log(LogLevel::Info, &format!("code sent to {phone}"))?;

    let code = prompt("code").await?;
    match controller.sign_in(phone, &code).await {
        Ok(()) => {}
        Err(err) if err.is_password_needed() => {
            controller.user_log(LogLevel::Warn, "two-step verification is enabled")?;
            let password = prompt("password").await?;
            controller.check_password(&password).await?;
        }
        Err(err) => return Err(err.into()),
    }

    controller.save_credentials()?;

    let me = controller.get_me().await?;
    let name = me.get("first_name").and_then(Value::as_str).unwrap_or("unknown");
    let username = me.get("username").and_then(Value::as_str).unwrap_or("");
    controller.user_log(LogLevel::Info, &format!("signed in as {name} @{username}"))?;
    Ok(())
}

async fn logout(controller: &SessionController) -> Result<(), CliError> {
    if controller.config().session_file().exists() {
        controller.start_worker().await?;
        if let Err(err) = controller.remove_session().await {
            tracing::warn!(error = %err, "remote logout failed");
            controller.user_log(LogLevel::Warn, "could not log out remotely")?;
        }
        if let Err(err) = controller.stop_worker().await {
            tracing::warn!(error = %err, "stopping login worker failed");
        }
    }
    controller.delete_session()?;
    controller.user_log(LogLevel::Info, "session deleted")?;
    Ok(())
}

async fn prompt(label: &'static str) -> Result<String, CliError> {
    let line = tokio::task::spawn_blocking(move || -> io::Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{label}: ")?;
        stdout.flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))??;
    Ok(line)
}
