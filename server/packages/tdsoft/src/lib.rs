//! Session controller for the tdsoft worker scripts: login through the
//! long-lived worker, and task scripts streamed into a user log.

pub mod chat_name;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod requests;
pub mod session;
pub mod user_log;

pub use config::{AppConfig, ConfigError};
pub use error::SessionError;
pub use requests::{
    GetChatStatsRequest, GetMembersRequest, PrintDialogsRequest, Request, SearchMessagesRequest,
    TaskRequest,
};
pub use session::{Credentials, SessionController};
pub use user_log::{LogLevel, UserLog, UserLogSink};
