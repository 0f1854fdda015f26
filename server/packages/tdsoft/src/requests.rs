//! Task requests: validated value objects that become a worker argument vector.

use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};
use tdsoft_error::ValidationError;

use crate::chat_name::{classify, ChatNameKind};

pub const MAX_MEMBERS_LIMIT: u32 = 50_000;
pub const MAX_MESSAGES_LIMIT: u32 = 5_000;
pub const MAX_DIALOGS_LIMIT: u32 = 1_000;
pub const DEFAULT_DIALOGS_LIMIT: u32 = 50;
/// Date format the worker scripts accept.
pub const DATE_FORMAT: &str = "%m/%d/%Y";

/// A task request the session controller can hand to a worker script.
pub trait Request {
    /// Script file under `scripts_path`.
    const SCRIPT: &'static str;

    /// Normalises the request in place and checks field constraints.
    fn validate(&mut self) -> Result<(), ValidationError>;

    /// Arguments following the script path and session reference.
    fn args(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetMembersRequest {
    /// Username (`@user`, `user`, `t.me/user`), numeric chat id or invite link.
    pub chat: String,
    /// 0 lets the worker pick its default.
    pub limit: u32,
    pub output: Option<PathBuf>,
    pub parse_from_messages: bool,
    /// Only used with `parse_from_messages`; 0 lets the worker pick.
    pub messages_limit: u32,
    /// Slows the run down noticeably.
    pub parse_bio: bool,
    pub add_additional_info: bool,
    pub invite_link: Option<String>,
}

impl Request for GetMembersRequest {
    const SCRIPT: &'static str = "get_members.py";

    fn validate(&mut self) -> Result<(), ValidationError> {
        self.chat = validate_chat("chat", &self.chat)?;
        check_range("limit", self.limit, 0, MAX_MEMBERS_LIMIT)?;
        if self.parse_from_messages {
            check_range("messages_limit", self.messages_limit, 0, MAX_MESSAGES_LIMIT)?;
        }
        if let Some(link) = self.invite_link.take() {
            let link = link.trim().to_string();
            if !link.is_empty() {
                if classify(&link).kind != ChatNameKind::InviteLink {
                    return Err(ValidationError::Invalid {
                        field: "invite_link",
                        value: link,
                    });
                }
                self.invite_link = Some(link);
            }
        }
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![self.chat.clone()];
        if self.limit > 0 {
            args.extend(["--limit".to_string(), self.limit.to_string()]);
        }
        push_output(&mut args, self.output.as_ref());
        if self.parse_from_messages {
            args.push("--parse-from-messages".to_string());
            if self.messages_limit > 0 {
                args.extend(["--messages-limit".to_string(), self.messages_limit.to_string()]);
            }
        }
        if self.parse_bio {
            args.push("--parse-bio".to_string());
        }
        if self.add_additional_info {
            args.push("--add-additional-info".to_string());
        }
        if let Some(link) = &self.invite_link {
            args.extend(["--invite-link".to_string(), link.clone()]);
        }
        args
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetChatStatsRequest {
    pub chat: String,
    /// Messages of history to read; 0 reads all of it.
    pub messages_limit: u32,
    pub output: Option<PathBuf>,
}

impl Request for GetChatStatsRequest {
    const SCRIPT: &'static str = "get_chat_statistic.py";

    fn validate(&mut self) -> Result<(), ValidationError> {
        self.chat = validate_chat("chat", &self.chat)?;
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![self.chat.clone()];
        push_output(&mut args, self.output.as_ref());
        if self.messages_limit > 0 {
            args.extend(["--history-limit".to_string(), self.messages_limit.to_string()]);
        }
        args
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchMessagesRequest {
    pub chat: String,
    /// Author whose messages are collected.
    pub username: String,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub output: Option<PathBuf>,
}

impl Request for SearchMessagesRequest {
    const SCRIPT: &'static str = "search_messages.py";

    fn validate(&mut self) -> Result<(), ValidationError> {
        self.chat = validate_chat("chat", &self.chat)?;

        let username = self.username.trim();
        if username.is_empty() {
            return Err(ValidationError::Required { field: "username" });
        }
        if classify(username).kind != ChatNameKind::Username {
            return Err(ValidationError::Invalid {
                field: "username",
                value: username.to_string(),
            });
        }
        self.username = username.to_string();

        let from = check_date("from_date", self.from_date)?;
        let to = check_date("to_date", self.to_date)?;
        if from > to {
            return Err(ValidationError::DateOrder {
                from: format_date(from),
                to: format_date(to),
            });
        }
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![self.chat.clone(), self.username.clone()];
        push_output(&mut args, self.output.as_ref());
        if let Some(from) = self.from_date {
            args.extend(["--from-date".to_string(), format_date(from)]);
        }
        if let Some(to) = self.to_date {
            args.extend(["--to-date".to_string(), format_date(to)]);
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintDialogsRequest {
    pub limit: u32,
}

impl Default for PrintDialogsRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_DIALOGS_LIMIT,
        }
    }
}

impl Request for PrintDialogsRequest {
    const SCRIPT: &'static str = "print_dialogs.py";

    fn validate(&mut self) -> Result<(), ValidationError> {
        check_range("limit", self.limit, 1, MAX_DIALOGS_LIMIT)
    }

    fn args(&self) -> Vec<String> {
        vec!["--limit".to_string(), self.limit.to_string()]
    }
}

/// Any task request, for callers that dispatch tasks generically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRequest {
    Members(GetMembersRequest),
    ChatStats(GetChatStatsRequest),
    SearchMessages(SearchMessagesRequest),
    PrintDialogs(PrintDialogsRequest),
}

impl TaskRequest {
    pub fn script(&self) -> &'static str {
        match self {
            Self::Members(_) => GetMembersRequest::SCRIPT,
            Self::ChatStats(_) => GetChatStatsRequest::SCRIPT,
            Self::SearchMessages(_) => SearchMessagesRequest::SCRIPT,
            Self::PrintDialogs(_) => PrintDialogsRequest::SCRIPT,
        }
    }
}

/// Parses an `MM/DD/YYYY` date as typed by a user.
pub fn parse_date(field: &'static str, input: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| ValidationError::Invalid {
        field,
        value: input.to_string(),
    })
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn validate_chat(field: &'static str, chat: &str) -> Result<String, ValidationError> {
    let chat = chat.trim();
    if chat.is_empty() {
        return Err(ValidationError::Required { field });
    }
    if classify(chat).is_empty() {
        return Err(ValidationError::Invalid {
            field,
            value: chat.to_string(),
        });
    }
    Ok(chat.to_string())
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            min: i64::from(min),
            max: i64::from(max),
            got: i64::from(value),
        });
    }
    Ok(())
}

fn check_date(field: &'static str, date: Option<NaiveDate>) -> Result<NaiveDate, ValidationError> {
    let date = date.ok_or(ValidationError::Required { field })?;
    if date.year() <= 2000 {
        return Err(ValidationError::DateTooEarly { field });
    }
    Ok(date)
}

fn push_output(args: &mut Vec<String>, output: Option<&PathBuf>) {
    if let Some(output) = output {
        args.extend([
            "--output".to_string(),
            output.to_string_lossy().into_owned(),
        ]);
    }
}
