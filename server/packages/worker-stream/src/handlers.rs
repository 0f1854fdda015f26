use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::envelope::{OutputTag, WorkerMessage};

/// Codes the worker scripts are known to emit.
///
/// The worker vocabulary is versioned separately from this crate, so anything
/// unrecognised lands in [`WorkerCode::Other`] and still dispatches by string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkerCode {
    ScriptStarted,
    AllDone,
    FloodWait,
    CsvFlushError,
    ScriptUncaughtError,
    TaskCancelled,
    RpcError,
    UnexpectedError,
    ArgparseError,
    NoSession,
    MembersFetched,
    MembersFromMessagesFetched,
    MembersLimitTooHigh,
    MessageLimitTooHigh,
    InvalidChatName,
    InviteLinkNotSupported,
    InvalidUsername,
    FromDateRequired,
    FromDateInvalid,
    ToDateRequired,
    ToDateInvalid,
    MessagesFetched,
    ChatStatsFetched,
    Dialog,
    Other(String),
}

impl WorkerCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "SCRIPT_STARTED" => Self::ScriptStarted,
            "ALL_DONE" => Self::AllDone,
            "FLOOD_WAIT" => Self::FloodWait,
            "CSV_FLUSH_ERROR" => Self::CsvFlushError,
            "SCRIPT_UNCAUGHT_ERROR" => Self::ScriptUncaughtError,
            "TASK_CANCELLED" => Self::TaskCancelled,
            "RPC_ERROR" => Self::RpcError,
            "UNEXPECTED_ERROR" => Self::UnexpectedError,
            "ARGPARSE_ERROR" => Self::ArgparseError,
            "NO_SESSION" => Self::NoSession,
            "MEMBERS_FETCHED" => Self::MembersFetched,
            "MEMBERS_FROM_MESSAGES_FETCHED" => Self::MembersFromMessagesFetched,
            "MEMBERS_LIMIT_TOO_HIGH" => Self::MembersLimitTooHigh,
            "MESSAGE_LIMIT_TOO_HIGH" => Self::MessageLimitTooHigh,
            "INVALID_CHAT_NAME" => Self::InvalidChatName,
            "INVITE_LINK_NOT_SUPPORTED" => Self::InviteLinkNotSupported,
            "INVALID_USERNAME" => Self::InvalidUsername,
            "FROM_DATE_REQUIRED" => Self::FromDateRequired,
            "FROM_DATE_INVALID" => Self::FromDateInvalid,
            "TO_DATE_REQUIRED" => Self::ToDateRequired,
            "TO_DATE_INVALID" => Self::ToDateInvalid,
            "MESSAGES_FETCHED" => Self::MessagesFetched,
            "CHAT_STATS_FETCHED" => Self::ChatStatsFetched,
            "DIALOG" => Self::Dialog,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ScriptStarted => "SCRIPT_STARTED",
            Self::AllDone => "ALL_DONE",
            Self::FloodWait => "FLOOD_WAIT",
            Self::CsvFlushError => "CSV_FLUSH_ERROR",
            Self::ScriptUncaughtError => "SCRIPT_UNCAUGHT_ERROR",
            Self::TaskCancelled => "TASK_CANCELLED",
            Self::RpcError => "RPC_ERROR",
            Self::UnexpectedError => "UNEXPECTED_ERROR",
            Self::ArgparseError => "ARGPARSE_ERROR",
            Self::NoSession => "NO_SESSION",
            Self::MembersFetched => "MEMBERS_FETCHED",
            Self::MembersFromMessagesFetched => "MEMBERS_FROM_MESSAGES_FETCHED",
            Self::MembersLimitTooHigh => "MEMBERS_LIMIT_TOO_HIGH",
            Self::MessageLimitTooHigh => "MESSAGE_LIMIT_TOO_HIGH",
            Self::InvalidChatName => "INVALID_CHAT_NAME",
            Self::InviteLinkNotSupported => "INVITE_LINK_NOT_SUPPORTED",
            Self::InvalidUsername => "INVALID_USERNAME",
            Self::FromDateRequired => "FROM_DATE_REQUIRED",
            Self::FromDateInvalid => "FROM_DATE_INVALID",
            Self::ToDateRequired => "TO_DATE_REQUIRED",
            Self::ToDateInvalid => "TO_DATE_INVALID",
            Self::MessagesFetched => "MESSAGES_FETCHED",
            Self::ChatStatsFetched => "CHAT_STATS_FETCHED",
            Self::Dialog => "DIALOG",
            Self::Other(code) => code,
        }
    }
}

impl AsRef<str> for WorkerCode {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for WorkerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type OutHandler = Arc<dyn Fn(OutputTag, &WorkerMessage) + Send + Sync>;
pub type ErrHandler = Arc<dyn Fn(&WorkerMessage) + Send + Sync>;

/// Code-keyed output and error handlers. Built once, then only read.
#[derive(Clone, Default)]
pub struct HandlerTable {
    out: HashMap<String, OutHandler>,
    err: HashMap<String, ErrHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_out<F>(mut self, code: impl AsRef<str>, handler: F) -> Self
    where
        F: Fn(OutputTag, &WorkerMessage) + Send + Sync + 'static,
    {
        self.out
            .insert(code.as_ref().to_string(), Arc::new(handler));
        self
    }

    pub fn on_err<F>(mut self, code: impl AsRef<str>, handler: F) -> Self
    where
        F: Fn(&WorkerMessage) + Send + Sync + 'static,
    {
        self.err
            .insert(code.as_ref().to_string(), Arc::new(handler));
        self
    }

    pub fn out_handler(&self, code: &str) -> Option<&OutHandler> {
        self.out.get(code)
    }

    pub fn err_handler(&self, code: &str) -> Option<&ErrHandler> {
        self.err.get(code)
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty() && self.err.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out: Vec<&str> = self.out.keys().map(String::as_str).collect();
        let mut err: Vec<&str> = self.err.keys().map(String::as_str).collect();
        out.sort_unstable();
        err.sort_unstable();
        f.debug_struct("HandlerTable")
            .field("out", &out)
            .field("err", &err)
            .finish()
    }
}

/// Which tier handled a dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Extra,
    Base,
    /// No table knew the code; a diagnostic was logged instead.
    Unhandled,
    /// Nothing to dispatch.
    Skipped,
}

/// Output dispatcher: the call-specific table first, then the defaults.
#[derive(Debug, Clone)]
pub struct OutDispatcher {
    base: Arc<HandlerTable>,
    extra: Option<Arc<HandlerTable>>,
}

impl OutDispatcher {
    pub fn dispatch(&self, tag: OutputTag, message: Option<&WorkerMessage>) -> Dispatch {
        let Some(message) = message else {
            return Dispatch::Skipped;
        };
        if let Some(handler) = self
            .extra
            .as_ref()
            .and_then(|extra| extra.out_handler(&message.code))
        {
            handler(tag, message);
            return Dispatch::Extra;
        }
        if let Some(handler) = self.base.out_handler(&message.code) {
            handler(tag, message);
            return Dispatch::Base;
        }
        tracing::warn!(
            tag = %tag,
            code = %message.code,
            text = ?message.message,
            details = ?message.details,
            "unhandled worker output"
        );
        Dispatch::Unhandled
    }
}

/// Error dispatcher with the same lookup order as [`OutDispatcher`].
#[derive(Debug, Clone)]
pub struct ErrDispatcher {
    base: Arc<HandlerTable>,
    extra: Option<Arc<HandlerTable>>,
}

impl ErrDispatcher {
    pub fn dispatch(&self, message: Option<&WorkerMessage>) -> Dispatch {
        let Some(message) = message else {
            return Dispatch::Skipped;
        };
        if let Some(handler) = self
            .extra
            .as_ref()
            .and_then(|extra| extra.err_handler(&message.code))
        {
            handler(message);
            return Dispatch::Extra;
        }
        if let Some(handler) = self.base.err_handler(&message.code) {
            handler(message);
            return Dispatch::Base;
        }
        tracing::warn!(
            code = %message.code,
            text = ?message.message,
            details = ?message.details,
            "unhandled worker error"
        );
        Dispatch::Unhandled
    }
}

pub fn compose_on_out(base: Arc<HandlerTable>, extra: Option<Arc<HandlerTable>>) -> OutDispatcher {
    OutDispatcher { base, extra }
}

pub fn compose_on_err(base: Arc<HandlerTable>, extra: Option<Arc<HandlerTable>>) -> ErrDispatcher {
    ErrDispatcher { base, extra }
}
