//! Handler tables turning worker events into user log lines.
//!
//! [`defaults`] is built once per controller; the per-task tables are layered
//! over it for a single run.

use std::sync::Arc;

use tdsoft_worker_stream::{HandlerTable, WorkerCode, WorkerMessage};

use crate::user_log::{LogLevel, UserLog};

pub fn defaults(log: &Arc<UserLog>) -> HandlerTable {
    let flood = log.clone();
    let flush = log.clone();
    let done = log.clone();
    let uncaught = log.clone();
    let cancelled = log.clone();
    let rpc = log.clone();
    let unexpected = log.clone();

    HandlerTable::new()
        .on_out(WorkerCode::FloodWait, move |_, msg| {
            tracing::warn!(details = ?msg.details, "flood wait");
            flood.emit(
                LogLevel::Warn,
                &format!(
                    "Flood wait: {} seconds, program will pause. You can stop it, data has been saved",
                    msg.detail_text("seconds")
                ),
            );
        })
        .on_out(WorkerCode::CsvFlushError, move |_, msg| {
            tracing::warn!(details = ?msg.details, "csv flush error");
            flush.emit(
                LogLevel::Warn,
                "Detected error writing to file. Program will continue, but data may be broken",
            );
        })
        .on_out(WorkerCode::AllDone, move |_, msg| {
            tracing::info!(details = ?msg.details, "all done");
            match msg.detail_str("output") {
                Some(output) => done.emit(LogLevel::Info, &format!("All done, result in {output}")),
                None => done.emit(LogLevel::Info, "All done"),
            }
        })
        .on_out(WorkerCode::ScriptStarted, |_, msg| {
            tracing::info!(details = ?msg.details, "script started");
        })
        .on_err(WorkerCode::ScriptUncaughtError, move |msg| {
            tracing::error!(details = ?msg.details, "uncaught error");
            uncaught.emit(LogLevel::Error, "something went wrong");
        })
        .on_err(WorkerCode::TaskCancelled, move |msg| {
            tracing::error!(details = ?msg.details, "task cancelled");
            cancelled.emit(LogLevel::Warn, "task cancelled by system");
        })
        .on_err(WorkerCode::RpcError, move |msg| {
            tracing::error!(details = ?msg.details, "rpc error");
            rpc.emit(LogLevel::Error, "API error");
        })
        .on_err(WorkerCode::UnexpectedError, move |msg| {
            tracing::error!(details = ?msg.details, "unexpected error");
            unexpected.emit(LogLevel::Error, "unexpected error occurred");
        })
        .on_err(WorkerCode::ArgparseError, |msg| {
            tracing::error!(details = ?msg.details, "argument parse error");
        })
        .on_err(WorkerCode::NoSession, |msg| {
            tracing::error!(details = ?msg.details, "no session provided");
        })
}

pub fn members(log: &Arc<UserLog>) -> HandlerTable {
    let fetched = log.clone();
    let from_messages = log.clone();
    let limit = log.clone();
    let messages_limit = log.clone();

    with_chat_name_errors(HandlerTable::new(), log)
        .on_out(WorkerCode::MembersFetched, move |_, msg| {
            tracing::info!(details = ?msg.details, "fetched members");
            fetched.emit(
                LogLevel::Info,
                &format!("fetched {} members", msg.detail_text("total")),
            );
        })
        .on_out(WorkerCode::MembersFromMessagesFetched, move |_, msg| {
            tracing::info!(details = ?msg.details, "fetched members from messages");
            from_messages.emit(
                LogLevel::Info,
                &format!("fetched {} members from messages", msg.detail_text("total")),
            );
        })
        .on_err(WorkerCode::MembersLimitTooHigh, move |msg| {
            tracing::error!(details = ?msg.details, "limit too high");
            limit.emit(LogLevel::Error, &limit_too_high("limit too high", msg));
        })
        .on_err(WorkerCode::MessageLimitTooHigh, move |msg| {
            tracing::error!(details = ?msg.details, "messages limit too high");
            messages_limit.emit(
                LogLevel::Error,
                &limit_too_high("messages limit too high", msg),
            );
        })
}

pub fn chat_stats(log: &Arc<UserLog>) -> HandlerTable {
    let fetched = log.clone();
    with_chat_name_errors(HandlerTable::new(), log).on_out(
        WorkerCode::ChatStatsFetched,
        move |_, msg| {
            tracing::info!(details = ?msg.details, "fetched chat statistics");
            fetched.emit(
                LogLevel::Info,
                &format!("read {} messages of history", msg.detail_text("total")),
            );
        },
    )
}

pub fn search_messages(log: &Arc<UserLog>) -> HandlerTable {
    let fetched = log.clone();
    let username = log.clone();

    let mut table = with_chat_name_errors(HandlerTable::new(), log)
        .on_out(WorkerCode::MessagesFetched, move |_, msg| {
            tracing::info!(details = ?msg.details, "fetched messages");
            fetched.emit(
                LogLevel::Info,
                &format!("found {} messages", msg.detail_text("total")),
            );
        })
        .on_err(WorkerCode::InvalidUsername, move |msg| {
            tracing::error!(details = ?msg.details, "invalid username");
            username.emit(
                LogLevel::Error,
                &format!("invalid username: {}", msg.detail_text("name")),
            );
        });

    for code in [
        WorkerCode::FromDateRequired,
        WorkerCode::FromDateInvalid,
        WorkerCode::ToDateRequired,
        WorkerCode::ToDateInvalid,
    ] {
        let dates = log.clone();
        table = table.on_err(code, move |msg| {
            tracing::error!(code = %msg.code, details = ?msg.details, "invalid date");
            dates.emit(LogLevel::Error, &msg.detail_text("error"));
        });
    }
    table
}

pub fn print_dialogs(log: &Arc<UserLog>) -> HandlerTable {
    let dialogs = log.clone();
    HandlerTable::new().on_out(WorkerCode::Dialog, move |_, msg| {
        dialogs.emit(LogLevel::Info, &render_dialog(msg));
    })
}

/// `[n] id=.., type=.., title=.., username=@..`
pub fn render_dialog(msg: &WorkerMessage) -> String {
    let title = msg
        .detail_str("title")
        .filter(|title| !title.is_empty())
        .unwrap_or("(no title)");
    let username = msg
        .detail_str("username")
        .filter(|name| !name.is_empty())
        .map(|name| format!("@{}", name.trim_start_matches('@')))
        .unwrap_or_default();
    format!(
        "[{}] id={}, type={}, title={title}, username={username}",
        msg.detail_text("index"),
        msg.detail_text("id"),
        msg.detail_text("type"),
    )
}

fn with_chat_name_errors(table: HandlerTable, log: &Arc<UserLog>) -> HandlerTable {
    let invalid = log.clone();
    let invite = log.clone();
    table
        .on_err(WorkerCode::InvalidChatName, move |msg| {
            tracing::error!(details = ?msg.details, "invalid chat name");
            invalid.emit(
                LogLevel::Error,
                &format!("invalid chat name: {}", msg.detail_text("name")),
            );
        })
        .on_err(WorkerCode::InviteLinkNotSupported, move |msg| {
            tracing::error!(details = ?msg.details, "invite link not supported yet");
            invite.emit(LogLevel::Error, "invite link not supported yet");
        })
}

fn limit_too_high(what: &str, msg: &WorkerMessage) -> String {
    format!(
        "{what}, got {}, max is {}",
        msg.detail_text("limit"),
        msg.detail_text("max")
    )
}
