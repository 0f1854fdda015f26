use std::collections::VecDeque;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tdsoft_error::ErrorKind;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};

use crate::envelope::{OutputTag, WorkerEnvelope, WorkerMessage};
use crate::launch::LaunchSpec;

/// Longest line accepted from either stream.
pub const MAX_LINE_BYTES: usize = 1 << 20;
const INITIAL_BUFFER_BYTES: usize = 64 * 1024;
/// Raw stderr lines kept for the fallback error.
pub const STDERR_TAIL_LINES: usize = 200;
/// Code of the error synthesised when a worker fails without reporting one.
pub const UNCAUGHT_ERROR_CODE: &str = "SCRIPT_UNCAUGHT_ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to spawn worker `{command}`: {error}")]
    Spawn {
        command: String,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to capture worker stdout")]
    MissingStdout,
    #[error("failed to capture worker stderr")]
    MissingStderr,
    #[error("worker {stream} line exceeds {max} bytes")]
    LineTooLong { stream: StreamName, max: usize },
    #[error("failed to read worker {stream}: {error}")]
    Read {
        stream: StreamName,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to wait for worker: {0}")]
    Wait(#[source] std::io::Error),
    #[error("worker exited with {status}")]
    Exited { status: ExitStatus },
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Spawn { .. } | Self::Read { .. } | Self::Wait(_) => ErrorKind::Transport,
            Self::MissingStdout | Self::MissingStderr => ErrorKind::Internal,
            Self::LineTooLong { .. } => ErrorKind::Protocol,
            Self::Exited { .. } => ErrorKind::Domain,
        }
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            Self::Exited { status } => Some(*status),
            _ => None,
        }
    }
}

/// Most recent raw stderr lines, oldest first.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(STDERR_TAIL_LINES)),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// What a finished invocation produced, for logging and tests.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub status: ExitStatus,
    pub stdout_lines: u64,
    pub stderr_lines: u64,
    pub elapsed: Duration,
}

/// Runs one worker to completion, dispatching every recognised stdout event
/// to `on_out` and every structured stderr error to `on_err`.
///
/// Returns only after the process has exited and both streams are drained.
/// A failing exit status is always returned as [`TaskError::Exited`], even
/// when the worker already reported a structured error. If it reported none,
/// a [`UNCAUGHT_ERROR_CODE`] message carrying the exit status and the stderr
/// tail goes to `on_err` first.
pub async fn run_streaming<O, E>(
    launch: &LaunchSpec,
    mut on_out: O,
    mut on_err: E,
) -> Result<TaskSummary, TaskError>
where
    O: FnMut(OutputTag, &WorkerMessage),
    E: FnMut(&WorkerMessage),
{
    let started = Instant::now();
    let mut command = launch.command();
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(
        program = ?launch.program,
        args = ?launch.args,
        "spawning worker"
    );

    let mut child = command.spawn().map_err(|error| {
        tracing::error!(
            program = ?launch.program,
            error = %error,
            "failed to spawn worker"
        );
        TaskError::Spawn {
            command: launch.display(),
            error,
        }
    })?;
    let pid = child.id().unwrap_or(0);
    tracing::debug!(pid = pid, "worker spawned");

    let stdout = child.stdout.take().ok_or(TaskError::MissingStdout)?;
    let stderr = child.stderr.take().ok_or(TaskError::MissingStderr)?;

    let mut seen_structured_error = false;
    let mut tail = StderrTail::new(STDERR_TAIL_LINES);

    let (stdout_result, stderr_result, wait_result) = tokio::join!(
        for_each_line(stdout, StreamName::Stdout, |line| {
            match WorkerEnvelope::parse(&line).and_then(WorkerEnvelope::into_output) {
                Some((tag, message)) => on_out(tag, &message),
                None => tracing::trace!(pid = pid, "dropping non-protocol stdout line"),
            }
        }),
        for_each_line(stderr, StreamName::Stderr, |line| {
            match WorkerEnvelope::parse(&line).and_then(WorkerEnvelope::into_error) {
                Some(message) => {
                    seen_structured_error = true;
                    on_err(&message);
                }
                None => tail.push(line),
            }
        }),
        child.wait(),
    );

    let status = wait_result.map_err(TaskError::Wait)?;
    let elapsed = started.elapsed();
    tracing::info!(
        pid = pid,
        status = %status,
        structured_error = seen_structured_error,
        elapsed_ms = elapsed.as_millis() as u64,
        "worker exited"
    );

    if !status.success() {
        if !seen_structured_error {
            tracing::warn!(
                pid = pid,
                stderr_lines = tail.len(),
                "worker failed without a structured error"
            );
            let fallback = WorkerMessage::new(UNCAUGHT_ERROR_CODE)
                .with_detail("error", format!("worker exited with {status}"))
                .with_detail("stderr", tail.joined());
            on_err(&fallback);
        }
        return Err(TaskError::Exited { status });
    }

    Ok(TaskSummary {
        status,
        stdout_lines: stdout_result?,
        stderr_lines: stderr_result?,
        elapsed,
    })
}

/// Feeds each line of `reader` to `handle`. Bytes that are not UTF-8 are
/// replaced, so such lines still count as raw text. An over-long line or a
/// read error ends decoding; the remainder is discarded so the writer never
/// blocks.
async fn for_each_line<R, F>(reader: R, stream: StreamName, mut handle: F) -> Result<u64, TaskError>
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_BYTES);
    let mut lines = FramedRead::with_capacity(reader, codec, INITIAL_BUFFER_BYTES);
    let mut count: u64 = 0;

    while let Some(next) = lines.next().await {
        let error = match next {
            Ok(chunk) => {
                count += 1;
                let raw = chunk.strip_suffix(b"\r").unwrap_or(&chunk);
                handle(String::from_utf8_lossy(raw).into_owned());
                continue;
            }
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => TaskError::LineTooLong {
                stream,
                max: MAX_LINE_BYTES,
            },
            Err(AnyDelimiterCodecError::Io(error)) => TaskError::Read { stream, error },
        };

        tracing::error!(stream = %stream, line_number = count + 1, error = %error, "worker stream aborted");
        let mut rest = lines.into_inner();
        if let Err(err) = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await {
            tracing::debug!(stream = %stream, error = %err, "discarding worker stream failed");
        }
        return Err(error);
    }

    tracing::debug!(stream = %stream, total_lines = count, "worker stream ended");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_most_recent_lines() {
        let mut tail = StderrTail::new(3);
        for i in 0..5 {
            tail.push(format!("line {i}"));
        }
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.joined(), "line 2\nline 3\nline 4");
    }

    #[test]
    fn zero_capacity_tail_stays_empty() {
        let mut tail = StderrTail::new(0);
        tail.push("dropped".to_string());
        assert!(tail.is_empty());
    }

    #[tokio::test]
    async fn over_long_line_is_fatal_for_the_stream() {
        let mut input = vec![b'a'; MAX_LINE_BYTES + 10];
        input.extend_from_slice(b"\nafter\n");
        let mut seen = Vec::new();
        let result = for_each_line(input.as_slice(), StreamName::Stdout, |line| seen.push(line)).await;
        assert!(matches!(
            result,
            Err(TaskError::LineTooLong {
                stream: StreamName::Stdout,
                ..
            })
        ));
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn undecodable_bytes_do_not_end_the_stream() {
        let input: &[u8] = b"caf\xe9 traceback\r\n\xff\xfe noise\n{\"error\":{\"code\":\"RPC_ERROR\"}}\n";
        let mut seen = Vec::new();
        let count = for_each_line(input, StreamName::Stderr, |line| seen.push(line))
            .await
            .expect("lines");
        assert_eq!(count, 3);
        assert_eq!(seen[0], "caf\u{fffd} traceback");
        assert!(seen[1].ends_with(" noise"));
        assert_eq!(seen[2], r#"{"error":{"code":"RPC_ERROR"}}"#);
    }

    #[tokio::test]
    async fn counts_every_line() {
        let input: &[u8] = b"one\n{\"info\":{\"code\":\"X\"}}\nthree";
        let mut seen = Vec::new();
        let count = for_each_line(input, StreamName::Stderr, |line| seen.push(line))
            .await
            .expect("lines");
        assert_eq!(count, 3);
        assert_eq!(seen[2], "three");
    }
}
