//! Bridge to short-lived worker scripts that report progress as one JSON
//! envelope per line on stdout and stderr.

pub mod envelope;
pub mod handlers;
pub mod launch;
pub mod process;

pub use envelope::{OutputTag, Slot, WorkerEnvelope, WorkerMessage};
pub use handlers::{
    compose_on_err, compose_on_out, Dispatch, ErrDispatcher, ErrHandler, HandlerTable,
    OutDispatcher, OutHandler, WorkerCode,
};
pub use launch::LaunchSpec;
pub use process::{
    run_streaming, StderrTail, StreamName, TaskError, TaskSummary, MAX_LINE_BYTES,
    STDERR_TAIL_LINES, UNCAUGHT_ERROR_CODE,
};
