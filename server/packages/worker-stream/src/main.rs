use std::path::PathBuf;

use clap::Parser;
use tdsoft_worker_stream::{run_streaming, LaunchSpec, TaskError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "worker-stream")]
#[command(about = "Run one worker script and print the events it reports", version)]
struct Cli {
    /// Interpreter or executable to launch.
    program: PathBuf,

    /// Arguments passed through to the worker.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let launch = LaunchSpec::new(cli.program).args(cli.args);

    let result = run_streaming(
        &launch,
        |tag, message| {
            tracing::info!(
                tag = %tag,
                code = %message.code,
                text = ?message.message,
                details = %serde_json::Value::Object(message.details.clone()),
                "worker event"
            );
        },
        |message| {
            tracing::error!(
                code = %message.code,
                text = ?message.message,
                details = %serde_json::Value::Object(message.details.clone()),
                "worker error"
            );
        },
    )
    .await;

    match result {
        Ok(summary) => {
            tracing::info!(
                stdout_lines = summary.stdout_lines,
                stderr_lines = summary.stderr_lines,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "worker finished"
            );
        }
        Err(err) => {
            tracing::error!(error = %err, kind = %err.kind(), "worker-stream failed");
            let code = match &err {
                TaskError::Exited { status } => status.code().unwrap_or(1),
                _ => 1,
            };
            std::process::exit(code);
        }
    }
}
