fn main() {
    if let Err(err) = tdsoft::cli::run_tdsoft() {
        tracing::error!(error = %err, "tdsoft failed");
        std::process::exit(1);
    }
}
