use tracing_subscriber::{EnvFilter, fmt};

/// Temporary directory for a single download, removed when dropped or closed
pub fn tempdir() -> std::io::Result<tempfile::TempDir> {
    tempfile::Builder::new().prefix("stlfetch-").tempdir()
}

/// Installs the global tracing subscriber.
///
/// Logs go to stderr so that progress and summaries on stdout stay readable.
/// Verbosity follows `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
