//! Logging setup for the husk CLI.

use tracing_subscriber::EnvFilter;

/// Initialize tracing.
///
/// - Uses the `RUST_LOG` environment variable for filtering, falling back to
///   `default_filter` when it is not set.
/// - Outputs to `stderr` so the command's own stdout passes through untouched.
/// - Disables target display for cleaner CLI output.
pub fn init(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
