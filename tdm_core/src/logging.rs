//! Logging setup shared by the CLI and anything embedding the engine.
//!
//! Logs go to stderr; stdout is reserved for command output. The HTTP client
//! stack is held at WARN unless RUST_LOG says otherwise, so evaluator retries
//! show up without connection-pool chatter.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates under the evaluator client that are noisy at INFO and below
const QUIET_DEPENDENCIES: [&str; 4] = ["hyper", "hyper_util", "reqwest", "rustls"];

/// Filter directives for a default level
pub fn default_directives(level: &str) -> String {
    let mut directives = level.trim().to_lowercase();
    for dependency in QUIET_DEPENDENCIES {
        directives.push_str(&format!(",{}=warn", dependency));
    }
    directives
}

/// INFO logging, overridable with RUST_LOG
pub fn init() {
    init_with_level("info")
}

/// Logging at `default_level` (debug, info, warn, error)
///
/// RUST_LOG replaces the default directives entirely when set. Calling this
/// again after a subscriber is installed is a no-op.
pub fn init_with_level(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
    if installed.is_err() {
        tracing::debug!("Logging already initialised");
    }
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
