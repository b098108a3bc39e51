//! Tracing/logging initialization.
//!
//! Events go to stderr so stdout only carries command output.

use tracing_subscriber::EnvFilter;

use crate::LogSettings;

/// Filter from `RUST_LOG` when set and valid, else from the configured level.
pub fn filter(settings: &LogSettings) -> EnvFilter {
    filter_from(std::env::var("RUST_LOG").ok().as_deref(), &settings.level)
}

fn filter_from(env: Option<&str>, level: &str) -> EnvFilter {
    env.filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(settings: &LogSettings) {
    let filter = filter(settings);

    if settings.json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
