//! Tracing subscriber setup for the binary.
//!
//! `RUST_LOG` wins when set; otherwise `[logging].level` applies to every
//! target. Logs go to stderr so command output on stdout stays parseable.

use tracing_subscriber::EnvFilter;

pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
