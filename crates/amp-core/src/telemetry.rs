//! Tracing initialisation for processes embedding the memory graph.
//!
//! Call [`init_tracing`] once at start-up. Later calls are ignored because
//! the global subscriber can only be installed once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable selecting the log line format (`json` or `text`).
pub const LOG_FORMAT_ENV: &str = "AMP_LOG_FORMAT";

/// Install the global subscriber.
///
/// * `json`: emit newline-delimited JSON instead of human-readable lines.
/// * `level`: verbosity used when `RUST_LOG` is unset.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// [`init_tracing`] with the format taken from `AMP_LOG_FORMAT`.
pub fn init_tracing_from_env(level: Level) {
    init_tracing(json_requested(std::env::var(LOG_FORMAT_ENV).ok().as_deref()), level);
}

fn json_requested(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("json"))
}
