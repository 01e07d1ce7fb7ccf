//! Tracing subscriber setup

use crate::config::{LogFormat, Verbosity};
use tracing::debug;

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` overrides the level derived from `verbosity`. Calling this
/// twice is harmless; the second call is ignored.
pub fn init_logging(verbosity: Verbosity, format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = verbosity.log_level();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (text, json) = match format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    let _ = tracing_subscriber::registry()
        .with(text)
        .with(json)
        .with(filter)
        .try_init();

    debug!("Logging initialized at level: {}", level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(Verbosity::Quiet, LogFormat::Text);
        init_logging(Verbosity::Debug, LogFormat::Json);
    }
}
