//! Subscriber setup for binaries built on chunkio.
//!
//! The library itself only emits `tracing` events; nothing is printed until a
//! binary calls [`init`]. Events go to stderr so stdout stays free for
//! program output such as `--print-config`.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Error, Result};
use std::io::IsTerminal;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Resolve the event filter. A RUST_LOG that parses wins over the config;
/// a malformed configured level is an error.
fn filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(directives) = std::env::var(EnvFilter::DEFAULT_ENV)
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| Error::Config(format!("logging.level {:?}: {e}", config.level)))
}

/// One stderr formatter, shaped by the configured format.
fn output_layer(config: &LoggingConfig, ansi: bool) -> BoxedLayer {
    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.target);

    match (config.format, config.timestamps) {
        (LogFormat::Json, true) => base.json().boxed(),
        (LogFormat::Json, false) => base.json().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().with_ansi(ansi).boxed(),
        (LogFormat::Compact, false) => base.compact().with_ansi(ansi).without_time().boxed(),
        (LogFormat::Pretty, true) => base.with_ansi(ansi).boxed(),
        (LogFormat::Pretty, false) => base.with_ansi(ansi).without_time().boxed(),
    }
}

/// Install the global subscriber.
///
/// Colors are used only when stderr is a terminal. Fails if the configured
/// level does not parse or a global subscriber is already set.
///
/// ```no_run
/// use chunkio::config::LoggingConfig;
/// use chunkio::logging;
///
/// logging::init(&LoggingConfig::default()).unwrap();
/// tracing::info!("echo server starting");
/// ```
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = filter(config)?;
    let ansi = std::io::stderr().is_terminal();
    tracing_subscriber::registry()
        .with(output_layer(config, ansi).with_filter(filter))
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_level(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_accepts_per_module_directives() {
        if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
            return;
        }
        assert!(filter(&with_level("chunkio=debug,warn")).is_ok());
        assert!(filter(&with_level("info")).is_ok());
    }

    #[test]
    fn test_filter_rejects_malformed_level() {
        if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
            return;
        }
        let err = filter(&with_level("chunkio=loud")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn test_every_format_builds_a_layer() {
        for format in [LogFormat::Pretty, LogFormat::Json, LogFormat::Compact] {
            for timestamps in [true, false] {
                let config = LoggingConfig {
                    format,
                    timestamps,
                    ..Default::default()
                };
                let _ = output_layer(&config, false);
            }
        }
    }
}
