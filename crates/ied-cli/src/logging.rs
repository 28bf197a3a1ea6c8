//! Logging initialization for the CLI.
//!
//! Library crates only emit `tracing` events; the subscriber lives here.

use ied_core::{LogFormat, LogLevel};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn to_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` is honored; the configured level is added on top of it for the
/// `ied` crates. Output always goes to stderr so stdout stays parseable.
///
/// JSON output format:
/// ```json
/// {"timestamp":"...","level":"INFO","fields":{"message":"installing","name":"left-pad","version":"*"},"target":"ied_core::pkg::store"}
/// ```
pub fn init(level: LogLevel, format: LogFormat) {
    let level = to_level(level);

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    for target in ["ied_core", "ied"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    let subscriber = tracing_subscriber::registry().with(filter);

    // try_init: a second call (tests) keeps the first subscriber
    match format {
        LogFormat::Json => {
            let _ = subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(false)
                        .with_writer(std::io::stderr),
                )
                .try_init();
        }
        LogFormat::Text => {
            let _ = subscriber
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .try_init();
        }
    }
}
