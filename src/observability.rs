//! Observability utilities.

use std::fs::OpenOptions;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::{ObservabilityConfig, Result};

/// Switches log output to JSON when set to `json`.
pub const LOG_FORMAT_ENV: &str = "WATCHDOG_LOG_FORMAT";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize the tracing subscriber once for the process.
///
/// Logs go to stderr, or are appended to `config.log_file`. Stdout is never
/// written. Format is compact text unless JSON is requested by the config or
/// `WATCHDOG_LOG_FORMAT=json`. Filter defaults to `info` if `RUST_LOG` is
/// unset.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let (writer, ansi) = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };
    let json = config.json_logs
        || std::env::var(LOG_FORMAT_ENV)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

    TRACING_INIT.get_or_init(move || {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_ansi(ansi).with_writer(writer))
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::init_tracing;
    use crate::types::ObservabilityConfig;

    // Successful initialization installs a global subscriber, which would
    // collide with `traced_test` in this binary; see tests/ for that path.
    #[test]
    fn unwritable_log_file_is_an_error() {
        let config = ObservabilityConfig {
            json_logs: false,
            log_file: Some("/nonexistent-dir/watchdog.log".into()),
        };
        assert!(init_tracing(&config).is_err());
    }
}
