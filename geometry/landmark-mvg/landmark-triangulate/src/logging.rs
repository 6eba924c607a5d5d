//! Console and file logging through `tracing-subscriber`.
use std::{fs::File, path::Path, sync::Mutex};

use time::{format_description::well_known::Iso8601, UtcOffset};
use tracing::debug;
use tracing_subscriber::{
    fmt::{self, time::OffsetTime},
    prelude::*,
    EnvFilter,
};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

#[derive(thiserror::Error, Debug)]
pub enum LoggingError {
    #[error("could not determine local UTC offset: {0}")]
    Offset(#[from] time::error::ComponentRange),
    #[error("could not create log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not set global subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Keeps logging alive; dropping it is the end of the logging session.
#[must_use]
pub struct Guard {}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber, optionally also writing to `log_file`.
///
/// Can only succeed once per process.
pub fn initiate_logging<P: AsRef<Path>>(
    log_file: Option<P>,
    disable_console: bool,
) -> Result<Guard, LoggingError> {
    let offset = UtcOffset::from_whole_seconds(chrono::Local::now().offset().local_minus_utc())?;
    let timer = OffsetTime::new(offset, Iso8601::DEFAULT);

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path.as_ref())?;
            Some(
                fmt::layer()
                    .with_timer(timer.clone())
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let console_layer = if disable_console {
        None
    } else {
        Some(
            fmt::layer()
                .with_timer(timer)
                .with_ansi(!cfg!(windows))
                .with_file(true)
                .with_line_number(true),
        )
    };

    let collector = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(env_filter());
    tracing::subscriber::set_global_default(collector)?;

    debug!(
        "logging initiated, RUST_LOG={:?}",
        std::env::var_os("RUST_LOG")
    );
    Ok(Guard {})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let first = initiate_logging(Some(&path), true);
        assert!(path.exists());
        if let Ok(_guard) = first {
            tracing::info!("logged to file");
            assert!(matches!(
                initiate_logging(None::<&Path>, true),
                Err(LoggingError::SetGlobal(_))
            ));
        }
    }
}
