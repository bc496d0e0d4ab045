//! Structured logging.
//!
//! # Responsibilities
//! - Install the global subscriber before anything else runs
//! - Raise the level once the configuration is known
//! - Redirect output to a log file when one is configured
//!
//! # Design Decisions
//! - Starts at `error`: nothing but failures is logged before the
//!   configuration has been read
//! - `RUST_LOG` always wins over the configured level

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{self, format};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::config::schema::LoggingConfig;

/// Level used until the configuration has been read.
pub const INITIAL_LEVEL: &str = "error";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level {level:?}: {source}")]
    Level {
        level: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("cannot open log file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("log filter is gone: {0}")]
    Reload(#[from] reload::Error),
}

type Filtered = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type OutputLayer = fmt::Layer<Filtered, format::DefaultFields, format::Format, BoxMakeWriter>;
type Installed = Layered<reload::Layer<OutputLayer, Filtered>, Filtered>;

/// Runtime control over the installed subscriber.
///
/// Output goes through a non-blocking writer; the worker guards live here,
/// so the last clone must be dropped only after the final event.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    output: reload::Handle<OutputLayer, Filtered>,
    guards: Arc<Mutex<Vec<WorkerGuard>>>,
    env_override: bool,
}

impl LogHandle {
    /// Apply the logging section of the configuration.
    pub fn apply(&self, config: &LoggingConfig) -> Result<(), LoggingError> {
        if !config.file_path.is_empty() {
            self.redirect(&config.file_path)?;
        }
        if self.env_override {
            return Ok(());
        }
        let filter = EnvFilter::try_new(&config.level).map_err(|source| LoggingError::Level {
            level: config.level.clone(),
            source,
        })?;
        self.filter.reload(filter)?;
        Ok(())
    }

    /// Append all further output to `path`.
    fn redirect(&self, path: &str) -> Result<(), LoggingError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| LoggingError::File {
                path: path.to_string(),
                source,
            })?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        self.output
            .modify(|layer| *layer.writer_mut() = BoxMakeWriter::new(writer))?;
        self.guards.lock().push(guard);
        Ok(())
    }
}

fn subscriber(filter: EnvFilter, env_override: bool) -> (Installed, LogHandle) {
    let (filter, filter_handle) = reload::Layer::new(filter);
    let (stderr, guard) = tracing_appender::non_blocking(io::stderr());
    let output: OutputLayer = fmt::layer().with_ansi(false).with_writer(BoxMakeWriter::new(stderr));
    let (output, output_handle) = reload::Layer::new(output);

    let subscriber = tracing_subscriber::registry().with(filter).with(output);
    let handle = LogHandle {
        filter: filter_handle,
        output: output_handle,
        guards: Arc::new(Mutex::new(vec![guard])),
        env_override,
    };
    (subscriber, handle)
}

/// Install the global subscriber. Calling it again leaves the first one in
/// place; the returned handle then controls nothing.
pub fn init() -> LogHandle {
    let (filter, env_override) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(INITIAL_LEVEL), false),
    };
    let (subscriber, handle) = subscriber(filter, env_override);
    if subscriber.try_init().is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_file_receives_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.log");
        let (subscriber, handle) = subscriber(EnvFilter::new(INITIAL_LEVEL), false);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before the configuration");
            handle
                .apply(&LoggingConfig {
                    level: "info".into(),
                    file_path: path.display().to_string(),
                })
                .unwrap();
            tracing::info!("after the configuration");
        });
        // Dropping the guards flushes the writer.
        drop(handle);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("after the configuration"), "{written}");
        assert!(!written.contains("before the configuration"));
    }

    #[test]
    fn unwritable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (_subscriber, handle) = subscriber(EnvFilter::new(INITIAL_LEVEL), false);
        let config = LoggingConfig {
            level: "info".into(),
            file_path: dir.path().join("missing/gateway.log").display().to_string(),
        };
        assert!(matches!(handle.apply(&config), Err(LoggingError::File { .. })));
    }

    #[test]
    fn bad_level_is_rejected() {
        let handle = init();
        let config = LoggingConfig {
            level: "gateway=loud".into(),
            file_path: String::new(),
        };
        // RUST_LOG may be set in the test environment.
        if !handle.env_override {
            assert!(matches!(handle.apply(&config), Err(LoggingError::Level { .. })));
        }
    }
}
