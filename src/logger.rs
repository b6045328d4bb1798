//! Tracing setup: a console layer, plus a daily-rolling plain-text file
//! layer when a log directory is configured.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

/// Install the global subscriber.
///
/// `log_level` is an `EnvFilter` directive (e.g. `"info"` or
/// `"pulsehub=debug"`). Returns the file writer's guard when a `log_dir` is
/// given; the caller keeps it alive for the life of the process so buffered
/// lines are flushed on exit.
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(log_level)?;
    let console_layer = fmt::layer().with_thread_names(true);

    match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "pulsehub.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

            Registry::default()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();
            Ok(Some(guard))
        }
        None => {
            Registry::default()
                .with(env_filter)
                .with(console_layer)
                .init();
            Ok(None)
        }
    }
}
