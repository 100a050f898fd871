//! Logging Module
//!
//! Subscriber setup for hosts that want the crate's diagnostics on disk.

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize logging with console and file output.
///
/// Does nothing if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) {
    // Ensure log directory exists
    let _ = std::fs::create_dir_all(&config.directory);

    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        &config.directory,
        &config.file_prefix,
    );

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_appender);

    // Console layer (debug builds only)
    #[cfg(debug_assertions)]
    let console_layer = Some(fmt::layer().with_target(true).pretty());

    #[cfg(not(debug_assertions))]
    let console_layer: Option<fmt::Layer<_>> = None;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn default_filter() -> EnvFilter {
    #[cfg(debug_assertions)]
    {
        EnvFilter::new("debug")
    }
    #[cfg(not(debug_assertions))]
    {
        EnvFilter::new("info")
    }
}
