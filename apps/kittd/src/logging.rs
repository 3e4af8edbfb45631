// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured logging setup, following `apps/skit/src/logging.rs`'s
//! layer-stacking shape: a console
//! [`tracing_subscriber::fmt`] layer and an optional rolling-file layer,
//! each with its own level filter. Unlike `apps/skit`, there is no
//! mandatory OpenTelemetry OTLP trace exporter layer — `kittd` has one
//! conceptual pipeline per room rather than many node
//! types worth exporting spans for — but the
//! `opentelemetry` metrics API is still used directly for the
//! Supervisor's session-style gauges (see [`crate::supervisor`]).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

type DynLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn env_filter_or_level(default_level: tracing::Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str()))
}

fn make_console_layer(level: tracing::Level) -> DynLayer {
    tracing_subscriber::fmt::layer().with_filter(env_filter_or_level(level)).boxed()
}

fn make_file_layer(non_blocking: tracing_appender::non_blocking::NonBlocking, level: tracing::Level, format: LogFormat) -> DynLayer {
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .json()
            .with_filter(env_filter_or_level(level))
            .boxed(),
        LogFormat::Text => {
            tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false).with_filter(env_filter_or_level(level)).boxed()
        }
    }
}

/// Initializes the global tracing subscriber from `logging.*`. The
/// returned guard must be kept alive for the process lifetime when file
/// logging is enabled — dropping it stops the non-blocking writer.
///
/// # Errors
///
/// Returns an error if file logging is enabled and its directory cannot
/// be created.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, std::io::Error> {
    let mut guard = None;
    let mut layers: Vec<DynLayer> = Vec::new();

    if config.file_enable {
        let log_path = std::path::Path::new(&config.file_path);
        let log_dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let log_filename = log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("kittd.log"));
        std::fs::create_dir_all(log_dir)?;

        let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);
        layers.push(make_file_layer(non_blocking, config.file_level.into(), config.file_format));
    }

    if config.console_enable {
        layers.push(make_console_layer(config.console_level.into()));
    }

    if !config.console_enable && !config.file_enable {
        layers.push(make_console_layer(tracing::Level::INFO));
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(guard)
}
