// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

/// Initialises the process-wide tracing subscriber.
///
/// Events go to stdout and, when `log_dir` is given, to a daily-rotated
/// `gateway.log` in that directory. The level comes from `RUST_LOG` and
/// defaults to `info`. The returned guard must be kept alive for the process
/// lifetime or buffered file output is lost on exit.
pub fn init_logger(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log dir {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

            let subscriber = Registry::default()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer);
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set global default subscriber")?;
            Ok(Some(guard))
        },
        None => {
            let subscriber = Registry::default().with(env_filter).with(stdout_layer);
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set global default subscriber")?;
            Ok(None)
        },
    }
}
