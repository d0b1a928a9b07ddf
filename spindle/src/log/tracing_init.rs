// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Layer composition for the tracing subscriber.
//!
//! [`try_create_layers`] returns the layers without installing anything, so
//! callers choose between [`try_init`] (global, for binaries) and
//! [`try_init_scoped`] (thread-scoped default, for tests that must not
//! observe each other's output).

use super::tracing_config::{DisplayPreference, TracingConfig, WriterConfig};
use miette::IntoDiagnostic;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_core::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt,
                         registry::Registry,
                         util::SubscriberInitExt,
                         Layer};

/// Type alias for a boxed layer.
pub type DynLayer<S> = dyn Layer<S> + Send + Sync + 'static;

/// Build the layer stack from the configuration. The returned
/// [`WorkerGuard`], when present, flushes the file writer on drop - keep it
/// alive as long as logging should work.
pub fn try_create_layers(
    config: &TracingConfig,
) -> miette::Result<(Vec<Box<DynLayer<Registry>>>, Option<WorkerGuard>)> {
    let mut layers: Vec<Box<DynLayer<Registry>>> = vec![];
    let mut guard = None;

    match config.get_writer_config() {
        WriterConfig::None => {}
        WriterConfig::Display(preference) => {
            layers.push(create_display_layer(*preference, config.get_level_filter()));
        }
        WriterConfig::File(path) => {
            let (layer, file_guard) =
                try_create_file_layer(path, config.get_level_filter())?;
            layers.push(layer);
            guard = Some(file_guard);
        }
        WriterConfig::DisplayAndFile(preference, path) => {
            layers.push(create_display_layer(*preference, config.get_level_filter()));
            let (layer, file_guard) =
                try_create_file_layer(path, config.get_level_filter())?;
            layers.push(layer);
            guard = Some(file_guard);
        }
    }

    Ok((layers, guard))
}

fn create_display_layer(
    preference: DisplayPreference,
    level_filter: LevelFilter,
) -> Box<DynLayer<Registry>> {
    match preference {
        DisplayPreference::Stdout => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(level_filter)
            .boxed(),
        DisplayPreference::Stderr => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(level_filter)
            .boxed(),
    }
}

fn try_create_file_layer(
    path: &Path,
    level_filter: LevelFilter,
) -> miette::Result<(Box<DynLayer<Registry>>, WorkerGuard)> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| miette::miette!("log path has no file name: {}", path.display()))?;
    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(level_filter)
        .boxed();
    Ok((layer, guard))
}

/// Install the configured subscriber globally. Fails if a global
/// subscriber is already set.
pub fn try_init(config: &TracingConfig) -> miette::Result<Option<WorkerGuard>> {
    let (layers, guard) = try_create_layers(config)?;
    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .into_diagnostic()?;
    Ok(guard)
}

/// Install the configured subscriber as the thread default. Dropping the
/// returned guards uninstalls it; this is the test-friendly variant.
pub fn try_init_scoped(
    config: &TracingConfig,
) -> miette::Result<(tracing::subscriber::DefaultGuard, Option<WorkerGuard>)> {
    let (layers, guard) = try_create_layers(config)?;
    let default_guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(layers));
    Ok((default_guard, guard))
}
