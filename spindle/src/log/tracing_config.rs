// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Declarative logging configuration: where output goes and at what level.
//! [`try_init`] composes the subscriber layers; see [`tracing_init`].
//!
//! [`try_init`]: super::tracing_init::try_init
//! [`tracing_init`]: super::tracing_init

use std::path::PathBuf;
use tracing_core::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayPreference {
    Stdout,
    Stderr,
}

/// Where log output is written. File output is line-buffered through a
/// background worker; hold the returned guard for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterConfig {
    None,
    Display(DisplayPreference),
    File(PathBuf),
    DisplayAndFile(DisplayPreference, PathBuf),
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub writer_config: WriterConfig,
    pub level_filter: LevelFilter,
}

impl TracingConfig {
    /// Log to the chosen standard stream.
    #[must_use]
    pub fn new_display(preference: DisplayPreference, level_filter: LevelFilter) -> Self {
        TracingConfig {
            writer_config: WriterConfig::Display(preference),
            level_filter,
        }
    }

    /// Log to a file (created if missing, appended otherwise).
    #[must_use]
    pub fn new_file(path: impl Into<PathBuf>, level_filter: LevelFilter) -> Self {
        TracingConfig {
            writer_config: WriterConfig::File(path.into()),
            level_filter,
        }
    }

    #[must_use]
    pub fn get_level_filter(&self) -> LevelFilter { self.level_filter }

    #[must_use]
    pub fn get_writer_config(&self) -> &WriterConfig { &self.writer_config }
}
