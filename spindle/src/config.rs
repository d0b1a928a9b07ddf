// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Loop configuration record. All fields have defaults; unknown fields are
//! rejected (the closed option-record model - no dynamic kwargs).

use crate::error::LoopError;
use serde::Deserialize;

pub const DEFAULT_MAX_HTTP_CONCURRENCY: usize = 8;
pub const DEFAULT_DB_POOL_SIZE: usize = 4;
pub const DEFAULT_FILE_CHUNK_BYTES: usize = 64 * 1024;
pub const DEFAULT_NEXT_TICK_CAP: usize = 1024;
pub const DEFAULT_IDLE_SLEEP_MS: u64 = 1;
pub const DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SEC: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    /// Upper bound on simultaneously active HTTP transfers; excess requests
    /// stay queued in FIFO order.
    pub max_http_concurrency: usize,

    /// Default `max` for pools constructed without an explicit size.
    pub db_pool_size: usize,

    /// Chunk size for cooperatively streamed file writes and copies.
    pub file_chunk_bytes: usize,

    /// Hard cap on re-entrant next-tick/deferred drains per tick; excess
    /// spills to the following tick to prevent live-lock.
    pub next_tick_cap: usize,

    /// Sleep applied when a whole tick made no progress with a zero poll
    /// budget, to yield the CPU.
    pub idle_sleep_ms: u64,

    /// How long a graceful [`stop`] waits for idle before escalating to
    /// [`force_stop`].
    ///
    /// [`stop`]: crate::event_loop::LoopHandle::stop
    /// [`force_stop`]: crate::event_loop::LoopHandle::force_stop
    pub force_shutdown_timeout_sec: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_http_concurrency: DEFAULT_MAX_HTTP_CONCURRENCY,
            db_pool_size: DEFAULT_DB_POOL_SIZE,
            file_chunk_bytes: DEFAULT_FILE_CHUNK_BYTES,
            next_tick_cap: DEFAULT_NEXT_TICK_CAP,
            idle_sleep_ms: DEFAULT_IDLE_SLEEP_MS,
            force_shutdown_timeout_sec: DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SEC,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration record from JSON. Unknown fields fail with
    /// [`LoopError::InvalidConfiguration`], as do out-of-range values.
    pub fn from_json(json: &str) -> Result<Self, LoopError> {
        let config: RuntimeConfig = serde_json::from_str(json)
            .map_err(|err| LoopError::invalid_configuration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Range-check every field. Runs synchronously at loop construction.
    pub fn validate(&self) -> Result<(), LoopError> {
        if self.max_http_concurrency == 0 {
            return Err(LoopError::invalid_configuration(
                "max_http_concurrency must be at least 1",
            ));
        }
        if self.db_pool_size == 0 {
            return Err(LoopError::invalid_configuration(
                "db_pool_size must be at least 1",
            ));
        }
        if self.file_chunk_bytes == 0 {
            return Err(LoopError::invalid_configuration(
                "file_chunk_bytes must be at least 1",
            ));
        }
        if self.next_tick_cap == 0 {
            return Err(LoopError::invalid_configuration(
                "next_tick_cap must be at least 1",
            ));
        }
        if !self.force_shutdown_timeout_sec.is_finite()
            || self.force_shutdown_timeout_sec < 0.0
        {
            return Err(LoopError::invalid_configuration(
                "force_shutdown_timeout_sec must be a non-negative finite number",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.file_chunk_bytes, 64 * 1024);
        assert_eq!(config.next_tick_cap, 1024);
    }

    #[test]
    fn test_from_json_with_overrides() {
        let config =
            RuntimeConfig::from_json(r#"{"max_http_concurrency": 2, "idle_sleep_ms": 5}"#)
                .unwrap();
        assert_eq!(config.max_http_concurrency, 2);
        assert_eq!(config.idle_sleep_ms, 5);
        // Unspecified fields keep their defaults.
        assert_eq!(config.db_pool_size, DEFAULT_DB_POOL_SIZE);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = RuntimeConfig::from_json(r#"{"max_sockets": 10}"#);
        assert!(matches!(
            result,
            Err(LoopError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let result = RuntimeConfig::from_json(r#"{"max_http_concurrency": 0}"#);
        assert!(matches!(
            result,
            Err(LoopError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_negative_shutdown_timeout_is_rejected() {
        let result = RuntimeConfig::from_json(r#"{"force_shutdown_timeout_sec": -1.0}"#);
        assert!(matches!(
            result,
            Err(LoopError::InvalidConfiguration { .. })
        ));
    }
}
