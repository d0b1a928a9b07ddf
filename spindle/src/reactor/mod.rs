// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Readiness demultiplexing behind the [`Reactor`] strategy trait.
//!
//! Two implementations satisfy the contract:
//! 1. [`PollReactor`] - portable `poll(2)` via `rustix`; rebuilds its fd
//!    array per call, which is fine for the watcher counts this runtime
//!    targets.
//! 2. [`MioReactor`] - `epoll` (Linux) / `kqueue` (macOS) via `mio`, with
//!    incremental (re)registration across calls.
//!
//! Contract highlights:
//! - `timeout == 0` never blocks.
//! - A timeout with no readiness returns empty sets, not an error.
//! - An interrupting signal (`EINTR`) is a spurious wake: empty sets.

// Attach sources.
pub mod mio_reactor;
pub mod poll_reactor;

// Re-export.
pub use mio_reactor::*;
pub use poll_reactor::*;

use crate::common::sizes::InlineVec;
use std::{io, os::unix::io::RawFd, time::Duration};

/// Readiness result of one reactor poll: which of the requested descriptors
/// are ready in each direction. A descriptor can appear in both lists.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadyFds {
    pub read: InlineVec<RawFd>,
    pub write: InlineVec<RawFd>,
}

impl ReadyFds {
    #[must_use]
    pub fn is_empty(&self) -> bool { self.read.is_empty() && self.write.is_empty() }
}

/// The descriptor-readiness multiplexer the loop polls once per tick.
pub trait Reactor: std::fmt::Debug {
    /// Wait up to `timeout` for any of `read_fds` to become readable or
    /// `write_fds` writable. `Duration::ZERO` polls without blocking.
    /// Hang-ups and error conditions count as readiness so callers observe
    /// EOF/failure through their normal I/O path.
    fn poll(
        &mut self,
        read_fds: &[RawFd],
        write_fds: &[RawFd],
        timeout: Duration,
    ) -> io::Result<ReadyFds>;
}
