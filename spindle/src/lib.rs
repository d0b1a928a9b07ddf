// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words rustix miette rusqlite

//! # spindle
//!
//! A single-threaded cooperative async runtime: a promise abstraction over
//! a reactor event loop that multiplexes timers, sockets, file I/O, HTTP
//! transfers, and database queries. User code is written as sequential
//! `async` routines that suspend on `.await` and resume when their awaited
//! promise settles. There is exactly one thread and no preemption: a
//! CPU-bound section blocks every manager, and that is the contract.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        EventLoop (tick)                      │
//! │                                                              │
//! │  next-tick ─ tasks ─ http ─ files ─ db ─ timers ─ reactor ─  │
//! │      │         │      │       │      │      │        │       │
//! │  TickQueue TaskMgr  Multi  FileQ  DbQueue TimerMgr StreamMgr │
//! │                     engine                  │        │       │
//! │                                        DeadlineHeap  poll(2) │
//! │                                                      / epoll │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A user routine calls a primitive ([`delay`], [`all`], an I/O method on
//! [`LoopHandle`]); the primitive creates a pending [`Promise`] and
//! registers a completion source with the owning manager; the manager
//! schedules the I/O and settles the promise from its callback; settling
//! wakes the suspended task, which the loop resumes on the next tick.
//!
//! ## Example
//!
//! ```no_run
//! use spindle::{all, delay, EventLoop, LoopError};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), LoopError> {
//!     let event_loop = EventLoop::new_default()?;
//!     let handle = event_loop.handle();
//!     let outcome = event_loop.run(async move {
//!         // Two concurrent pauses: ~80 ms wall clock, not 130 ms.
//!         let pauses = vec![
//!             delay(&handle, Duration::from_millis(50)),
//!             delay(&handle, Duration::from_millis(80)),
//!         ];
//!         all(&handle, pauses).await?;
//!         Ok::<_, LoopError>("done")
//!     })?;
//!     assert_eq!(outcome, "done");
//!     Ok(())
//! }
//! ```
//!
//! ## Ownership and concurrency model
//!
//! The loop exclusively owns every manager; callbacks run synchronously
//! inside the tick, so no locking exists anywhere. Managers are driven
//! with a take/dispatch/restore discipline so callbacks can re-enter the
//! loop API freely. Cross-task mutual exclusion is the cooperative
//! [`AsyncMutex`]; everything else is ordinary single-threaded Rust.
//!
//! [`delay`]: crate::ops::delay
//! [`all`]: crate::ops::all
//! [`LoopHandle`]: crate::event_loop::LoopHandle
//! [`Promise`]: crate::promise::Promise
//! [`AsyncMutex`]: crate::ops::AsyncMutex

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

// Attach sources.
pub mod common;
pub mod config;
pub mod db;
pub mod error;
pub mod error_sink;
pub mod event_loop;
pub mod fs;
pub mod http;
pub mod io;
pub mod log;
pub mod ops;
pub mod pool;
pub mod promise;
pub mod reactor;
pub mod task;
pub mod tick;
pub mod time;

// Re-export.
pub use common::*;
pub use config::*;
pub use db::*;
pub use error::*;
pub use error_sink::*;
pub use event_loop::*;
pub use fs::*;
pub use http::*;
pub use io::*;
pub use log::*;
pub use ops::*;
pub use pool::*;
pub use promise::*;
pub use reactor::*;
pub use task::*;
pub use tick::*;
pub use time::*;
