// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Error taxonomy for the runtime.
//!
//! Every failure that can cross a promise boundary is a [`LoopError`]. The
//! type is `Clone` on purpose: a settled promise hands its stored reason to
//! every observer (continuations, awaiting tasks, combinators), so the reason
//! must be cheaply duplicable. Payloads are therefore `String` messages, which
//! also matches the driver callback contracts (error-message-or-null) at the
//! manager boundaries.

use std::io;

/// The single error type that flows through promises, manager callbacks, and
/// the error sink.
#[derive(Debug, Clone, PartialEq, thiserror::Error, miette::Diagnostic)]
pub enum LoopError {
    /// The operation was cancelled by user code before it completed.
    #[error("operation cancelled")]
    #[diagnostic(code(spindle::cancelled))]
    Cancelled,

    /// A deadline elapsed before the guarded work settled.
    #[error("deadline exceeded")]
    #[diagnostic(code(spindle::timeout))]
    Timeout,

    /// A loop-scoped operation was invoked on a thread with no running loop.
    #[error("no event loop is running on this thread")]
    #[diagnostic(
        code(spindle::not_in_task),
        help("Wrap the call in `EventLoop::run()` or pass a `LoopHandle` explicitly.")
    )]
    NotInTask,

    /// Filesystem or socket failure.
    #[error("I/O failure: {message}")]
    #[diagnostic(code(spindle::io))]
    Io {
        message: String,
    },

    /// HTTP-layer failure: connection, DNS resolution, TLS, or protocol.
    #[error("network failure: {message}")]
    #[diagnostic(code(spindle::network))]
    Network {
        message: String,
    },

    /// Database-driver-reported failure.
    #[error("database failure: {message}")]
    #[diagnostic(code(spindle::database))]
    Database {
        message: String,
    },

    /// An operation was issued against a pool after [`close()`] was called.
    ///
    /// [`close()`]: crate::pool::ConnectionPool::close
    #[error("connection pool is closed")]
    #[diagnostic(code(spindle::pool_closed))]
    PoolClosed,

    /// The loop was forced to stop while this operation was outstanding.
    #[error("event loop was shut down")]
    #[diagnostic(code(spindle::shutdown))]
    Shutdown,

    /// A constructor rejected its input.
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(spindle::invalid_configuration),
        help("Check the option record against the documented field set and ranges.")
    )]
    InvalidConfiguration {
        message: String,
    },

    /// Every branch of an [`any`] combinator rejected; carries the individual
    /// reasons in input order.
    ///
    /// [`any`]: crate::ops::any
    #[error("all {} promises rejected", reasons.len())]
    #[diagnostic(code(spindle::aggregate))]
    Aggregate {
        reasons: Vec<LoopError>,
    },
}

impl LoopError {
    pub fn io(message: impl Into<String>) -> Self {
        LoopError::Io {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        LoopError::Network {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        LoopError::Database {
            message: message.into(),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        LoopError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

/// I/O errors lose their kind at the promise boundary and keep the rendered
/// message, matching the callback contract.
impl From<io::Error> for LoopError {
    fn from(err: io::Error) -> Self { LoopError::io(err.to_string()) }
}
