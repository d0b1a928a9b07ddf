// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The error sink: a single pluggable handler that receives failures with no
//! promise to carry them - callback errors from periodic timers and file
//! watchers, and unhandled promise rejections. Errors inside manager
//! callbacks never escape the tick loop; they end up here instead.

use crate::error::LoopError;
use std::rc::Rc;

type SinkFn = dyn Fn(&str, Option<&LoopError>);

/// Cheaply clonable handle to the installed handler. The default handler
/// writes to stderr; [`ErrorSink::tracing`] routes through the `tracing`
/// subscriber instead.
#[derive(Clone)]
pub struct ErrorSink {
    handler: Rc<SinkFn>,
}

impl std::fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSink").finish_non_exhaustive()
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        ErrorSink::new(|description, cause| match cause {
            Some(cause) => eprintln!("spindle: {description}: {cause}"),
            None => eprintln!("spindle: {description}"),
        })
    }
}

impl ErrorSink {
    pub fn new(handler: impl Fn(&str, Option<&LoopError>) + 'static) -> Self {
        ErrorSink {
            handler: Rc::new(handler),
        }
    }

    /// A sink that reports through [`tracing::error!`] rather than stderr.
    #[must_use]
    pub fn tracing() -> Self {
        ErrorSink::new(|description, cause| match cause {
            Some(cause) => tracing::error!(%cause, "{description}"),
            None => tracing::error!("{description}"),
        })
    }

    pub fn report(&self, description: &str, cause: Option<&LoopError>) {
        (self.handler)(description, cause);
    }
}
