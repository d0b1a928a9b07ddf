// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use crate::error::LoopError;
use strum_macros::Display;

/// Observable lifecycle state of a promise. Transitions are monotone and
/// irreversible: `Pending` moves to exactly one of the settled states, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PromiseStateKind {
    Pending,
    Fulfilled,
    Rejected,
}

/// Outcome record used by [`all_settled`]: one entry per input promise, in
/// input order, regardless of how each settled.
///
/// [`all_settled`]: crate::ops::all_settled
#[derive(Debug, Clone, PartialEq)]
pub enum Settled<T> {
    Fulfilled(T),
    Rejected(LoopError),
}

impl<T> Settled<T> {
    #[must_use]
    pub fn is_fulfilled(&self) -> bool { matches!(self, Settled::Fulfilled(_)) }

    #[must_use]
    pub fn is_rejected(&self) -> bool { matches!(self, Settled::Rejected(_)) }

    pub fn value(&self) -> Option<&T> {
        match self {
            Settled::Fulfilled(value) => Some(value),
            Settled::Rejected(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&LoopError> {
        match self {
            Settled::Fulfilled(_) => None,
            Settled::Rejected(reason) => Some(reason),
        }
    }
}
