// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Serialized operation queue over one blocking driver connection.
//!
//! `run_slice` executes a bounded number of operations per tick (default 1)
//! so a burst of queries cannot starve the other managers. Driver failures
//! are delivered through the completion callback as
//! [`LoopError::Database`]; they never unwind into the tick loop.

use crate::{db::operation::{BlockingDriver, DbCallback, DbOpId, DbPayload, DbResult},
            error::LoopError};
use std::{cell::Cell, collections::VecDeque, rc::Rc};

/// Recommended operations-per-tick bound.
pub const DEFAULT_DB_OPS_PER_TICK: usize = 1;

struct QueuedDbOp {
    id: u64,
    payload: DbPayload,
    cancelled: Rc<Cell<bool>>,
    cb: DbCallback,
}

pub struct DbQueue {
    driver: Box<dyn BlockingDriver>,
    queue: VecDeque<QueuedDbOp>,
    ops_per_tick: usize,
    next_id: u64,
}

impl std::fmt::Debug for DbQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbQueue")
            .field("pending", &self.queue.len())
            .field("ops_per_tick", &self.ops_per_tick)
            .finish()
    }
}

impl DbQueue {
    pub fn new(driver: Box<dyn BlockingDriver>, ops_per_tick: usize) -> Self {
        DbQueue {
            driver,
            queue: VecDeque::new(),
            ops_per_tick: ops_per_tick.max(1),
            next_id: 0,
        }
    }

    pub fn enqueue(
        &mut self,
        payload: DbPayload,
        cancelled: Rc<Cell<bool>>,
        cb: DbCallback,
    ) -> DbOpId {
        self.next_id += 1;
        let id = self.next_id;
        tracing::debug!(op = id, kind = payload.tag(), "enqueued db operation");
        self.queue.push_back(QueuedDbOp {
            id,
            payload,
            cancelled,
            cb,
        });
        DbOpId::new(id)
    }

    /// Execute up to `ops_per_tick` operations. Cancelled operations are
    /// dropped without touching the driver and do not consume budget.
    /// Completions are returned so the loop runs them with the queue borrow
    /// released.
    pub fn run_slice(&mut self) -> (bool, Vec<(DbCallback, Result<DbResult, LoopError>)>) {
        let mut progressed = false;
        let mut completions = vec![];
        let mut executed = 0;
        while executed < self.ops_per_tick {
            let Some(op) = self.queue.pop_front() else {
                break;
            };
            if op.cancelled.get() {
                tracing::trace!(op = op.id, "dropped cancelled db operation");
                continue;
            }
            executed += 1;
            progressed = true;
            let result = self.driver.execute(&op.payload);
            if let Err(error) = &result {
                tracing::debug!(op = op.id, %error, "db operation failed");
            }
            completions.push((op.cb, result));
        }
        (progressed, completions)
    }

    #[must_use]
    pub fn len(&self) -> usize { self.queue.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    /// Forced shutdown: drop the queue and hand back the callbacks for
    /// rejection.
    pub fn drain_for_shutdown(&mut self) -> Vec<DbCallback> {
        self.queue.drain(..).map(|op| op.cb).collect()
    }
}
