// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Async-native driver integration: queries over a socket-level protocol.
//!
//! Instead of blocking inside the driver, the engine submits the query,
//! registers a read watcher on the connection socket, and on each readiness
//! notification consumes whatever input is available. The driver stays
//! `busy` across partial reads; only when it reports the result complete is
//! the completion promise settled. Watchers are one-shot, so the pump
//! re-arms itself after every partial read.

use crate::{db::operation::{DbPayload, DbResult},
            error::LoopError,
            event_loop::LoopHandle,
            promise::Promise};
use std::{cell::{Cell, RefCell},
          os::unix::io::RawFd,
          rc::Rc};

/// A driver speaking a socket-level query protocol (the PostgreSQL model:
/// send the query, then repeatedly consume input until the result is
/// ready).
pub trait PollDriver {
    /// Send the query on the wire without waiting for the reply.
    fn submit(&mut self, payload: &DbPayload) -> Result<(), LoopError>;

    /// The connection socket to watch for readability.
    fn socket(&self) -> RawFd;

    /// Consume whatever bytes are available. May be called many times per
    /// query; partial input must be tolerated.
    fn consume_input(&mut self) -> Result<(), LoopError>;

    /// Whether the in-flight query still needs more input.
    fn is_busy(&self) -> bool;

    /// Take the completed result. Only called once `is_busy` is false.
    fn take_result(&mut self) -> Result<DbResult, LoopError>;
}

/// One async-native connection bound to a loop. Queries are serialized:
/// one in flight at a time per connection.
pub struct PolledDbConnection<D: PollDriver + 'static> {
    driver: Rc<RefCell<D>>,
    handle: LoopHandle,
}

impl<D: PollDriver + 'static> std::fmt::Debug for PolledDbConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolledDbConnection").finish_non_exhaustive()
    }
}

impl<D: PollDriver + 'static> PolledDbConnection<D> {
    pub fn new(handle: &LoopHandle, driver: D) -> Self {
        PolledDbConnection {
            driver: Rc::new(RefCell::new(driver)),
            handle: handle.clone(),
        }
    }

    /// Submit a query and resolve when the driver reports the result
    /// complete. Cancellation drops the socket watcher; the wire state of
    /// the connection is then undefined, matching the driver's own
    /// semantics for abandoned queries.
    pub fn execute(&self, payload: DbPayload) -> Promise<DbResult> {
        let promise: Promise<DbResult> = Promise::pending(&self.handle);

        if let Err(error) = self.driver.borrow_mut().submit(&payload) {
            promise.reject(error);
            return promise;
        }

        // The active watcher id, shared with the cancel handler so it can
        // drop the registration no matter which re-arm installed it.
        let watcher_slot: Rc<Cell<Option<crate::io::WatcherId>>> =
            Rc::new(Cell::new(None));

        arm_read_pump(
            self.driver.clone(),
            self.handle.clone(),
            promise.clone(),
            watcher_slot.clone(),
        );

        let cancel_handle = self.handle.clone();
        let cancel_slot = watcher_slot;
        promise.set_cancel_handler(move || {
            if let Some(id) = cancel_slot.take() {
                cancel_handle.remove_stream_watcher(id);
            }
        });
        promise
    }
}

fn arm_read_pump<D: PollDriver + 'static>(
    driver: Rc<RefCell<D>>,
    handle: LoopHandle,
    promise: Promise<DbResult>,
    watcher_slot: Rc<Cell<Option<crate::io::WatcherId>>>,
) {
    let fd = driver.borrow().socket();
    let pump_driver = driver.clone();
    let pump_handle = handle.clone();
    let pump_promise = promise.clone();
    let pump_slot = watcher_slot.clone();
    let abort_promise = promise.clone();

    let id = handle.add_read_watcher_with_abort(
        fd,
        move |_fd| {
            pump_slot.set(None);
            let outcome = {
                let mut driver = pump_driver.borrow_mut();
                match driver.consume_input() {
                    Err(error) => Some(Err(error)),
                    Ok(()) if driver.is_busy() => None,
                    Ok(()) => Some(driver.take_result()),
                }
            };
            match outcome {
                // Result still incomplete after a partial read: re-arm.
                None => arm_read_pump(
                    pump_driver.clone(),
                    pump_handle.clone(),
                    pump_promise.clone(),
                    pump_slot.clone(),
                ),
                Some(result) => pump_promise.settle(result),
            }
            Ok(())
        },
        Some(Box::new(move || abort_promise.reject(LoopError::Shutdown))),
    );
    watcher_slot.set(Some(id));
}
