// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use crate::{error::LoopError,
            event_loop::LoopHandle,
            promise::{CancellablePromise, Promise}};
use std::time::Duration;

/// Resolve after `duration`. Cancellation removes the timer from the heap
/// immediately, so a cancelled delay costs nothing at its former due-time.
pub fn delay(handle: &LoopHandle, duration: Duration) -> CancellablePromise<()> {
    let promise: Promise<()> = Promise::pending(handle);
    let settle = promise.clone();
    let abort = promise.clone();
    let id = handle.add_timer_with_abort(
        duration,
        move || {
            settle.fulfill(());
            Ok(())
        },
        Box::new(move || abort.reject(LoopError::Shutdown)),
    );
    let core = handle.downgrade_core();
    promise.set_cancel_handler(move || {
        if let Some(core) = core.upgrade() {
            core.timers.borrow_mut().cancel(id);
        }
    });
    promise
}
