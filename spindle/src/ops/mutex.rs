// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Inter-task mutual exclusion with FIFO hand-off.
//!
//! Release transfers the lock directly to the head waiter: the `locked`
//! flag never drops to false while someone is queued, so there is no
//! unlocked window for a late acquirer to steal (no thundering herd).
//! Non-reentrant: a task that acquires twice without releasing deadlocks
//! itself.

use crate::{event_loop::LoopHandle, promise::Promise};
use std::{cell::{Cell, RefCell},
          collections::VecDeque,
          rc::{Rc, Weak}};

struct MutexInner {
    locked: bool,
    waiters: VecDeque<Promise<MutexHandle>>,
}

/// Proof of holding the mutex; resolves out of [`AsyncMutex::acquire`].
/// Each hand-off mints a fresh handle, and release through a stale handle
/// is a no-op, so double-release cannot corrupt the queue.
pub struct MutexHandle {
    mutex: Weak<RefCell<MutexInner>>,
    released: Rc<Cell<bool>>,
}

impl Clone for MutexHandle {
    fn clone(&self) -> Self {
        MutexHandle {
            mutex: self.mutex.clone(),
            released: self.released.clone(),
        }
    }
}

impl std::fmt::Debug for MutexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexHandle")
            .field("released", &self.released.get())
            .finish()
    }
}

impl MutexHandle {
    fn new(mutex: Weak<RefCell<MutexInner>>) -> Self {
        MutexHandle {
            mutex,
            released: Rc::new(Cell::new(false)),
        }
    }

    /// Hand the lock to the head waiter, or unlock when nobody waits.
    /// Idempotent per handle.
    pub fn release(&self) {
        if self.released.replace(true) {
            return;
        }
        let Some(inner) = self.mutex.upgrade() else {
            return;
        };
        let next_waiter = {
            let mut mutex = inner.borrow_mut();
            match mutex.waiters.pop_front() {
                Some(waiter) => Some(waiter),
                None => {
                    mutex.locked = false;
                    None
                }
            }
        };
        if let Some(waiter) = next_waiter {
            // `locked` stayed true across the hand-off.
            waiter.fulfill(MutexHandle::new(Rc::downgrade(&inner)));
        }
    }
}

#[derive(Clone)]
pub struct AsyncMutex {
    inner: Rc<RefCell<MutexInner>>,
    handle: LoopHandle,
}

impl std::fmt::Debug for AsyncMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("AsyncMutex")
            .field("locked", &inner.locked)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

impl AsyncMutex {
    #[must_use]
    pub fn new(handle: &LoopHandle) -> Self {
        AsyncMutex {
            inner: Rc::new(RefCell::new(MutexInner {
                locked: false,
                waiters: VecDeque::new(),
            })),
            handle: handle.clone(),
        }
    }

    /// Resolve with the mutex handle once the lock is held. Waiters are
    /// served strictly FIFO.
    pub fn acquire(&self) -> Promise<MutexHandle> {
        let mut inner = self.inner.borrow_mut();
        if !inner.locked {
            inner.locked = true;
            drop(inner);
            return Promise::resolved(
                &self.handle,
                MutexHandle::new(Rc::downgrade(&self.inner)),
            );
        }
        let waiter: Promise<MutexHandle> = Promise::pending(&self.handle);
        inner.waiters.push_back(waiter.clone());
        waiter
    }

    #[must_use]
    pub fn is_locked(&self) -> bool { self.inner.borrow().locked }

    #[must_use]
    pub fn waiter_count(&self) -> usize { self.inner.borrow().waiters.len() }
}
