// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Single-assignment promise with chaining and cancellation.
//!
//! A [`Promise<T>`] is a cheap `Rc` handle to shared single-threaded state.
//! Values are `T: Clone` because a settled promise hands its result to every
//! observer - continuations, awaiting tasks, combinators - each of which
//! receives its own clone (the same model as a shared future).
//!
//! Ordering rules:
//! - Continuations fire in registration order.
//! - A continuation registered after settlement is scheduled onto the
//!   micro-task queue, never run synchronously inside the registration call.
//! - A rejection that reaches the end of a tick with no observer attached is
//!   reported to the error sink after a one-tick grace window.
//!
//! Cancellation: a promise created with a cancel handler (timers, HTTP
//! transfers, file operations) rejects with [`LoopError::Cancelled`] and runs
//! its handler exactly once, synchronously dropping the manager-side
//! registration. Chains built with [`then`](Promise::then) carry a weak
//! parent link; cancelling a downstream walks up and cancels the upstream
//! when the downstream was its sole dependent, stopping at the first
//! non-cancellable or already-settled node.

use crate::{error::LoopError,
            event_loop::{LoopCore, LoopHandle},
            promise::state::PromiseStateKind};
use std::{cell::{Cell, RefCell},
          future::Future,
          mem,
          pin::Pin,
          rc::{Rc, Weak},
          task::{Context, Poll, Waker}};

/// The result every observer of a settled promise receives.
pub type SettledResult<T> = Result<T, LoopError>;

/// Alias used where the API surface hands out a promise that carries a
/// cancel handler ([`delay`], [`timeout`], HTTP/file/database operations).
///
/// [`delay`]: crate::ops::delay
/// [`timeout`]: crate::ops::timeout
pub type CancellablePromise<T> = Promise<T>;

enum PromiseState<T> {
    Pending,
    Fulfilled(T),
    Rejected(LoopError),
}

type ContinuationFn<T> = Box<dyn FnOnce(SettledResult<T>)>;

struct PromiseInner<T: Clone + 'static> {
    state: PromiseState<T>,
    continuations: Vec<ContinuationFn<T>>,
    wakers: Vec<Waker>,
    core: Weak<LoopCore>,
    /// Shared with the loop's unhandled-rejection registry; flipped to true
    /// the moment any observer attaches.
    handled: Rc<Cell<bool>>,
    cancelled: bool,
    cancel_handler: Option<Box<dyn FnOnce()>>,
    /// Releases this promise's claim on its upstream when cancelled.
    parent_release: Option<Box<dyn FnOnce()>>,
    /// How many downstream promises derive from this one. Cancellation only
    /// walks up when the last dependent releases.
    dependents: u32,
}

pub struct Promise<T: Clone + 'static> {
    inner: Rc<RefCell<PromiseInner<T>>>,
}

impl<T: Clone + 'static> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Hands `resolve`/`reject` to executor-style construction, see
/// [`Promise::new`].
pub struct PromiseResolver<T: Clone + 'static> {
    promise: Promise<T>,
}

impl<T: Clone + 'static> Clone for PromiseResolver<T> {
    fn clone(&self) -> Self {
        PromiseResolver {
            promise: self.promise.clone(),
        }
    }
}

impl<T: Clone + 'static> std::fmt::Debug for PromiseResolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseResolver")
            .field("state", &self.promise.state())
            .finish()
    }
}

impl<T: Clone + 'static> PromiseResolver<T> {
    pub fn resolve(&self, value: T) { self.promise.fulfill(value); }

    pub fn reject(&self, reason: LoopError) { self.promise.reject(reason); }
}

impl<T: Clone + 'static> Promise<T> {
    pub(crate) fn from_core(core: Weak<LoopCore>) -> Self {
        Promise {
            inner: Rc::new(RefCell::new(PromiseInner {
                state: PromiseState::Pending,
                continuations: vec![],
                wakers: vec![],
                core,
                handled: Rc::new(Cell::new(false)),
                cancelled: false,
                cancel_handler: None,
                parent_release: None,
                dependents: 0,
            })),
        }
    }

    /// A promise with no value yet. Settle it later with
    /// [`fulfill`](Self::fulfill) / [`reject`](Self::reject).
    pub fn pending(handle: &LoopHandle) -> Self {
        Promise::from_core(handle.downgrade_core())
    }

    /// Executor-style construction: the closure receives a resolver it can
    /// stash in callbacks.
    pub fn new(handle: &LoopHandle, executor: impl FnOnce(PromiseResolver<T>)) -> Self {
        let promise = Promise::pending(handle);
        executor(PromiseResolver {
            promise: promise.clone(),
        });
        promise
    }

    /// An already-fulfilled promise. Continuations still run through the
    /// micro-task queue, never synchronously.
    pub fn resolved(handle: &LoopHandle, value: T) -> Self {
        let promise = Promise::pending(handle);
        promise.fulfill(value);
        promise
    }

    /// An already-rejected promise. Subject to unhandled-rejection
    /// reporting if nothing observes it within a tick.
    pub fn rejected(handle: &LoopHandle, reason: LoopError) -> Self {
        let promise = Promise::pending(handle);
        promise.reject(reason);
        promise
    }

    pub fn fulfill(&self, value: T) { self.settle(Ok(value)); }

    pub fn reject(&self, reason: LoopError) { self.settle(Err(reason)); }

    /// Transition out of `Pending` exactly once; later calls are no-ops.
    pub fn settle(&self, result: SettledResult<T>) {
        let continuations;
        let wakers;
        let core;
        {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, PromiseState::Pending) {
                return;
            }
            inner.state = match &result {
                Ok(value) => PromiseState::Fulfilled(value.clone()),
                Err(reason) => PromiseState::Rejected(reason.clone()),
            };
            continuations = mem::take(&mut inner.continuations);
            wakers = mem::take(&mut inner.wakers);
            core = inner.core.clone();

            if let Err(reason) = &result
                && continuations.is_empty()
                && wakers.is_empty()
                && !inner.handled.get()
                && let Some(core) = core.upgrade()
            {
                core.note_unhandled_rejection(reason.clone(), inner.handled.clone());
            }
        }

        for waker in wakers {
            waker.wake();
        }
        for continuation in continuations {
            let result = result.clone();
            Self::schedule(&core, Box::new(move || continuation(result)));
        }
    }

    /// Run `continuation` when this promise settles. Registration order is
    /// preserved; late registration schedules onto the micro-task queue.
    pub fn on_settled(&self, continuation: impl FnOnce(SettledResult<T>) + 'static) {
        let late_job: Option<(Weak<LoopCore>, Box<dyn FnOnce()>)> = {
            let mut inner = self.inner.borrow_mut();
            inner.handled.set(true);
            match &inner.state {
                PromiseState::Pending => {
                    inner.continuations.push(Box::new(continuation));
                    None
                }
                PromiseState::Fulfilled(value) => {
                    let result = Ok(value.clone());
                    Some((inner.core.clone(), Box::new(move || continuation(result))))
                }
                PromiseState::Rejected(reason) => {
                    let result = Err(reason.clone());
                    Some((inner.core.clone(), Box::new(move || continuation(result))))
                }
            }
        };
        if let Some((core, job)) = late_job {
            Self::schedule(&core, job);
        }
    }

    fn schedule(core: &Weak<LoopCore>, job: Box<dyn FnOnce()>) {
        match core.upgrade() {
            Some(core) => core.schedule_microtask(job),
            // The loop is gone; ordering no longer matters.
            None => job(),
        }
    }

    /// Derive a downstream promise from this one's fulfillment value.
    /// Rejection passes through unchanged.
    pub fn then<U: Clone + 'static>(
        &self,
        on_fulfilled: impl FnOnce(T) -> U + 'static,
    ) -> Promise<U> {
        let downstream: Promise<U> = Promise::from_core(self.core_weak());
        self.link_downstream(&downstream);
        let settle_target = downstream.clone();
        self.on_settled(move |result| match result {
            Ok(value) => settle_target.fulfill(on_fulfilled(value)),
            Err(reason) => settle_target.reject(reason),
        });
        downstream
    }

    /// Derive a downstream promise that adopts the state of the promise the
    /// handler returns (one level of flattening per step).
    pub fn and_then<U: Clone + 'static>(
        &self,
        on_fulfilled: impl FnOnce(T) -> Promise<U> + 'static,
    ) -> Promise<U> {
        let downstream: Promise<U> = Promise::from_core(self.core_weak());
        self.link_downstream(&downstream);
        let settle_target = downstream.clone();
        self.on_settled(move |result| match result {
            Ok(value) => {
                let adopted = on_fulfilled(value);
                let settle_target = settle_target.clone();
                adopted.on_settled(move |result| settle_target.settle(result));
            }
            Err(reason) => settle_target.reject(reason),
        });
        downstream
    }

    /// Recover from (or rethrow) a rejection. Fulfillment passes through.
    pub fn catch(
        &self,
        on_rejected: impl FnOnce(LoopError) -> SettledResult<T> + 'static,
    ) -> Promise<T> {
        let downstream: Promise<T> = Promise::from_core(self.core_weak());
        self.link_downstream(&downstream);
        let settle_target = downstream.clone();
        self.on_settled(move |result| match result {
            Ok(value) => settle_target.fulfill(value),
            Err(reason) => settle_target.settle(on_rejected(reason)),
        });
        downstream
    }

    /// Record `downstream` as depending on `self`, so cancelling the
    /// downstream can release (and possibly cancel) this promise.
    fn link_downstream<U: Clone + 'static>(&self, downstream: &Promise<U>) {
        self.inner.borrow_mut().dependents += 1;
        let upstream = Rc::downgrade(&self.inner);
        downstream.inner.borrow_mut().parent_release = Some(Box::new(move || {
            if let Some(upstream) = upstream.upgrade() {
                Promise { inner: upstream }.release_dependent();
            }
        }));
    }

    /// A dependent was cancelled. When it was the last one and this promise
    /// is itself cancellable and still pending, cancellation continues
    /// upward.
    fn release_dependent(&self) {
        let should_cancel = {
            let mut inner = self.inner.borrow_mut();
            inner.dependents = inner.dependents.saturating_sub(1);
            inner.dependents == 0
                && matches!(inner.state, PromiseState::Pending)
                && (inner.cancel_handler.is_some() || inner.parent_release.is_some())
        };
        if should_cancel {
            self.cancel();
        }
    }

    /// Install the cleanup that runs when this promise is cancelled.
    /// Managers use this to drop their side of the registration (remove the
    /// timer, the watcher, the multi-handle entry) synchronously.
    pub fn set_cancel_handler(&self, handler: impl FnOnce() + 'static) {
        self.inner.borrow_mut().cancel_handler = Some(Box::new(handler));
    }

    /// Whether cancelling this promise can release resources: it carries a
    /// cancel handler or derives from a chain that does.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        let inner = self.inner.borrow();
        inner.cancel_handler.is_some() || inner.parent_release.is_some()
    }

    /// Reject a pending promise with [`LoopError::Cancelled`], run the
    /// cancel handler (at most once, ever), and walk the parent link.
    /// Cancelling a settled promise is a no-op, as is a repeat cancel.
    pub fn cancel(&self) {
        let (handler, parent_release) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, PromiseState::Pending) || inner.cancelled {
                return;
            }
            inner.cancelled = true;
            (inner.cancel_handler.take(), inner.parent_release.take())
        };
        if let Some(handler) = handler {
            handler();
        }
        self.settle(Err(LoopError::Cancelled));
        if let Some(parent_release) = parent_release {
            parent_release();
        }
    }

    /// Cancel only when a cancel path exists. Combinators use this for
    /// losers and in-flight work they own.
    pub fn cancel_if_cancellable(&self) {
        if self.is_cancellable() {
            self.cancel();
        }
    }

    #[must_use]
    pub fn state(&self) -> PromiseStateKind {
        match self.inner.borrow().state {
            PromiseState::Pending => PromiseStateKind::Pending,
            PromiseState::Fulfilled(_) => PromiseStateKind::Fulfilled,
            PromiseState::Rejected(_) => PromiseStateKind::Rejected,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool { self.state() == PromiseStateKind::Pending }

    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.inner.borrow().cancelled }

    /// Snapshot of the settled result, if any. Peeking does not count as
    /// observing for unhandled-rejection purposes.
    pub fn result(&self) -> Option<SettledResult<T>> {
        match &self.inner.borrow().state {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
            PromiseState::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    pub(crate) fn core_weak(&self) -> Weak<LoopCore> {
        self.inner.borrow().core.clone()
    }

    /// Count this promise as observed without attaching a continuation.
    /// The loop uses this for the root promise, whose settlement is
    /// returned from `run` directly.
    pub(crate) fn mark_handled(&self) {
        self.inner.borrow().handled.set(true);
    }
}

/// Awaiting a promise suspends the task until settlement and yields a clone
/// of the stored value (or re-raises the stored reason).
impl<T: Clone + 'static> Future for Promise<T> {
    type Output = SettledResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        inner.handled.set(true);
        match &inner.state {
            PromiseState::Pending => {
                if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            PromiseState::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            PromiseState::Rejected(reason) => Poll::Ready(Err(reason.clone())),
        }
    }
}
