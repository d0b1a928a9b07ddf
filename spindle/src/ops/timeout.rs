// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Deadline guard: a race between the guarded work and a delay, where the
//! loser is cancelled and its resources released.

use crate::{error::LoopError,
            event_loop::LoopHandle,
            ops::{delay, join::all},
            promise::{CancellablePromise, Promise}};
use std::time::Duration;

/// Resolve with the inner result if it settles before `limit`, else reject
/// with [`LoopError::Timeout`] and cancel the inner promise (when it is
/// cancellable). Cancelling the returned promise cancels both sides.
pub fn timeout<T: Clone + 'static>(
    handle: &LoopHandle,
    promise: Promise<T>,
    limit: Duration,
) -> CancellablePromise<T> {
    let out: Promise<T> = Promise::pending(handle);
    let timer = delay(handle, limit);

    {
        // Inner settles first: adopt its result, release the timer.
        let out = out.clone();
        let timer = timer.clone();
        promise.on_settled(move |result| {
            timer.cancel();
            out.settle(result);
        });
    }
    {
        // Deadline fires first: reject and cancel the loser.
        let out = out.clone();
        let inner = promise.clone();
        timer.on_settled(move |result| match result {
            Ok(()) => {
                inner.cancel_if_cancellable();
                out.reject(LoopError::Timeout);
            }
            // Timer cancelled because the inner promise won.
            Err(LoopError::Cancelled) => {}
            Err(reason) => out.reject(reason),
        });
    }
    {
        let inner = promise;
        let timer = timer.clone();
        out.set_cancel_handler(move || {
            timer.cancel();
            inner.cancel_if_cancellable();
        });
    }
    out
}

/// Deadline over a list: [`all`] of the inputs guarded by one timer. On
/// timeout (or cancellation of the guard) every still-pending cancellable
/// input is cancelled.
pub fn timeout_all<T: Clone + 'static>(
    handle: &LoopHandle,
    promises: Vec<Promise<T>>,
    limit: Duration,
) -> CancellablePromise<Vec<T>> {
    let children = promises.clone();
    let combined = all(handle, promises);
    let out: Promise<Vec<T>> = Promise::pending(handle);
    let timer = delay(handle, limit);

    {
        let out = out.clone();
        let timer = timer.clone();
        combined.on_settled(move |result| {
            timer.cancel();
            out.settle(result);
        });
    }
    {
        let out = out.clone();
        let losers = children.clone();
        timer.on_settled(move |result| match result {
            Ok(()) => {
                for child in &losers {
                    child.cancel_if_cancellable();
                }
                out.reject(LoopError::Timeout);
            }
            Err(LoopError::Cancelled) => {}
            Err(reason) => out.reject(reason),
        });
    }
    {
        let timer = timer.clone();
        out.set_cancel_handler(move || {
            timer.cancel();
            for child in &children {
                child.cancel_if_cancellable();
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use pretty_assertions::assert_eq;
    use std::time::Instant;

    #[test]
    fn test_inner_wins_under_deadline() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();

        let quick = delay(&handle, Duration::from_millis(10)).then(|()| 42);
        let guarded = timeout(&handle, quick, Duration::from_millis(500));
        let result = event_loop.run(async move { guarded.await }).unwrap();
        assert_eq!(result, 42);
        // The deadline timer was released, not left to fire.
        assert_eq!(handle.stats().pending_timers, 0);
    }

    #[test]
    fn test_deadline_rejects_and_cancels_loser() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();

        let slow = delay(&handle, Duration::from_secs(60));
        let slow_probe = slow.clone();
        let guarded = timeout(&handle, slow, Duration::from_millis(30));

        let started = Instant::now();
        let result = event_loop.run(async move { guarded.await });
        let elapsed = started.elapsed();

        assert_eq!(result, Err(LoopError::Timeout));
        assert!(elapsed >= Duration::from_millis(30));
        // Without loser cancellation this would have taken 60 s.
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(slow_probe.result(), Some(Err(LoopError::Cancelled)));
        assert_eq!(handle.stats().pending_timers, 0);
    }

    #[test]
    fn test_cancelling_the_guard_cancels_both_sides() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();

        let slow = delay(&handle, Duration::from_secs(60));
        let slow_probe = slow.clone();
        let guarded = timeout(&handle, slow, Duration::from_secs(60));

        guarded.cancel();
        assert_eq!(guarded.result(), Some(Err(LoopError::Cancelled)));
        assert_eq!(slow_probe.result(), Some(Err(LoopError::Cancelled)));
        assert_eq!(handle.stats().pending_timers, 0);
    }

    #[test]
    fn test_timeout_all_cancels_every_pending_child() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();

        let first = delay(&handle, Duration::from_secs(60));
        let second = delay(&handle, Duration::from_secs(60));
        let probes = (first.clone(), second.clone());
        let guarded = timeout_all(&handle, vec![first, second], Duration::from_millis(20));

        let result = event_loop.run(async move { guarded.await });
        assert_eq!(result, Err(LoopError::Timeout));
        assert_eq!(probes.0.result(), Some(Err(LoopError::Cancelled)));
        assert_eq!(probes.1.result(), Some(Err(LoopError::Cancelled)));
        assert_eq!(handle.stats().pending_timers, 0);
    }
}
