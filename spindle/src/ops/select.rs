// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Selection combinators: `race` (first settlement wins) and `any` (first
//! fulfillment wins).

use crate::{error::LoopError,
            event_loop::LoopHandle,
            promise::Promise};
use std::{cell::RefCell, rc::Rc};

/// Settle with the first settlement among the inputs, value or reason.
/// The losers are then cancelled where a cancel path exists, so a raced
/// delay's timer is out of the heap by the end of the winning tick;
/// non-cancellable losers keep running unobserved.
pub fn race<T: Clone + 'static>(
    handle: &LoopHandle,
    promises: Vec<Promise<T>>,
) -> Promise<T> {
    let out: Promise<T> = Promise::pending(handle);
    let field: Rc<Vec<Promise<T>>> = Rc::new(promises.clone());
    for promise in promises {
        let out = out.clone();
        let field = field.clone();
        // Single-assignment settle makes "first one wins" free; cancel on
        // a settled promise is a no-op, so the winner survives the sweep.
        promise.on_settled(move |result| {
            out.settle(result);
            for loser in field.iter() {
                loser.cancel_if_cancellable();
            }
        });
    }
    out
}

/// Resolve with the first fulfillment. Rejects only when every input has
/// rejected, with an aggregate carrying the reasons in input order.
pub fn any<T: Clone + 'static>(
    handle: &LoopHandle,
    promises: Vec<Promise<T>>,
) -> Promise<T> {
    if promises.is_empty() {
        return Promise::rejected(handle, LoopError::Aggregate { reasons: vec![] });
    }
    let out: Promise<T> = Promise::pending(handle);
    let reasons: Rc<RefCell<Vec<Option<LoopError>>>> =
        Rc::new(RefCell::new(vec![None; promises.len()]));
    let remaining = Rc::new(RefCell::new(promises.len()));

    for (index, promise) in promises.into_iter().enumerate() {
        let out = out.clone();
        let reasons = reasons.clone();
        let remaining = remaining.clone();
        promise.on_settled(move |result| match result {
            Ok(value) => out.fulfill(value),
            Err(reason) => {
                reasons.borrow_mut()[index] = Some(reason);
                *remaining.borrow_mut() -= 1;
                if *remaining.borrow() == 0 {
                    out.reject(LoopError::Aggregate {
                        reasons: reasons.borrow_mut().drain(..).flatten().collect(),
                    });
                }
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_loop::EventLoop, ops::delay};
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};

    #[test]
    fn test_race_takes_first_settlement_and_cancels_losers() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();

        let slow = delay(&handle, Duration::from_millis(200)).then(|()| "a");
        let fast = delay(&handle, Duration::from_millis(20)).then(|()| "b");
        let slow_probe = slow.clone();

        let winner = race(&handle, vec![slow, fast]);
        let started = Instant::now();
        let result = event_loop.run(async move { winner.await }).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result, "b");
        assert!(elapsed >= Duration::from_millis(20));
        // The loser chain was cancelled and its timer removed, so the loop
        // went idle right after the winner instead of waiting 200 ms.
        assert!(elapsed < Duration::from_millis(150), "elapsed {elapsed:?}");
        assert_eq!(slow_probe.result(), Some(Err(LoopError::Cancelled)));
        assert_eq!(handle.stats().pending_timers, 0);
    }

    #[test]
    fn test_race_propagates_first_rejection() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();

        let pending: Promise<i32> = Promise::pending(&handle);
        let failing = Promise::rejected(&handle, LoopError::Timeout);

        let winner = race(&handle, vec![pending, failing]);
        let result = event_loop.run(async move { winner.await });
        assert_eq!(result, Err(LoopError::Timeout));
    }

    #[test]
    fn test_any_skips_rejections_until_a_fulfillment() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();

        let inputs = vec![
            Promise::rejected(&handle, LoopError::Timeout),
            Promise::resolved(&handle, 7),
        ];
        let first_ok = any(&handle, inputs);
        let result = event_loop.run(async move { first_ok.await }).unwrap();
        assert_eq!(result, 7);
    }

    #[test]
    fn test_any_aggregates_reasons_in_input_order() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();

        let first: Promise<i32> = Promise::pending(&handle);
        let second: Promise<i32> = Promise::pending(&handle);
        let first_ok = any(&handle, vec![first.clone(), second.clone()]);

        // Reject out of order; the aggregate preserves input order.
        second.reject(LoopError::Timeout);
        first.reject(LoopError::Cancelled);

        let result = event_loop.run(async move { first_ok.await });
        assert_eq!(
            result,
            Err(LoopError::Aggregate {
                reasons: vec![LoopError::Cancelled, LoopError::Timeout],
            })
        );
    }
}
