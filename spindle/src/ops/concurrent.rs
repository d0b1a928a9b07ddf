// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Bounded-concurrency execution of task factories.
//!
//! Inputs are factories, not promises: a slot must be free before the work
//! is even started. On failure the combinator rejects, stops launching, and
//! cancels the in-flight work it owns - but only the cancellable part;
//! non-cancellable work runs to completion unobserved.

use crate::{event_loop::LoopHandle, promise::Promise};
use std::{cell::RefCell, collections::VecDeque, rc::Rc};

/// Deferred unit of work for [`concurrent`] and [`batch`].
pub type TaskFactory<T> = Box<dyn FnOnce(&LoopHandle) -> Promise<T>>;

struct ConcurrentState<T: Clone + 'static> {
    factories: VecDeque<(usize, TaskFactory<T>)>,
    slots: Vec<Option<T>>,
    in_flight: Vec<Promise<T>>,
    remaining: usize,
    failed: bool,
}

/// Run the factories with at most `limit` in flight, preserving input
/// order in the output.
pub fn concurrent<T: Clone + 'static>(
    handle: &LoopHandle,
    factories: Vec<TaskFactory<T>>,
    limit: usize,
) -> Promise<Vec<T>> {
    let total = factories.len();
    if total == 0 {
        return Promise::resolved(handle, vec![]);
    }
    let limit = limit.max(1);
    let out: Promise<Vec<T>> = Promise::pending(handle);
    let state = Rc::new(RefCell::new(ConcurrentState {
        factories: factories.into_iter().enumerate().collect(),
        slots: vec![None; total],
        in_flight: vec![],
        remaining: total,
        failed: false,
    }));

    for _ in 0..limit.min(total) {
        launch_next(handle, &state, &out);
    }
    out
}

fn launch_next<T: Clone + 'static>(
    handle: &LoopHandle,
    state: &Rc<RefCell<ConcurrentState<T>>>,
    out: &Promise<Vec<T>>,
) {
    let next = {
        let mut concurrent_state = state.borrow_mut();
        if concurrent_state.failed {
            None
        } else {
            concurrent_state.factories.pop_front()
        }
    };
    let Some((index, factory)) = next else { return };

    let promise = factory(handle);
    state.borrow_mut().in_flight.push(promise.clone());

    let state = state.clone();
    let out = out.clone();
    let handle = handle.clone();
    promise.on_settled(move |result| {
        let mut concurrent_state = state.borrow_mut();
        if concurrent_state.failed {
            return;
        }
        match result {
            Ok(value) => {
                concurrent_state.slots[index] = Some(value);
                concurrent_state.remaining -= 1;
                if concurrent_state.remaining == 0 {
                    let values: Vec<T> =
                        concurrent_state.slots.drain(..).flatten().collect();
                    drop(concurrent_state);
                    out.fulfill(values);
                } else {
                    drop(concurrent_state);
                    launch_next(&handle, &state, &out);
                }
            }
            Err(reason) => {
                concurrent_state.failed = true;
                let in_flight = std::mem::take(&mut concurrent_state.in_flight);
                drop(concurrent_state);
                out.reject(reason);
                // Newly started work is off the table; in-flight work is
                // only cancelled where a cancel path exists.
                for promise in in_flight {
                    promise.cancel_if_cancellable();
                }
            }
        }
    });
}

/// Slice the factories into batches of `batch_size`, executed strictly in
/// order; within each batch run `concurrent` with
/// `concurrency.unwrap_or(batch_size)`.
pub fn batch<T: Clone + 'static>(
    handle: &LoopHandle,
    factories: Vec<TaskFactory<T>>,
    batch_size: usize,
    concurrency: Option<usize>,
) -> Promise<Vec<T>> {
    let batch_size = batch_size.max(1);
    let limit = concurrency.unwrap_or(batch_size);

    let mut batches: VecDeque<Vec<TaskFactory<T>>> = VecDeque::new();
    let mut factories = factories;
    while !factories.is_empty() {
        let take = batch_size.min(factories.len());
        batches.push_back(factories.drain(..take).collect());
    }

    let out: Promise<Vec<T>> = Promise::pending(handle);
    run_next_batch(handle, Rc::new(RefCell::new(BatchState {
        batches,
        collected: vec![],
    })), &out, limit);
    out
}

struct BatchState<T: Clone + 'static> {
    batches: VecDeque<Vec<TaskFactory<T>>>,
    collected: Vec<T>,
}

fn run_next_batch<T: Clone + 'static>(
    handle: &LoopHandle,
    state: Rc<RefCell<BatchState<T>>>,
    out: &Promise<Vec<T>>,
    limit: usize,
) {
    let next = state.borrow_mut().batches.pop_front();
    let Some(next) = next else {
        let collected = std::mem::take(&mut state.borrow_mut().collected);
        out.fulfill(collected);
        return;
    };

    let batch_promise = concurrent(handle, next, limit);
    let handle = handle.clone();
    let out = out.clone();
    batch_promise.on_settled(move |result| match result {
        Ok(values) => {
            state.borrow_mut().collected.extend(values);
            run_next_batch(&handle, state.clone(), &out, limit);
        }
        Err(reason) => out.reject(reason),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::LoopError, event_loop::EventLoop, ops::delay};
    use pretty_assertions::assert_eq;
    use std::{cell::Cell, time::Duration};

    /// Tracks the high-water mark of simultaneously running factories.
    struct Gauge {
        current: Rc<Cell<usize>>,
        peak: Rc<Cell<usize>>,
    }

    impl Gauge {
        fn new() -> Self {
            Gauge {
                current: Rc::new(Cell::new(0)),
                peak: Rc::new(Cell::new(0)),
            }
        }

        fn tracked_factory(&self, value: i32) -> TaskFactory<i32> {
            let current = self.current.clone();
            let peak = self.peak.clone();
            Box::new(move |handle| {
                current.set(current.get() + 1);
                peak.set(peak.get().max(current.get()));
                let done = delay(handle, Duration::from_millis(10));
                let current = current.clone();
                done.then(move |()| {
                    current.set(current.get() - 1);
                    value
                })
            })
        }
    }

    #[test]
    fn test_concurrency_limit_is_respected() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();
        let gauge = Gauge::new();

        let factories: Vec<TaskFactory<i32>> =
            (0..6).map(|value| gauge.tracked_factory(value)).collect();
        let combined = concurrent(&handle, factories, 2);
        let result = event_loop.run(async move { combined.await }).unwrap();

        assert_eq!(result, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(gauge.peak.get(), 2);
    }

    #[test]
    fn test_failure_stops_new_launches() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();
        let launched = Rc::new(Cell::new(0));

        let mut factories: Vec<TaskFactory<i32>> = vec![];
        for index in 0..5 {
            let launched = launched.clone();
            factories.push(Box::new(move |handle: &LoopHandle| {
                launched.set(launched.get() + 1);
                if index == 0 {
                    Promise::rejected(handle, LoopError::Timeout)
                } else {
                    delay(handle, Duration::from_millis(20)).then(move |()| index)
                }
            }));
        }

        let combined = concurrent(&handle, factories, 2);
        let result = event_loop.run(async move { combined.await });

        assert_eq!(result, Err(LoopError::Timeout));
        // Limit 2 started two factories; after the failure nothing new ran.
        assert_eq!(launched.get(), 2);
    }

    #[test]
    fn test_batch_runs_slices_in_order() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();
        let gauge = Gauge::new();

        let factories: Vec<TaskFactory<i32>> =
            (0..7).map(|value| gauge.tracked_factory(value)).collect();
        let combined = batch(&handle, factories, 3, None);
        let result = event_loop.run(async move { combined.await }).unwrap();

        assert_eq!(result, vec![0, 1, 2, 3, 4, 5, 6]);
        // Concurrency within a batch defaults to the batch size.
        assert_eq!(gauge.peak.get(), 3);
    }

    #[test]
    fn test_batch_with_explicit_concurrency() {
        let event_loop = EventLoop::new_default().unwrap();
        let handle = event_loop.handle();
        let gauge = Gauge::new();

        let factories: Vec<TaskFactory<i32>> =
            (0..4).map(|value| gauge.tracked_factory(value)).collect();
        let combined = batch(&handle, factories, 4, Some(1));
        let result = event_loop.run(async move { combined.await }).unwrap();

        assert_eq!(result, vec![0, 1, 2, 3]);
        assert_eq!(gauge.peak.get(), 1);
    }
}
