// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Collection combinators that wait for every input: `all` and
//! `all_settled`.

use crate::{event_loop::LoopHandle,
            promise::{Promise, Settled}};
use std::{cell::RefCell, rc::Rc};

struct JoinState<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
    done: bool,
}

/// Resolve with every value, in input order, once all inputs fulfill.
/// Rejects with the first rejection; the other inputs keep running (this
/// combinator does not own them and cancels nothing).
pub fn all<T: Clone + 'static>(
    handle: &LoopHandle,
    promises: Vec<Promise<T>>,
) -> Promise<Vec<T>> {
    if promises.is_empty() {
        return Promise::resolved(handle, vec![]);
    }
    let out: Promise<Vec<T>> = Promise::pending(handle);
    let state = Rc::new(RefCell::new(JoinState {
        slots: vec![None; promises.len()],
        remaining: promises.len(),
        done: false,
    }));

    for (index, promise) in promises.into_iter().enumerate() {
        let state = state.clone();
        let out = out.clone();
        promise.on_settled(move |result| {
            let mut join = state.borrow_mut();
            if join.done {
                return;
            }
            match result {
                Ok(value) => {
                    join.slots[index] = Some(value);
                    join.remaining -= 1;
                    if join.remaining == 0 {
                        join.done = true;
                        let values: Vec<T> = join.slots.drain(..).flatten().collect();
                        drop(join);
                        out.fulfill(values);
                    }
                }
                Err(reason) => {
                    join.done = true;
                    drop(join);
                    out.reject(reason);
                }
            }
        });
    }
    out
}

/// Always resolves: one [`Settled`] record per input, in input order,
/// whether it fulfilled or rejected.
pub fn all_settled<T: Clone + 'static>(
    handle: &LoopHandle,
    promises: Vec<Promise<T>>,
) -> Promise<Vec<Settled<T>>> {
    if promises.is_empty() {
        return Promise::resolved(handle, vec![]);
    }
    let out: Promise<Vec<Settled<T>>> = Promise::pending(handle);
    let state = Rc::new(RefCell::new(JoinState {
        slots: vec![None; promises.len()],
        remaining: promises.len(),
        done: false,
    }));

    for (index, promise) in promises.into_iter().enumerate() {
        let state = state.clone();
        let out = out.clone();
        promise.on_settled(move |result| {
            let mut join = state.borrow_mut();
            join.slots[index] = Some(match result {
                Ok(value) => Settled::Fulfilled(value),
                Err(reason) => Settled::Rejected(reason),
            });
            join.remaining -= 1;
            if join.remaining == 0 {
                let records: Vec<Settled<T>> = join.slots.drain(..).flatten().collect();
                drop(join);
                out.fulfill(records);
            }
        });
    }
    out
}
