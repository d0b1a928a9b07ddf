// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Micro-task queue ordering and live-lock protection through a real loop.

use pretty_assertions::assert_eq;
use spindle::{delay, EventLoop, LoopError, RuntimeConfig};
use std::{cell::{Cell, RefCell},
          rc::Rc,
          time::Duration};

#[test]
fn test_next_tick_runs_before_deferred_within_a_tick() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(vec![]));

    let order_deferred = order.clone();
    handle.defer(move || {
        order_deferred.borrow_mut().push("deferred");
        Ok(())
    });
    let order_next = order.clone();
    handle.next_tick(move || {
        order_next.borrow_mut().push("next_tick");
        Ok(())
    });

    event_loop
        .run(async move { Ok::<_, LoopError>(()) })
        .unwrap();
    // Enqueued deferred-first, but the tick runs next_tick first.
    assert_eq!(*order.borrow(), vec!["next_tick", "deferred"]);
}

#[test]
fn test_reentrant_next_tick_drains_within_one_tick_up_to_cap() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let runs = Rc::new(Cell::new(0u32));

    // Each job enqueues the next; well under the cap, so all of them run
    // in the first tick.
    fn chain(handle: &spindle::LoopHandle, runs: &Rc<Cell<u32>>, left: u32) {
        if left == 0 {
            return;
        }
        let handle_inner = handle.clone();
        let runs_inner = runs.clone();
        handle.next_tick(move || {
            runs_inner.set(runs_inner.get() + 1);
            chain(&handle_inner, &runs_inner, left - 1);
            Ok(())
        });
    }
    chain(&handle, &runs, 10);

    let tick_handle = handle.clone();
    event_loop
        .run(async move {
            // By the time the root task runs (same tick, after the drain),
            // the whole chain has already executed.
            assert_eq!(tick_handle.current_tick(), 0);
            Ok::<_, LoopError>(())
        })
        .unwrap();
    assert_eq!(runs.get(), 10);
}

#[test]
fn test_next_tick_flood_spills_past_the_cap() {
    // Tiny cap so the spill is observable.
    let config = RuntimeConfig {
        next_tick_cap: 4,
        ..Default::default()
    };
    let event_loop = EventLoop::new(config).unwrap();
    let handle = event_loop.handle();
    let runs = Rc::new(Cell::new(0u32));

    for _ in 0..10 {
        let runs_inner = runs.clone();
        handle.next_tick(move || {
            runs_inner.set(runs_inner.get() + 1);
            Ok(())
        });
    }

    let tick_handle = handle.clone();
    event_loop
        .run(async move {
            // Something must still keep the loop alive while the spill
            // drains over the following ticks.
            delay(&tick_handle, Duration::from_millis(10)).await?;
            Ok::<_, LoopError>(())
        })
        .unwrap();

    // Everything ran eventually, across at least ceil(10 / 4) = 3 ticks.
    assert_eq!(runs.get(), 10);
    assert!(handle.current_tick() >= 3, "ticks {}", handle.current_tick());
}
