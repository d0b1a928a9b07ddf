// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Round-trip laws of the promise surface, observed through real awaits.

use pretty_assertions::assert_eq;
use spindle::{all, all_settled, any, delay, race, ErrorSink, EventLoop, LoopError,
              Promise, Settled};
use std::{cell::RefCell, rc::Rc, time::Duration};

#[test]
fn test_await_of_resolved_returns_value() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let value = event_loop
        .run(async move { handle.resolved(41).await })
        .unwrap();
    assert_eq!(value, 41);
}

#[test]
fn test_await_of_rejected_reraises_reason() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let result: Result<i32, LoopError> = event_loop
        .run(async move { handle.rejected::<i32>(LoopError::Timeout).await });
    assert_eq!(result, Err(LoopError::Timeout));
}

#[test]
fn test_all_returns_values_in_input_order() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let values = event_loop
        .run(async move {
            let inputs = vec![handle.resolved("a"), handle.resolved("b")];
            all(&handle, inputs).await
        })
        .unwrap();
    assert_eq!(values, vec!["a", "b"]);
}

#[test]
fn test_all_settled_pairs_statuses_with_payloads() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let records = event_loop
        .run(async move {
            let inputs = vec![
                handle.resolved(1),
                handle.rejected(LoopError::io("x")),
                handle.resolved(3),
            ];
            all_settled(&handle, inputs).await
        })
        .unwrap();

    assert_eq!(records.len(), 3);
    assert!(records[0].is_fulfilled());
    assert!(records[1].is_rejected());
    assert!(records[2].is_fulfilled());
    assert_eq!(records[0], Settled::Fulfilled(1));
    assert_eq!(records[1].reason(), Some(&LoopError::io("x")));
    assert_eq!(records[2], Settled::Fulfilled(3));
}

#[test]
fn test_race_picks_the_shorter_delay() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let winner = event_loop
        .run(async move {
            let slow = delay(&handle, Duration::from_millis(200)).then(|()| "a");
            let fast = delay(&handle, Duration::from_millis(100)).then(|()| "b");
            race(&handle, vec![slow, fast]).await
        })
        .unwrap();
    assert_eq!(winner, "b");
}

#[test]
fn test_any_with_all_rejections_aggregates() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let result: Result<i32, LoopError> = event_loop.run(async move {
        let inputs = vec![
            handle.rejected(LoopError::Timeout),
            handle.rejected(LoopError::Cancelled),
        ];
        any(&handle, inputs).await
    });
    assert_eq!(
        result,
        Err(LoopError::Aggregate {
            reasons: vec![LoopError::Timeout, LoopError::Cancelled],
        })
    );
}

#[test]
fn test_continuations_run_before_timers_in_same_tick() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(vec![]));

    // A zero-delay timer and a continuation of an already-settled promise
    // land in the same tick; micro-tasks must win.
    let order_timer = order.clone();
    handle.add_timer(Duration::ZERO, move || {
        order_timer.borrow_mut().push("timer");
        Ok(())
    });
    let order_micro = order.clone();
    Promise::resolved(&handle, ()).on_settled(move |_| {
        order_micro.borrow_mut().push("microtask");
    });

    event_loop
        .run(async move { Ok::<_, LoopError>(()) })
        .unwrap();
    assert_eq!(*order.borrow(), vec!["microtask", "timer"]);
}

#[test]
fn test_unhandled_rejection_reaches_error_sink_once() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let reports: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(vec![]));

    let reports_in_sink = reports.clone();
    event_loop.set_error_sink(ErrorSink::new(move |description, _| {
        reports_in_sink.borrow_mut().push(description.to_string());
    }));

    let ignored: Promise<i32> = handle.rejected(LoopError::Timeout);
    let observed = handle.rejected::<i32>(LoopError::Timeout);
    observed.on_settled(|_| {});
    drop(ignored);

    // Keep the loop alive past the one-tick grace window.
    let pause = delay(&handle, Duration::from_millis(20));
    event_loop.run(async move { pause.await }).unwrap();

    let reports = reports.borrow();
    assert_eq!(
        reports
            .iter()
            .filter(|entry| entry.contains("unhandled"))
            .count(),
        1
    );
}

#[test]
fn test_late_handler_attachment_suppresses_the_report() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let reports: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(vec![]));

    let reports_in_sink = reports.clone();
    event_loop.set_error_sink(ErrorSink::new(move |description, _| {
        reports_in_sink.borrow_mut().push(description.to_string());
    }));

    let rejected: Promise<i32> = handle.rejected(LoopError::Timeout);
    // Attach within the same tick window, via next_tick.
    let late = rejected.clone();
    handle.next_tick(move || {
        late.on_settled(|_| {});
        Ok(())
    });

    let pause = delay(&handle, Duration::from_millis(20));
    event_loop.run(async move { pause.await }).unwrap();

    assert!(reports.borrow().is_empty());
}
