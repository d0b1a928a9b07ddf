// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Wall-clock scenarios: parallel delays, periodic cadence, race cleanup,
//! and timeout bounds. Serialized because they assert on elapsed time.

use pretty_assertions::assert_eq;
use serial_test::serial;
use spindle::{all, delay, race, timeout, EventLoop, LoopError};
use std::{cell::RefCell,
          rc::Rc,
          time::{Duration, Instant}};

#[test]
#[serial]
fn test_three_parallel_delays_overlap() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();

    let started = Instant::now();
    let results = event_loop
        .run(async move {
            let tasks: Vec<_> = (0..3)
                .map(|_| {
                    let task_handle = handle.clone();
                    handle.spawn(async move {
                        delay(&task_handle, Duration::from_millis(100)).await
                    })
                })
                .collect();
            all(&handle, tasks).await
        })
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(results, vec![(), (), ()]);
    // Concurrent, not sequential: ~100 ms, nowhere near 300 ms.
    assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(250), "elapsed {elapsed:?}");
}

#[test]
#[serial]
fn test_periodic_timer_cadence_and_removal() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let stamps: Rc<RefCell<Vec<Instant>>> = Rc::new(RefCell::new(vec![]));

    let stamps_in_cb = stamps.clone();
    handle.add_periodic(
        Duration::from_millis(50),
        move || {
            stamps_in_cb.borrow_mut().push(Instant::now());
            Ok(())
        },
        Some(4),
    );

    event_loop
        .run(async move { Ok::<_, LoopError>(()) })
        .unwrap();

    let stamps = stamps.borrow();
    assert_eq!(stamps.len(), 4);
    // Cadence is measured from the first fire; overruns do not accumulate
    // because each due-time derives from the previous one.
    for (index, stamp) in stamps.iter().enumerate().skip(1) {
        let offset = *stamp - stamps[0];
        let expected = Duration::from_millis(50 * index as u64);
        assert!(
            offset + Duration::from_millis(15) >= expected,
            "fire {index} too early: {offset:?}"
        );
        assert!(
            offset <= expected + Duration::from_millis(40),
            "fire {index} too late: {offset:?}"
        );
    }
    // Exhausted timer is gone from the heap.
    assert_eq!(handle.stats().pending_timers, 0);
}

#[test]
#[serial]
fn test_race_of_cancellable_delays_cleans_the_heap() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();

    let fast = delay(&handle, Duration::from_millis(100));
    let slow = delay(&handle, Duration::from_secs(1));
    let winner = race(&handle, vec![fast, slow]);

    let started = Instant::now();
    event_loop.run(async move { winner.await }).unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");
    // The one-second loser was removed from the heap, which is also why
    // run() returned in ~100 ms instead of one second.
    assert_eq!(handle.stats().pending_timers, 0);
}

#[test]
#[serial]
fn test_timeout_rejects_within_tolerance() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();

    let guarded = timeout(
        &handle,
        delay(&handle, Duration::from_secs(1)),
        Duration::from_millis(50),
    );

    let started = Instant::now();
    let result = event_loop.run(async move { guarded.await });
    let elapsed = started.elapsed();

    assert_eq!(result, Err(LoopError::Timeout));
    assert!(elapsed >= Duration::from_millis(50), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "elapsed {elapsed:?}");
}

#[test]
#[serial]
fn test_quiescent_loop_returns_within_one_tick() {
    let event_loop = EventLoop::new_default().unwrap();
    let started = Instant::now();
    let value = event_loop
        .run(async move { Ok::<_, LoopError>(17) })
        .unwrap();
    assert_eq!(value, 17);
    assert!(started.elapsed() < Duration::from_millis(100));
}
