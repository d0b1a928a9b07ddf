// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Three overlapping delays plus a guarded one that loses its race against
//! the deadline. Run with: `cargo run --example concurrent_delays`

use spindle::{all, delay, timeout, EventLoop, LoopError};
use std::time::{Duration, Instant};

fn main() -> Result<(), LoopError> {
    let event_loop = EventLoop::new_default()?;
    let handle = event_loop.handle();

    let started = Instant::now();
    event_loop.run(async move {
        let pauses = vec![
            delay(&handle, Duration::from_millis(100)),
            delay(&handle, Duration::from_millis(100)),
            delay(&handle, Duration::from_millis(100)),
        ];
        all(&handle, pauses).await?;
        println!("three 100 ms delays took {:?} together", started.elapsed());

        let slow = delay(&handle, Duration::from_secs(10));
        match timeout(&handle, slow, Duration::from_millis(50)).await {
            Err(LoopError::Timeout) => {
                println!("the 10 s delay lost its 50 ms deadline, as expected");
            }
            other => println!("unexpected outcome: {other:?}"),
        }
        // The loser was cancelled, so the loop goes idle now instead of
        // waiting out the remaining ~10 s.
        Ok(())
    })?;

    println!("loop went idle after {:?}", started.elapsed());
    Ok(())
}
