// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A polling file watcher observing a cooperatively streamed write.
//! Run with: `cargo run --example watch_and_stream`

use spindle::{delay, EventLoop, LoopError, ScratchDir, WriteOptions};
use std::time::Duration;

fn main() -> miette::Result<()> {
    let scratch = ScratchDir::new()?;
    let target = scratch.file("streamed.bin");

    let event_loop = EventLoop::new_default()?;
    let handle = event_loop.handle();

    let watcher_id = handle.watch_file(&target, Duration::from_millis(20), |event, path| {
        println!("watcher: {event} {}", path.display());
        Ok(())
    });

    event_loop.run(async move {
        // ~1 MiB in 64 KiB chunks: the watcher sees it grow mid-stream.
        let written = handle
            .write_file(
                &target,
                vec![0xA5; 1024 * 1024],
                WriteOptions {
                    use_streaming: true,
                    ..Default::default()
                },
            )
            .await?;
        println!("streamed {written} bytes");

        // Give the watcher one more interval to observe the final state,
        // then drop it so the loop can go idle.
        delay(&handle, Duration::from_millis(50)).await?;
        handle.unwatch_file(watcher_id);
        Ok::<_, LoopError>(())
    })?;
    Ok(())
}
