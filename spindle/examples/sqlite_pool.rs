// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Five tasks contending for a two-slot sqlite pool, with structured
//! logging on stderr. Run with: `cargo run --example sqlite_pool`

use spindle::{all, delay, try_init, BlockingDriver, ConnectionPool, DbPayload,
              DbValue, DisplayPreference, EventLoop, LoopError, PoolConfig,
              SqliteConnector, TracingConfig};
use std::time::Duration;
use tracing_core::LevelFilter;

fn main() -> miette::Result<()> {
    let _log_guard = try_init(&TracingConfig::new_display(
        DisplayPreference::Stderr,
        LevelFilter::DEBUG,
    ))?;

    let event_loop = EventLoop::new_default()?;
    let handle = event_loop.handle();

    let config = PoolConfig {
        max_connections: Some(2),
        ..PoolConfig::sqlite(":memory:")
    };
    let connector = SqliteConnector::from_config(&config)?;
    let pool = ConnectionPool::new(&handle, &config, connector)?;

    event_loop.run(async move {
        let tasks: Vec<_> = (0..5i64)
            .map(|worker| {
                let pool = pool.clone();
                let task_handle = handle.clone();
                handle.spawn(async move {
                    let conn = pool.get().await?;
                    let stats = pool.stats();
                    tracing::info!(
                        worker,
                        active = stats.active,
                        waiting = stats.waiting,
                        "acquired"
                    );
                    // Hold the connection across a suspension point.
                    delay(&task_handle, Duration::from_millis(30)).await?;
                    let row = conn.with(|driver| {
                        driver.execute(&DbPayload::Query {
                            sql: "SELECT ?1 AS worker".into(),
                            params: vec![DbValue::Integer(worker)],
                        })
                    })?;
                    tracing::debug!(worker, ?row, "query done");
                    pool.release(conn);
                    Ok(())
                })
            })
            .collect();
        all(&handle, tasks).await?;
        println!("all five workers finished over two connections");
        Ok::<_, LoopError>(())
    })?;
    Ok(())
}
