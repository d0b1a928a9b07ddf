// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Pool contention under real tasks, and the serialized sqlite queue
//! end-to-end.

use pretty_assertions::assert_eq;
use serial_test::serial;
use spindle::{delay, all, ConnectionPool, DbResult, DbValue, EventLoop, LoopError,
              PoolConfig, SqliteConnector, SqliteDriver};
use std::{cell::Cell,
          rc::Rc,
          time::{Duration, Instant}};

#[test]
#[serial]
fn test_pool_under_contention_serializes_on_two_slots() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();

    let config = PoolConfig {
        max_connections: Some(2),
        ..PoolConfig::sqlite(":memory:")
    };
    let connector = SqliteConnector::from_config(&config).unwrap();
    let pool = ConnectionPool::new(&handle, &config, connector).unwrap();

    let peak_active = Rc::new(Cell::new(0usize));
    let peak_waiting = Rc::new(Cell::new(0usize));
    let successes = Rc::new(Cell::new(0usize));

    let started = Instant::now();
    event_loop
        .run(async move {
            let tasks: Vec<_> = (0..5)
                .map(|_| {
                    let pool = pool.clone();
                    let task_handle = handle.clone();
                    let peak_active = peak_active.clone();
                    let peak_waiting = peak_waiting.clone();
                    let successes = successes.clone();
                    handle.spawn(async move {
                        let conn = pool.get().await?;
                        peak_active.set(peak_active.get().max(pool.stats().active));
                        delay(&task_handle, Duration::from_millis(50)).await?;
                        // All five tasks have tried to acquire by now and
                        // nothing has been released yet, so the first two
                        // holders observe the waiter queue at its peak.
                        peak_waiting.set(peak_waiting.get().max(pool.stats().waiting));
                        pool.release(conn);
                        successes.set(successes.get() + 1);
                        Ok(())
                    })
                })
                .collect();
            all(&handle, tasks).await?;

            assert_eq!(successes.get(), 5);
            // The bound held the whole time.
            assert_eq!(peak_active.get(), 2);
            // With 2 slots and 5 acquirers, at least 3 queued up at peak.
            assert!(peak_waiting.get() >= 3, "peak {}", peak_waiting.get());
            assert_eq!(pool.stats().waiting, 0);
            Ok::<_, LoopError>(())
        })
        .unwrap();

    // 5 holders x 50 ms over 2 slots cannot finish in a single round.
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn test_db_queue_round_trip_through_the_loop() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    handle.set_db_driver(Box::new(SqliteDriver::open_in_memory().unwrap()));

    let rows = event_loop
        .run(async move {
            handle
                .db_query(
                    "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)",
                    vec![],
                )
                .await?;
            let inserted = handle
                .db_query(
                    "INSERT INTO notes (body) VALUES (?1)",
                    vec![DbValue::from("first")],
                )
                .await?;
            assert_eq!(
                inserted,
                DbResult::Affected {
                    affected_rows: 1,
                    insert_id: Some(1),
                }
            );
            handle
                .db_query("SELECT id, body FROM notes ORDER BY id", vec![])
                .await
        })
        .unwrap();

    assert_eq!(
        rows,
        DbResult::Rows {
            columns: vec!["id".into(), "body".into()],
            rows: vec![vec![DbValue::Integer(1), DbValue::Text("first".into())]],
        }
    );
}

#[test]
fn test_db_transaction_control_through_the_loop() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    handle.set_db_driver(Box::new(SqliteDriver::open_in_memory().unwrap()));

    let count = event_loop
        .run(async move {
            handle
                .db_query("CREATE TABLE t (x INTEGER)", vec![])
                .await?;
            handle.db_begin().await?;
            handle
                .db_query("INSERT INTO t (x) VALUES (1)", vec![])
                .await?;
            handle.db_rollback().await?;
            handle.db_query("SELECT COUNT(*) AS n FROM t", vec![]).await
        })
        .unwrap();

    assert_eq!(
        count,
        DbResult::Rows {
            columns: vec!["n".into()],
            rows: vec![vec![DbValue::Integer(0)]],
        }
    );
}

#[test]
fn test_prepare_execute_through_the_loop() {
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    handle.set_db_driver(Box::new(SqliteDriver::open_in_memory().unwrap()));

    let rows = event_loop
        .run(async move {
            handle
                .db_query("CREATE TABLE kv (k TEXT, v TEXT)", vec![])
                .await?;
            let prepared = handle.db_prepare("INSERT INTO kv VALUES (?1, ?2)").await?;
            let DbResult::Prepared { statement } = prepared else {
                return Err(LoopError::database("expected a prepared statement"));
            };
            handle
                .db_execute(
                    statement,
                    vec![DbValue::from("lang"), DbValue::from("rust")],
                )
                .await?;
            handle.db_query("SELECT v FROM kv WHERE k = 'lang'", vec![]).await
        })
        .unwrap();

    assert_eq!(
        rows,
        DbResult::Rows {
            columns: vec!["v".into()],
            rows: vec![vec![DbValue::Text("rust".into())]],
        }
    );
}
