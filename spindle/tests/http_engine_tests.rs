// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! HTTP engine behavior against local sockets only: a bound listener that
//! never answers (for cancellation paths) and a minimal one-shot HTTP
//! server on a helper thread (for the happy path).

use pretty_assertions::assert_eq;
use serial_test::serial;
use spindle::{delay, EventLoop, LoopError};
use std::{io::{BufRead, BufReader, Write},
          net::TcpListener,
          time::{Duration, Instant}};

/// Accepts one connection, reads the request head, answers with a tiny 200.
fn one_shot_server() -> (std::thread::JoinHandle<String>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/hello", listener.local_addr().unwrap());
    let join = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        // Drain headers up to the blank line.
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
        }
        let mut stream = reader.into_inner();
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Answer: yes\r\n\r\nhello",
            )
            .unwrap();
        request_line
    });
    (join, url)
}

#[test]
#[serial]
fn test_get_round_trip_with_headers() {
    let (server, url) = one_shot_server();
    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();

    let response = event_loop
        .run(async move { handle.http_get(url).await })
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "hello");
    assert_eq!(response.header("x-answer"), Some("yes"));

    let request_line = server.join().unwrap();
    assert!(request_line.starts_with("GET /hello"));
}

#[test]
#[serial]
fn test_cancellation_releases_engine_resources() {
    // A listener whose backlog accepts the TCP handshake but never reads
    // or answers: the transfer stays in flight until cancelled.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());

    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let stats_handle = handle.clone();

    let started = Instant::now();
    let result = event_loop.run(async move {
        let request = handle.http_get(url);
        let canceller = request.clone();
        let cancel_handle = handle.clone();
        handle.spawn(async move {
            delay(&cancel_handle, Duration::from_millis(50)).await?;
            canceller.cancel();
            Ok(())
        });
        request.await.map(|_| ())
    });
    let elapsed = started.elapsed();

    assert_eq!(result, Err(LoopError::Cancelled));
    assert!(elapsed >= Duration::from_millis(50), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");

    // The engine dropped the transfer within the cancelling tick: no
    // active or queued work, nothing leaked into the next run.
    let stats = stats_handle.stats();
    assert_eq!(stats.http_active, 0);
    assert_eq!(stats.http_queued, 0);
    drop(listener);
}

#[test]
#[serial]
fn test_connection_refused_surfaces_as_network_error() {
    // Bind then drop to get a port with nothing listening.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let url = format!("http://127.0.0.1:{port}/");

    let event_loop = EventLoop::new_default().unwrap();
    let handle = event_loop.handle();
    let result = event_loop.run(async move { handle.http_get(url).await });

    assert!(matches!(result, Err(LoopError::Network { .. })));
}
