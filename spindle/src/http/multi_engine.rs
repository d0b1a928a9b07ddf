// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words libcurl useragent redirections

//! Concurrent outbound HTTP over a single multi-handle.
//!
//! The engine owns exactly one [`curl::multi::Multi`] for its lifetime, so
//! libcurl's connection cache is reused across requests within a loop and
//! dropped at shutdown. Requests transition QUEUED -> ACTIVE -> COMPLETED or
//! CANCELLED: activation is FIFO up to `max_active`; each tick advances the
//! multi-handle one non-blocking step and reaps finished transfers.

use crate::http::request::{HttpCallback, HttpOutcome, HttpMethod, RequestId,
                           RequestOptions};
use curl::{easy::{Easy2, Handler, List, WriteError},
           multi::{Easy2Handle, Multi}};
use std::collections::{HashMap, VecDeque};

/// Accumulates body bytes and parsed header lines during a transfer.
#[derive(Default)]
struct Collector {
    body: Vec<u8>,
    headers: Vec<(String, String)>,
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn header(&mut self, data: &[u8]) -> bool {
        let line = String::from_utf8_lossy(data);
        let line = line.trim_end_matches(['\r', '\n']);
        // Status lines ("HTTP/1.1 200 OK") and the blank terminator are not
        // name/value pairs.
        if let Some((name, value)) = line.split_once(':')
            && !name.is_empty()
        {
            self.headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }
        true
    }
}

struct PendingRequest {
    id: u64,
    url: String,
    options: RequestOptions,
}

pub struct HttpMultiEngine {
    multi: Multi,
    pending: VecDeque<PendingRequest>,
    active: HashMap<u64, Easy2Handle<Collector>>,
    callbacks: HashMap<u64, HttpCallback>,
    max_active: usize,
    next_id: u64,
}

impl std::fmt::Debug for HttpMultiEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMultiEngine")
            .field("queued", &self.pending.len())
            .field("active", &self.active.len())
            .field("max_active", &self.max_active)
            .finish()
    }
}

impl HttpMultiEngine {
    #[must_use]
    pub fn new(max_active: usize) -> Self {
        HttpMultiEngine {
            multi: Multi::new(),
            pending: VecDeque::new(),
            active: HashMap::new(),
            callbacks: HashMap::new(),
            max_active,
            next_id: 0,
        }
    }

    /// Queue a transfer. Activation happens on a later
    /// [`collect_progress`](Self::collect_progress) call, FIFO, bounded by
    /// `max_active`.
    pub fn enqueue(
        &mut self,
        url: impl Into<String>,
        options: RequestOptions,
        cb: HttpCallback,
    ) -> RequestId {
        self.next_id += 1;
        let id = self.next_id;
        let url = url.into();
        tracing::debug!(request = id, %url, "enqueued http request");
        self.callbacks.insert(id, cb);
        self.pending.push_back(PendingRequest { id, url, options });
        RequestId::new(id)
    }

    /// Cancel a transfer. A queued request is removed before activation and
    /// its callback is dropped; an active one is detached from the
    /// multi-handle and its callback receives the literal cancellation
    /// outcome (reason `"Request cancelled"`, status 0, null body).
    pub fn cancel(&mut self, id: RequestId) -> Option<(HttpCallback, HttpOutcome)> {
        let raw = id.raw();
        if let Some(position) = self
            .pending
            .iter()
            .position(|request| request.id == raw)
        {
            self.pending.remove(position);
            self.callbacks.remove(&raw);
            tracing::debug!(request = raw, "cancelled queued http request");
            return None;
        }
        if let Some(handle) = self.active.remove(&raw) {
            // Detaching frees the connection immediately.
            drop(self.multi.remove2(handle));
            tracing::debug!(request = raw, "cancelled active http request");
            return self
                .callbacks
                .remove(&raw)
                .map(|cb| (cb, HttpOutcome::cancelled()));
        }
        None
    }

    #[must_use]
    pub fn has_request(&self, id: RequestId) -> bool {
        self.callbacks.contains_key(&id.raw())
    }

    /// One tick of engine work: activate queued requests into the
    /// multi-handle, advance it one non-blocking step, and reap finished
    /// transfers. Completions are returned so the loop can run them with
    /// the engine borrow released.
    pub fn collect_progress(&mut self) -> (bool, Vec<(HttpCallback, HttpOutcome)>) {
        let mut progressed = false;
        let mut completions = vec![];

        // (a) Activation, FIFO up to the concurrency bound.
        while self.active.len() < self.max_active
            && let Some(request) = self.pending.pop_front()
        {
            progressed = true;
            let id = request.id;
            match self.activate(request) {
                Ok(handle) => {
                    self.active.insert(id, handle);
                }
                Err(message) => {
                    tracing::debug!(request = id, %message, "http request failed to start");
                    if let Some(cb) = self.callbacks.remove(&id) {
                        completions.push((
                            cb,
                            HttpOutcome {
                                error: Some(message),
                                body: None,
                                status: None,
                                headers: vec![],
                            },
                        ));
                    }
                }
            }
        }

        // (b) One non-blocking step.
        if !self.active.is_empty() {
            if let Err(err) = self.multi.perform() {
                tracing::warn!(error = %err, "multi-handle perform failed");
            }
        }

        // (c) Reap.
        let mut finished: Vec<(u64, Option<String>)> = vec![];
        self.multi.messages(|message| {
            if let Ok(token) = message.token()
                && let Some(result) = message.result()
            {
                finished.push((token as u64, result.err().map(|err| err.to_string())));
            }
        });
        for (id, transfer_error) in finished {
            let Some(handle) = self.active.remove(&id) else {
                continue;
            };
            progressed = true;
            let Some(cb) = self.callbacks.remove(&id) else {
                continue;
            };
            let outcome = match self.multi.remove2(handle) {
                Ok(mut easy) => {
                    let status = easy.response_code().ok();
                    let collector = easy.get_ref();
                    match transfer_error {
                        Some(message) => HttpOutcome {
                            error: Some(message),
                            body: None,
                            status,
                            headers: collector.headers.clone(),
                        },
                        None => HttpOutcome {
                            error: None,
                            body: Some(collector.body.clone()),
                            status,
                            headers: collector.headers.clone(),
                        },
                    }
                }
                Err(err) => HttpOutcome {
                    error: Some(err.to_string()),
                    body: None,
                    status: None,
                    headers: vec![],
                },
            };
            tracing::debug!(request = id, status = ?outcome.status, "http request finished");
            completions.push((cb, outcome));
        }

        (progressed, completions)
    }

    fn activate(
        &mut self,
        request: PendingRequest,
    ) -> Result<Easy2Handle<Collector>, String> {
        let easy = build_easy(&request.url, &request.options)
            .map_err(|err| err.to_string())?;
        let mut handle = self.multi.add2(easy).map_err(|err| err.to_string())?;
        handle
            .set_token(request.id as usize)
            .map_err(|err| err.to_string())?;
        tracing::debug!(request = request.id, "activated http request");
        Ok(handle)
    }

    #[must_use]
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.active.is_empty()
    }

    #[must_use]
    pub fn queued_count(&self) -> usize { self.pending.len() }

    #[must_use]
    pub fn active_count(&self) -> usize { self.active.len() }

    /// Forced shutdown: detach every active transfer, drop the queue, and
    /// hand back every callback with the shutdown outcome.
    pub fn drain_for_shutdown(&mut self) -> Vec<(HttpCallback, HttpOutcome)> {
        let mut completions = vec![];
        for (_, handle) in self.active.drain() {
            drop(self.multi.remove2(handle));
        }
        self.pending.clear();
        for (_, cb) in self.callbacks.drain() {
            completions.push((cb, HttpOutcome::shut_down()));
        }
        completions
    }
}

fn build_easy(
    url: &str,
    options: &RequestOptions,
) -> Result<Easy2<Collector>, curl::Error> {
    let mut easy = Easy2::new(Collector::default());
    easy.url(url)?;

    match options.method {
        HttpMethod::Get => easy.get(true)?,
        HttpMethod::Post => easy.post(true)?,
        HttpMethod::Head => easy.nobody(true)?,
        HttpMethod::Put | HttpMethod::Delete | HttpMethod::Patch => {
            easy.custom_request(&options.method.to_string())?;
        }
    }
    if let Some(body) = &options.body {
        easy.post_fields_copy(body)?;
    }
    if !options.headers.is_empty() {
        let mut list = List::new();
        for (name, value) in &options.headers {
            list.append(&format!("{name}: {value}"))?;
        }
        easy.http_headers(list)?;
    }
    if let Some(connect_timeout) = options.connect_timeout {
        easy.connect_timeout(connect_timeout)?;
    }
    if let Some(total_timeout) = options.total_timeout {
        easy.timeout(total_timeout)?;
    }
    easy.follow_location(options.follow_redirects)?;
    if let Some(max_redirects) = options.max_redirects {
        easy.max_redirections(max_redirects)?;
    }
    if let Some(user_agent) = &options.user_agent {
        easy.useragent(user_agent)?;
    }
    Ok(easy)
}
