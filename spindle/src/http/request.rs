// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! HTTP request/response records: the closed transfer-option set and the
//! completion payload handed to callbacks.

use std::time::Duration;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn new(raw: u64) -> Self { RequestId(raw) }

    #[must_use]
    pub fn raw(&self) -> u64 { self.0 }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

/// Transfer options. A closed record: every recognized knob is a field.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub connect_timeout: Option<Duration>,
    pub total_timeout: Option<Duration>,
    pub follow_redirects: bool,
    pub max_redirects: Option<u32>,
    pub user_agent: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            method: HttpMethod::Get,
            headers: vec![],
            body: None,
            connect_timeout: None,
            total_timeout: None,
            follow_redirects: true,
            max_redirects: None,
            user_agent: None,
        }
    }
}

/// What a finished transfer delivers to its completion callback:
/// `(error-or-null, body-or-null, status-or-null, headers)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpOutcome {
    pub error: Option<String>,
    pub body: Option<Vec<u8>>,
    pub status: Option<u32>,
    pub headers: Vec<(String, String)>,
}

/// Literal reason reported when an enqueued or active transfer is
/// cancelled.
pub const REQUEST_CANCELLED: &str = "Request cancelled";

/// Reason reported when the loop is forced down with transfers in flight.
pub const REQUEST_SHUTDOWN: &str = "Event loop shut down";

impl HttpOutcome {
    pub(crate) fn cancelled() -> Self {
        HttpOutcome {
            error: Some(REQUEST_CANCELLED.to_string()),
            body: None,
            status: Some(0),
            headers: vec![],
        }
    }

    pub(crate) fn shut_down() -> Self {
        HttpOutcome {
            error: Some(REQUEST_SHUTDOWN.to_string()),
            body: None,
            status: Some(0),
            headers: vec![],
        }
    }
}

/// Successful response surfaced on the promise layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u32,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn body_text(&self) -> String { String::from_utf8_lossy(&self.body).into_owned() }
}

pub type HttpCallback = Box<dyn FnOnce(HttpOutcome)>;
