// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Database operation records and the driver seams.
//!
//! Two driver shapes exist:
//! 1. [`BlockingDriver`] - a synchronous connection (the embedded sqlite
//!    driver ships in this crate). Operations against it are serialized
//!    through the [`DbQueue`], a bounded number per tick.
//! 2. [`PollDriver`] - a socket-level asynchronous protocol (the
//!    PostgreSQL model): submit, watch the connection socket, consume
//!    partial input until the driver reports the result ready.
//!
//! [`DbQueue`]: crate::db::blocking_queue::DbQueue
//! [`PollDriver`]: crate::db::socket_poll::PollDriver

use crate::error::LoopError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbOpId(u64);

impl DbOpId {
    pub(crate) fn new(raw: u64) -> Self { DbOpId(raw) }

    #[must_use]
    pub fn raw(&self) -> u64 { self.0 }
}

impl std::fmt::Display for DbOpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "db-op#{}", self.0)
    }
}

/// Handle to a statement registered with [`DbPayload::Prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u64);

/// A dynamically typed SQL value crossing the driver boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self { DbValue::Text(value.to_string()) }
}

impl From<i64> for DbValue {
    fn from(value: i64) -> Self { DbValue::Integer(value) }
}

/// The serialized operation kinds: plain query, prepare/execute, and
/// transaction control.
#[derive(Debug, Clone, PartialEq)]
pub enum DbPayload {
    Query {
        sql: String,
        params: Vec<DbValue>,
    },
    Prepare {
        sql: String,
    },
    Execute {
        statement: StatementId,
        params: Vec<DbValue>,
    },
    Begin,
    Commit,
    Rollback,
}

impl DbPayload {
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            DbPayload::Query { .. } => "query",
            DbPayload::Prepare { .. } => "prepare",
            DbPayload::Execute { .. } => "execute",
            DbPayload::Begin => "begin",
            DbPayload::Commit => "commit",
            DbPayload::Rollback => "rollback",
        }
    }
}

/// Result shape per kind: row sets for selects, affected counts (plus the
/// insert id when applicable) for mutations, a statement handle for
/// prepare, and a bare acknowledgement for transaction control.
#[derive(Debug, Clone, PartialEq)]
pub enum DbResult {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<DbValue>>,
    },
    Affected {
        affected_rows: u64,
        insert_id: Option<i64>,
    },
    Prepared {
        statement: StatementId,
    },
    Done,
}

/// Completion callback for a queued operation.
pub type DbCallback = Box<dyn FnOnce(Result<DbResult, LoopError>)>;

/// A synchronous driver connection. One queue owns one connection;
/// everything on it is serialized.
pub trait BlockingDriver {
    fn execute(&mut self, payload: &DbPayload) -> Result<DbResult, LoopError>;

    /// Cheap health probe (a no-op query or driver-level status check).
    fn ping(&mut self) -> bool;

    /// Roll back any open transaction; errors are ignored when none is
    /// open. Runs before a pooled connection is reused.
    fn rollback_open_transaction(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_tags() {
        let query = DbPayload::Query {
            sql: "SELECT 1".into(),
            params: vec![],
        };
        assert_eq!(query.tag(), "query");
        assert_eq!(DbPayload::Begin.tag(), "begin");
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(DbValue::from("x"), DbValue::Text("x".into()));
        assert_eq!(DbValue::from(3i64), DbValue::Integer(3));
    }
}
