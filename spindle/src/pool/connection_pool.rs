// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Bounded connection pool with a FIFO waiter queue.
//!
//! `active` counts every live connection, handed out or idle, so the
//! invariant is simply `active <= max`. The idle queue is FIFO so
//! connections age evenly. A released connection is health-probed: a dead
//! one is discarded and, when someone is waiting, replaced by a fresh
//! connection up to the bound; a live one is reset (open transaction rolled
//! back) and handed directly to the head waiter without passing through the
//! idle queue.

use crate::{error::LoopError,
            event_loop::LoopHandle,
            pool::pool_config::PoolConfig,
            promise::Promise};
use std::{cell::RefCell, collections::VecDeque, rc::Rc};

/// A pooled resource. The pool probes liveness on release and resets state
/// before reuse.
pub trait ManagedConnection: 'static {
    fn is_alive(&mut self) -> bool;

    /// Return the connection to a clean state (roll back any open
    /// transaction).
    fn reset(&mut self);
}

/// Creates connections for the pool. Connection setup is synchronous, like
/// the blocking drivers it wraps.
pub trait Connector: 'static {
    type Conn: ManagedConnection;

    fn connect(&self) -> Result<Self::Conn, LoopError>;
}

/// Shared handle to one pooled connection. Exclusive use by the acquiring
/// task until [`ConnectionPool::release`] is called with it.
#[derive(PartialEq)]
pub struct PooledConnection<C: ManagedConnection> {
    id: u64,
    conn: Rc<RefCell<C>>,
}

impl<C: ManagedConnection> Clone for PooledConnection<C> {
    fn clone(&self) -> Self {
        PooledConnection {
            id: self.id,
            conn: self.conn.clone(),
        }
    }
}

impl<C: ManagedConnection> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<C: ManagedConnection> PooledConnection<C> {
    /// Run a closure against the underlying connection.
    pub fn with<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.conn.borrow_mut())
    }

    #[must_use]
    pub fn id(&self) -> u64 { self.id }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max: usize,
    /// Live connections: handed out plus idle.
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
}

struct PoolInner<F: Connector> {
    connector: F,
    max: usize,
    active: usize,
    idle: VecDeque<PooledConnection<F::Conn>>,
    waiters: VecDeque<Promise<PooledConnection<F::Conn>>>,
    closed: bool,
    next_conn_id: u64,
}

impl<F: Connector> PoolInner<F> {
    fn create_connection(&mut self) -> Result<PooledConnection<F::Conn>, LoopError> {
        let conn = self.connector.connect()?;
        self.next_conn_id += 1;
        Ok(PooledConnection {
            id: self.next_conn_id,
            conn: Rc::new(RefCell::new(conn)),
        })
    }
}

pub struct ConnectionPool<F: Connector> {
    inner: Rc<RefCell<PoolInner<F>>>,
    handle: LoopHandle,
}

impl<F: Connector> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: self.inner.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<F: Connector> std::fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ConnectionPool")
            .field("max", &stats.max)
            .field("active", &stats.active)
            .field("idle", &stats.idle)
            .field("waiting", &stats.waiting)
            .finish()
    }
}

impl<F: Connector> ConnectionPool<F> {
    /// Validate `config` and build an empty pool. No connection is opened
    /// until the first [`get`](Self::get).
    pub fn new(
        handle: &LoopHandle,
        config: &PoolConfig,
        connector: F,
    ) -> Result<Self, LoopError> {
        config.validate()?;
        let max = config
            .max_connections
            .unwrap_or_else(|| handle.config().db_pool_size);
        Ok(ConnectionPool {
            inner: Rc::new(RefCell::new(PoolInner {
                connector,
                max,
                active: 0,
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
                next_conn_id: 0,
            })),
            handle: handle.clone(),
        })
    }

    /// Acquire a connection: idle head if any, else a fresh connection
    /// while under the bound, else join the FIFO waiter queue.
    pub fn get(&self) -> Promise<PooledConnection<F::Conn>> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return Promise::rejected(&self.handle, LoopError::PoolClosed);
        }
        if let Some(conn) = inner.idle.pop_front() {
            tracing::trace!(conn = conn.id(), "pool hand-out from idle");
            return Promise::resolved(&self.handle, conn);
        }
        if inner.active < inner.max {
            inner.active += 1;
            return match inner.create_connection() {
                Ok(conn) => {
                    tracing::debug!(conn = conn.id(), active = inner.active, "pool opened connection");
                    Promise::resolved(&self.handle, conn)
                }
                Err(error) => {
                    inner.active -= 1;
                    Promise::rejected(&self.handle, error)
                }
            };
        }
        tracing::trace!(waiting = inner.waiters.len() + 1, "pool saturated, queueing waiter");
        let waiter = Promise::pending(&self.handle);
        inner.waiters.push_back(waiter.clone());
        waiter
    }

    /// Hand a connection back. See the module docs for the dead/live and
    /// waiter/idle decision table.
    pub fn release(&self, conn: PooledConnection<F::Conn>) {
        let healthy = conn.with(ManagedConnection::is_alive);
        let mut inner = self.inner.borrow_mut();

        if inner.closed {
            inner.active = inner.active.saturating_sub(1);
            return;
        }

        if !healthy {
            tracing::debug!(conn = conn.id(), "pool discarding dead connection");
            inner.active -= 1;
            drop(conn);
            // A waiter is stranded unless the dead connection is replaced.
            if !inner.waiters.is_empty() && inner.active < inner.max {
                inner.active += 1;
                match inner.create_connection() {
                    Ok(fresh) => {
                        if let Some(waiter) = inner.waiters.pop_front() {
                            waiter.fulfill(fresh);
                        }
                    }
                    Err(error) => {
                        inner.active -= 1;
                        if let Some(waiter) = inner.waiters.pop_front() {
                            waiter.reject(error);
                        }
                    }
                }
            }
            return;
        }

        conn.with(ManagedConnection::reset);
        match inner.waiters.pop_front() {
            // Direct hand-off: never an unlocked window in the idle queue.
            Some(waiter) => {
                tracing::trace!(conn = conn.id(), "pool direct hand-off to waiter");
                waiter.fulfill(conn);
            }
            None => inner.idle.push_back(conn),
        }
    }

    /// Reject every waiter with [`LoopError::PoolClosed`] and drop the idle
    /// connections. Connections still handed out are discarded as they come
    /// back.
    pub fn close(&self) {
        let waiters: Vec<_> = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.closed = true;
            let dropped_idle = inner.idle.len();
            inner.idle.clear();
            inner.active -= dropped_idle;
            inner.waiters.drain(..).collect()
        };
        tracing::debug!(rejected_waiters = waiters.len(), "pool closed");
        for waiter in waiters {
            waiter.reject(LoopError::PoolClosed);
        }
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.borrow();
        PoolStats {
            max: inner.max,
            active: inner.active,
            idle: inner.idle.len(),
            waiting: inner.waiters.len(),
        }
    }
}
