// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The user-facing surface of a running loop.
//!
//! [`LoopHandle`] is a cheap clone; every manager API is reachable through
//! it, and the promise-returning forms wire cancellation through to the
//! owning manager (cancel a delay and the timer is gone, cancel a request
//! and the transfer handle is detached).
//!
//! The global singleton of classic designs becomes a value here: handles
//! are passed explicitly, and [`LoopHandle::current`] consults thread-local
//! storage populated for the duration of [`EventLoop::run`] for the cases
//! where threading a handle through is impractical.
//!
//! [`EventLoop::run`]: super::loop_core::EventLoop::run

use crate::{config::RuntimeConfig,
            db::{BlockingDriver, DbPayload, DbQueue, DbResult, DbValue,
                 StatementId, DEFAULT_DB_OPS_PER_TICK},
            error::LoopError,
            event_loop::loop_core::LoopCore,
            fs::{CopyOptions, FileCallback, FileEvent, FileOpKind, FileOpResult,
                 FileStat, FileWatcherId, MkdirOptions, ReadOptions,
                 RemoveDirOptions, RenameOptions, WriteOptions},
            http::{HttpCallback, HttpOutcome, HttpResponse, RequestOptions,
                   REQUEST_CANCELLED, REQUEST_SHUTDOWN},
            io::WatcherId,
            promise::{CancellablePromise, Promise},
            task::TaskState,
            time::TimerId};
use futures_util::FutureExt;
use std::{cell::{Cell, RefCell},
          future::Future,
          os::unix::io::RawFd,
          path::Path,
          rc::{Rc, Weak},
          time::Duration};

thread_local! {
    static CURRENT_LOOP: RefCell<Option<Weak<LoopCore>>> =
        const { RefCell::new(None) };
}

/// Installs a loop as the thread's current loop for the lifetime of the
/// guard, restoring whatever was there before on drop.
pub(crate) struct CurrentLoopGuard {
    previous: Option<Weak<LoopCore>>,
}

impl CurrentLoopGuard {
    pub(crate) fn enter(core: &Rc<LoopCore>) -> Self {
        let previous = CURRENT_LOOP.with(|slot| {
            slot.borrow_mut().replace(Rc::downgrade(core))
        });
        CurrentLoopGuard { previous }
    }
}

impl Drop for CurrentLoopGuard {
    fn drop(&mut self) {
        CURRENT_LOOP.with(|slot| {
            *slot.borrow_mut() = self.previous.take();
        });
    }
}

#[derive(Clone)]
pub struct LoopHandle {
    core: Rc<LoopCore>,
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle").field("core", &self.core).finish()
    }
}

impl LoopHandle {
    pub(crate) fn new(core: Rc<LoopCore>) -> Self { LoopHandle { core } }

    pub(crate) fn downgrade_core(&self) -> Weak<LoopCore> {
        Rc::downgrade(&self.core)
    }

    /// The loop currently running on this thread. Fails with
    /// [`LoopError::NotInTask`] outside [`EventLoop::run`].
    ///
    /// [`EventLoop::run`]: super::loop_core::EventLoop::run
    pub fn current() -> Result<LoopHandle, LoopError> {
        CURRENT_LOOP
            .with(|slot| slot.borrow().as_ref().and_then(Weak::upgrade))
            .map(LoopHandle::new)
            .ok_or(LoopError::NotInTask)
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig { &self.core.config }

    // ## Micro-task queues

    /// Run `cb` at the start of the next tick, before any timer due then.
    pub fn next_tick(&self, cb: impl FnOnce() -> Result<(), LoopError> + 'static) {
        self.core.tick_queue.borrow_mut().push_next_tick(Box::new(cb));
    }

    /// Run `cb` at the end of the current tick.
    pub fn defer(&self, cb: impl FnOnce() -> Result<(), LoopError> + 'static) {
        self.core.tick_queue.borrow_mut().push_deferred(Box::new(cb));
    }

    // ## Timers

    pub fn add_timer(
        &self,
        delay: Duration,
        cb: impl FnOnce() -> Result<(), LoopError> + 'static,
    ) -> TimerId {
        self.core.timers.borrow_mut().add_timer(delay, cb)
    }

    pub(crate) fn add_timer_with_abort(
        &self,
        delay: Duration,
        cb: impl FnOnce() -> Result<(), LoopError> + 'static,
        abort: Box<dyn FnOnce()>,
    ) -> TimerId {
        self.core
            .timers
            .borrow_mut()
            .add_timer_with_abort(delay, cb, Some(abort))
    }

    pub fn add_periodic(
        &self,
        interval: Duration,
        cb: impl FnMut() -> Result<(), LoopError> + 'static,
        max_executions: Option<u32>,
    ) -> TimerId {
        self.core
            .timers
            .borrow_mut()
            .add_periodic(interval, cb, max_executions)
    }

    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.core.timers.borrow_mut().cancel(id)
    }

    // ## Stream/socket watchers

    pub fn add_read_watcher(
        &self,
        fd: RawFd,
        cb: impl FnOnce(RawFd) -> Result<(), LoopError> + 'static,
    ) -> WatcherId {
        self.core.streams.borrow_mut().add_read(fd, cb)
    }

    pub(crate) fn add_read_watcher_with_abort(
        &self,
        fd: RawFd,
        cb: impl FnOnce(RawFd) -> Result<(), LoopError> + 'static,
        abort: Option<Box<dyn FnOnce()>>,
    ) -> WatcherId {
        self.core.streams.borrow_mut().add_read_with_abort(fd, cb, abort)
    }

    pub fn add_write_watcher(
        &self,
        fd: RawFd,
        cb: impl FnOnce(RawFd) -> Result<(), LoopError> + 'static,
    ) -> WatcherId {
        self.core.streams.borrow_mut().add_write(fd, cb)
    }

    pub fn remove_stream_watcher(&self, id: WatcherId) -> bool {
        self.core.streams.borrow_mut().remove(id)
    }

    pub fn clear_fd_watchers(&self, fd: RawFd) -> usize {
        self.core.streams.borrow_mut().clear_fd(fd)
    }

    /// Suspension-point form of a one-shot read watcher. Cancellation
    /// removes the watcher.
    pub fn wait_readable(&self, fd: RawFd) -> CancellablePromise<RawFd> {
        self.wait_on_fd(fd, true)
    }

    /// Suspension-point form of a one-shot write watcher.
    pub fn wait_writable(&self, fd: RawFd) -> CancellablePromise<RawFd> {
        self.wait_on_fd(fd, false)
    }

    fn wait_on_fd(&self, fd: RawFd, readable: bool) -> CancellablePromise<RawFd> {
        let promise: Promise<RawFd> = Promise::pending(self);
        let settle = promise.clone();
        let abort = promise.clone();
        let cb = move |ready_fd| {
            settle.fulfill(ready_fd);
            Ok(())
        };
        let on_abort: Box<dyn FnOnce()> =
            Box::new(move || abort.reject(LoopError::Shutdown));
        let id = {
            let mut streams = self.core.streams.borrow_mut();
            if readable {
                streams.add_read_with_abort(fd, cb, Some(on_abort))
            } else {
                streams.add_write_with_abort(fd, cb, Some(on_abort))
            }
        };
        let core = self.downgrade_core();
        promise.set_cancel_handler(move || {
            if let Some(core) = core.upgrade() {
                core.streams.borrow_mut().remove(id);
            }
        });
        promise
    }

    // ## Tasks and promises

    /// Spawn a routine as a cooperative task. It starts on the next tick;
    /// its result (or failure) settles the returned completion promise.
    pub fn spawn<T, F>(&self, future: F) -> Promise<T>
    where
        T: Clone + 'static,
        F: Future<Output = Result<T, LoopError>> + 'static,
    {
        let promise: Promise<T> = Promise::pending(self);
        let settle = promise.clone();
        let state = Rc::new(Cell::new(TaskState::New));
        let state_in_future = state.clone();
        let wrapped = async move {
            let output = future.await;
            state_in_future.set(match &output {
                Ok(_) => TaskState::Completed,
                Err(_) => TaskState::Failed,
            });
            settle.settle(output);
        }
        .boxed_local();
        let abort = promise.clone();
        self.core.tasks.borrow_mut().spawn(
            wrapped,
            state,
            Some(Box::new(move || abort.reject(LoopError::Shutdown))),
        );
        promise
    }

    pub fn resolved<T: Clone + 'static>(&self, value: T) -> Promise<T> {
        Promise::resolved(self, value)
    }

    pub fn rejected<T: Clone + 'static>(&self, reason: LoopError) -> Promise<T> {
        Promise::rejected(self, reason)
    }

    // ## File operations

    fn enqueue_file_op<T: Clone + 'static>(
        &self,
        kind: FileOpKind,
        extract: impl FnOnce(FileOpResult) -> Result<T, LoopError> + 'static,
    ) -> CancellablePromise<T> {
        let promise: Promise<T> = Promise::pending(self);
        let settle = promise.clone();
        let cancelled = Rc::new(Cell::new(false));
        let cb: FileCallback = Box::new(move |result| {
            settle.settle(result.and_then(extract));
        });
        self.core
            .files
            .borrow_mut()
            .enqueue(kind, cancelled.clone(), cb);
        promise.set_cancel_handler(move || cancelled.set(true));
        promise
    }

    pub fn read_file(
        &self,
        path: impl AsRef<Path>,
        options: ReadOptions,
    ) -> CancellablePromise<Vec<u8>> {
        self.enqueue_file_op(
            FileOpKind::Read {
                path: path.as_ref().to_path_buf(),
                options,
            },
            |result| match result {
                FileOpResult::Bytes(bytes) => Ok(bytes),
                other => Err(unexpected_file_result(&other)),
            },
        )
    }

    pub fn write_file(
        &self,
        path: impl AsRef<Path>,
        payload: Vec<u8>,
        options: WriteOptions,
    ) -> CancellablePromise<u64> {
        self.enqueue_file_op(
            FileOpKind::Write {
                path: path.as_ref().to_path_buf(),
                payload,
                options,
            },
            |result| match result {
                FileOpResult::Written(count) => Ok(count),
                other => Err(unexpected_file_result(&other)),
            },
        )
    }

    pub fn append_file(
        &self,
        path: impl AsRef<Path>,
        payload: Vec<u8>,
    ) -> CancellablePromise<u64> {
        self.enqueue_file_op(
            FileOpKind::Append {
                path: path.as_ref().to_path_buf(),
                payload,
            },
            |result| match result {
                FileOpResult::Written(count) => Ok(count),
                other => Err(unexpected_file_result(&other)),
            },
        )
    }

    pub fn delete_file(&self, path: impl AsRef<Path>) -> CancellablePromise<bool> {
        self.enqueue_file_op(
            FileOpKind::Delete {
                path: path.as_ref().to_path_buf(),
            },
            extract_done,
        )
    }

    pub fn file_exists(&self, path: impl AsRef<Path>) -> CancellablePromise<bool> {
        self.enqueue_file_op(
            FileOpKind::Exists {
                path: path.as_ref().to_path_buf(),
            },
            |result| match result {
                FileOpResult::Exists(exists) => Ok(exists),
                other => Err(unexpected_file_result(&other)),
            },
        )
    }

    pub fn stat_file(&self, path: impl AsRef<Path>) -> CancellablePromise<FileStat> {
        self.enqueue_file_op(
            FileOpKind::Stat {
                path: path.as_ref().to_path_buf(),
            },
            |result| match result {
                FileOpResult::Stat(stat) => Ok(stat),
                other => Err(unexpected_file_result(&other)),
            },
        )
    }

    pub fn mkdir(
        &self,
        path: impl AsRef<Path>,
        options: MkdirOptions,
    ) -> CancellablePromise<bool> {
        self.enqueue_file_op(
            FileOpKind::Mkdir {
                path: path.as_ref().to_path_buf(),
                options,
            },
            extract_done,
        )
    }

    pub fn rmdir(
        &self,
        path: impl AsRef<Path>,
        options: RemoveDirOptions,
    ) -> CancellablePromise<bool> {
        self.enqueue_file_op(
            FileOpKind::Rmdir {
                path: path.as_ref().to_path_buf(),
                options,
            },
            extract_done,
        )
    }

    pub fn copy_file(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        options: CopyOptions,
    ) -> CancellablePromise<bool> {
        self.enqueue_file_op(
            FileOpKind::Copy {
                from: from.as_ref().to_path_buf(),
                to: to.as_ref().to_path_buf(),
                options,
            },
            extract_done,
        )
    }

    pub fn rename_file(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        options: RenameOptions,
    ) -> CancellablePromise<bool> {
        self.enqueue_file_op(
            FileOpKind::Rename {
                from: from.as_ref().to_path_buf(),
                to: to.as_ref().to_path_buf(),
                options,
            },
            extract_done,
        )
    }

    /// Poll `path` every `poll_interval` and fire `cb` on observed changes.
    pub fn watch_file(
        &self,
        path: impl AsRef<Path>,
        poll_interval: Duration,
        cb: impl FnMut(FileEvent, &Path) -> Result<(), LoopError> + 'static,
    ) -> FileWatcherId {
        self.core
            .file_watchers
            .borrow_mut()
            .add(path.as_ref(), poll_interval, cb)
    }

    pub fn unwatch_file(&self, id: FileWatcherId) -> bool {
        self.core.file_watchers.borrow_mut().remove(id)
    }

    // ## HTTP

    /// Queue an HTTP transfer. Cancelling the promise before completion
    /// removes a queued request or detaches an active one, freeing its
    /// connection within the same tick.
    pub fn http_request(
        &self,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> CancellablePromise<HttpResponse> {
        let promise: Promise<HttpResponse> = Promise::pending(self);
        let settle = promise.clone();
        let cb: HttpCallback = Box::new(move |outcome: HttpOutcome| {
            match outcome.error {
                None => settle.fulfill(HttpResponse {
                    status: outcome.status.unwrap_or(0),
                    body: outcome.body.unwrap_or_default(),
                    headers: outcome.headers,
                }),
                Some(message) if message == REQUEST_CANCELLED => {
                    settle.reject(LoopError::Cancelled);
                }
                Some(message) if message == REQUEST_SHUTDOWN => {
                    settle.reject(LoopError::Shutdown);
                }
                Some(message) => settle.reject(LoopError::network(message)),
            }
        });
        let id = self.core.http.borrow_mut().enqueue(url, options, cb);
        let core = self.downgrade_core();
        promise.set_cancel_handler(move || {
            if let Some(core) = core.upgrade() {
                let completion = core.http.borrow_mut().cancel(id);
                if let Some((cb, outcome)) = completion {
                    cb(outcome);
                }
            }
        });
        promise
    }

    pub fn http_get(&self, url: impl Into<String>) -> CancellablePromise<HttpResponse> {
        self.http_request(url, RequestOptions::default())
    }

    // ## Database

    /// Install the blocking driver behind the serialized operation queue.
    /// Replaces any previous driver; queued operations on the old driver
    /// are dropped.
    pub fn set_db_driver(&self, driver: Box<dyn BlockingDriver>) {
        *self.core.db.borrow_mut() =
            Some(DbQueue::new(driver, DEFAULT_DB_OPS_PER_TICK));
    }

    fn enqueue_db_op(&self, payload: DbPayload) -> CancellablePromise<DbResult> {
        let promise: Promise<DbResult> = Promise::pending(self);
        let enqueued = {
            let mut db = self.core.db.borrow_mut();
            match db.as_mut() {
                Some(queue) => {
                    let cancelled = Rc::new(Cell::new(false));
                    let settle = promise.clone();
                    queue.enqueue(
                        payload,
                        cancelled.clone(),
                        Box::new(move |result| settle.settle(result)),
                    );
                    Some(cancelled)
                }
                None => None,
            }
        };
        match enqueued {
            Some(cancelled) => {
                promise.set_cancel_handler(move || cancelled.set(true));
            }
            None => promise.reject(LoopError::database(
                "no database driver configured",
            )),
        }
        promise
    }

    pub fn db_query(
        &self,
        sql: impl Into<String>,
        params: Vec<DbValue>,
    ) -> CancellablePromise<DbResult> {
        self.enqueue_db_op(DbPayload::Query {
            sql: sql.into(),
            params,
        })
    }

    pub fn db_prepare(&self, sql: impl Into<String>) -> CancellablePromise<DbResult> {
        self.enqueue_db_op(DbPayload::Prepare { sql: sql.into() })
    }

    pub fn db_execute(
        &self,
        statement: StatementId,
        params: Vec<DbValue>,
    ) -> CancellablePromise<DbResult> {
        self.enqueue_db_op(DbPayload::Execute { statement, params })
    }

    pub fn db_begin(&self) -> CancellablePromise<DbResult> {
        self.enqueue_db_op(DbPayload::Begin)
    }

    pub fn db_commit(&self) -> CancellablePromise<DbResult> {
        self.enqueue_db_op(DbPayload::Commit)
    }

    pub fn db_rollback(&self) -> CancellablePromise<DbResult> {
        self.enqueue_db_op(DbPayload::Rollback)
    }

    // ## Lifecycle

    /// Replace the error sink; see [`EventLoop::set_error_sink`].
    ///
    /// [`EventLoop::set_error_sink`]: super::loop_core::EventLoop::set_error_sink
    pub fn set_error_sink(&self, sink: crate::error_sink::ErrorSink) {
        self.core.set_error_sink(sink);
    }

    #[must_use]
    pub fn stats(&self) -> super::stats::LoopStats { self.core.stats() }

    #[must_use]
    pub fn current_tick(&self) -> u64 { self.core.current_tick() }

    /// Request a graceful stop: the loop exits when idle, or escalates to
    /// [`force_stop`](Self::force_stop) after `force_shutdown_timeout_sec`.
    pub fn stop(&self) { self.core.request_stop(); }

    /// Clear all timers, cancel in-flight requests, drop watchers, reject
    /// outstanding promises with [`LoopError::Shutdown`], and break the
    /// tick loop within one tick.
    pub fn force_stop(&self) { self.core.request_force_stop(); }
}

fn extract_done(result: FileOpResult) -> Result<bool, LoopError> {
    match result {
        FileOpResult::Done(flag) => Ok(flag),
        other => Err(unexpected_file_result(&other)),
    }
}

fn unexpected_file_result(result: &FileOpResult) -> LoopError {
    LoopError::io(format!("unexpected file operation result: {result:?}"))
}
