// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The tick orchestrator.
//!
//! One tick, in order:
//! 1. Drain the next-tick queue (bounded).
//! 2. Start NEW tasks FIFO, then resume woken ones.
//! 3. Advance the HTTP multi engine one non-blocking step.
//! 4. Run one file-queue slice and any due file watchers.
//! 5. Run the database queue slice.
//! 6. Fire timers whose due-time has passed.
//! 7. Compute the reactor wait budget.
//! 8. Poll the reactor and dispatch ready stream watchers (write first).
//! 9. Drain the deferred queue (bounded).
//! 10. Report aged unhandled rejections; idle-sleep if nothing progressed.
//!
//! Every manager is driven with a take/dispatch/restore discipline: work is
//! pulled out under the manager borrow, and the callbacks run with that
//! borrow released, so a callback can freely talk back to any manager.

use crate::{config::RuntimeConfig,
            db::DbQueue,
            error::LoopError,
            error_sink::ErrorSink,
            fs::{execute_slice, FileQueue, FileWatcherSet},
            http::HttpMultiEngine,
            io::StreamManager,
            reactor::{PollReactor, Reactor},
            tick::TickQueue,
            time::TimerManager,
            task::TaskManager};
use std::{cell::{Cell, RefCell},
          future::Future,
          rc::Rc,
          time::{Duration, Instant}};

/// Reactor budget cap while HTTP transfers are in flight: the multi-handle
/// needs regular non-blocking steps.
const HTTP_ACTIVE_BUDGET: Duration = Duration::from_millis(10);

/// Reactor budget cap when only watchers (fd or file) and no timers remain.
const WATCH_BUDGET: Duration = Duration::from_millis(100);

struct UnhandledRejection {
    reason: LoopError,
    handled: Rc<Cell<bool>>,
    tick: u64,
}

pub(crate) struct LoopCore {
    pub(crate) config: RuntimeConfig,
    pub(crate) sink: RefCell<ErrorSink>,
    pub(crate) reactor: RefCell<Box<dyn Reactor>>,
    pub(crate) tick_queue: RefCell<TickQueue>,
    pub(crate) tasks: RefCell<TaskManager>,
    pub(crate) timers: RefCell<TimerManager>,
    pub(crate) streams: RefCell<StreamManager>,
    pub(crate) files: RefCell<FileQueue>,
    pub(crate) file_watchers: RefCell<FileWatcherSet>,
    pub(crate) http: RefCell<HttpMultiEngine>,
    pub(crate) db: RefCell<Option<DbQueue>>,
    unhandled: RefCell<Vec<UnhandledRejection>>,
    tick_counter: Cell<u64>,
    stop_requested: Cell<bool>,
    stop_deadline: Cell<Option<Instant>>,
    force_stop_requested: Cell<bool>,
}

impl std::fmt::Debug for LoopCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopCore")
            .field("tick", &self.tick_counter.get())
            .field("stopping", &self.stop_requested.get())
            .finish_non_exhaustive()
    }
}

impl LoopCore {
    fn new(config: RuntimeConfig, reactor: Box<dyn Reactor>) -> Self {
        let max_http = config.max_http_concurrency;
        LoopCore {
            config,
            sink: RefCell::new(ErrorSink::default()),
            reactor: RefCell::new(reactor),
            tick_queue: RefCell::new(TickQueue::default()),
            tasks: RefCell::new(TaskManager::default()),
            timers: RefCell::new(TimerManager::default()),
            streams: RefCell::new(StreamManager::default()),
            files: RefCell::new(FileQueue::default()),
            file_watchers: RefCell::new(FileWatcherSet::default()),
            http: RefCell::new(HttpMultiEngine::new(max_http)),
            db: RefCell::new(None),
            unhandled: RefCell::new(vec![]),
            tick_counter: Cell::new(0),
            stop_requested: Cell::new(false),
            stop_deadline: Cell::new(None),
            force_stop_requested: Cell::new(false),
        }
    }

    /// Push a promise continuation or user `next_tick` job.
    pub(crate) fn schedule_microtask(&self, job: Box<dyn FnOnce()>) {
        self.tick_queue.borrow_mut().push_next_tick(Box::new(move || {
            job();
            Ok(())
        }));
    }

    /// Record a rejection that settled with no observer. Reported through
    /// the sink after a one-tick grace window unless `handled` flips first.
    pub(crate) fn note_unhandled_rejection(
        &self,
        reason: LoopError,
        handled: Rc<Cell<bool>>,
    ) {
        self.unhandled.borrow_mut().push(UnhandledRejection {
            reason,
            handled,
            tick: self.tick_counter.get(),
        });
    }

    pub(crate) fn report_error(&self, description: &str, cause: Option<&LoopError>) {
        self.sink.borrow().report(description, cause);
    }

    pub(crate) fn set_error_sink(&self, sink: ErrorSink) {
        *self.sink.borrow_mut() = sink;
    }

    pub(crate) fn request_stop(&self) {
        if !self.stop_requested.replace(true) {
            let timeout =
                Duration::from_secs_f64(self.config.force_shutdown_timeout_sec);
            self.stop_deadline.set(Some(Instant::now() + timeout));
            tracing::debug!(?timeout, "graceful stop requested");
        }
    }

    pub(crate) fn request_force_stop(&self) {
        tracing::debug!("forced stop requested");
        self.force_stop_requested.set(true);
    }

    pub(crate) fn current_tick(&self) -> u64 { self.tick_counter.get() }

    fn tick(&self) {
        let mut progressed = false;

        progressed |= self.drain_next_tick();
        progressed |= self.run_tasks();
        progressed |= self.run_http();
        progressed |= self.run_file_queue();
        progressed |= self.run_file_watchers();
        progressed |= self.run_db();
        progressed |= self.run_timers();

        if !self.force_stop_requested.get() {
            let budget = self.compute_wait_budget();
            progressed |= self.poll_and_dispatch(budget);
            progressed |= self.drain_deferred();

            if !progressed && budget.is_zero() {
                // Nothing moved and the poll did not wait: yield the CPU.
                std::thread::sleep(Duration::from_millis(self.config.idle_sleep_ms));
            }
        }

        self.tick_counter.set(self.tick_counter.get() + 1);
        self.sweep_unhandled();
    }

    fn drain_next_tick(&self) -> bool {
        let cap = self.config.next_tick_cap;
        let mut ran = 0;
        while ran < cap {
            let job = self.tick_queue.borrow_mut().pop_next_tick();
            let Some(job) = job else { break };
            ran += 1;
            if let Err(error) = job() {
                self.report_error("next-tick callback failed", Some(&error));
            }
        }
        ran > 0
    }

    fn drain_deferred(&self) -> bool {
        let cap = self.config.next_tick_cap;
        let mut ran = 0;
        while ran < cap {
            let job = self.tick_queue.borrow_mut().pop_deferred();
            let Some(job) = job else { break };
            ran += 1;
            if let Err(error) = job() {
                self.report_error("deferred callback failed", Some(&error));
            }
        }
        ran > 0
    }

    fn run_tasks(&self) -> bool {
        let ready_queue = self.tasks.borrow().ready_queue();
        let mut progressed = false;

        // Start every NEW task, FIFO; tasks spawned mid-start are included.
        loop {
            let cell = self.tasks.borrow_mut().take_startable();
            let Some(cell) = cell else { break };
            progressed = true;
            if let Some(cell) = TaskManager::poll_cell(&ready_queue, cell) {
                self.tasks.borrow_mut().park(cell);
            }
        }

        // Resume tasks whose completion source fired their waker.
        loop {
            let cell = self.tasks.borrow_mut().take_ready();
            let Some(cell) = cell else { break };
            progressed = true;
            if let Some(cell) = TaskManager::poll_cell(&ready_queue, cell) {
                self.tasks.borrow_mut().park(cell);
            }
        }

        progressed
    }

    fn run_http(&self) -> bool {
        let (progressed, completions) = self.http.borrow_mut().collect_progress();
        let any_completions = !completions.is_empty();
        for (cb, outcome) in completions {
            cb(outcome);
        }
        progressed || any_completions
    }

    fn run_file_queue(&self) -> bool {
        let item = self.files.borrow_mut().pop_item();
        let Some(item) = item else { return false };
        let outcome = execute_slice(item, self.config.file_chunk_bytes);
        if let Some((cb, result)) = outcome.completion {
            cb(result);
        }
        if let Some(op) = outcome.requeue {
            self.files.borrow_mut().requeue_front(op);
        }
        true
    }

    fn run_file_watchers(&self) -> bool {
        let now = Instant::now();
        let due = self.file_watchers.borrow_mut().take_due(now);
        if due.is_empty() {
            return false;
        }
        let mut progressed = false;
        for (id, mut entry) in due {
            if let Some(event) = entry.check(now) {
                progressed = true;
                tracing::debug!(watcher = %id, %event, path = %entry.path().display(), "file watcher fired");
                if let Err(error) = entry.fire(event) {
                    self.report_error("file watcher callback failed", Some(&error));
                }
            }
            self.file_watchers.borrow_mut().restore(id, entry);
        }
        progressed
    }

    fn run_db(&self) -> bool {
        let (progressed, completions) = match self.db.borrow_mut().as_mut() {
            Some(queue) => queue.run_slice(),
            None => return false,
        };
        for (cb, result) in completions {
            cb(result);
        }
        progressed
    }

    fn run_timers(&self) -> bool {
        let now = Instant::now();
        let batch = self.timers.borrow_mut().take_due(now);
        if batch.is_empty() {
            return false;
        }
        for mut due_timer in batch {
            if let Err(error) = due_timer.fire() {
                self.report_error("timer callback failed", Some(&error));
            }
            if due_timer.is_periodic() {
                self.timers.borrow_mut().reschedule(due_timer);
            }
        }
        true
    }

    /// How long the reactor may block. Zero whenever work is immediately
    /// pending; otherwise bounded by the earliest timer and a per-work-class
    /// cap (HTTP transfers need frequent stepping, watchers do not).
    fn compute_wait_budget(&self) -> Duration {
        let immediate = {
            !self.tick_queue.borrow().is_empty()
                || self.tasks.borrow().has_startable()
                || self.tasks.borrow().has_woken()
                || !self.files.borrow().is_empty()
                || self
                    .db
                    .borrow()
                    .as_ref()
                    .is_some_and(|queue| !queue.is_empty())
        };
        if immediate {
            return Duration::ZERO;
        }

        let now = Instant::now();
        let mut budget: Option<Duration> = self.timers.borrow_mut().next_delay(now);
        let cap = |limit: Duration, budget: &mut Option<Duration>| {
            *budget = Some(budget.map_or(limit, |current| current.min(limit)));
        };
        if self.http.borrow().has_work() {
            cap(HTTP_ACTIVE_BUDGET, &mut budget);
        }
        if !self.file_watchers.borrow().is_empty() {
            cap(WATCH_BUDGET, &mut budget);
        }
        if budget.is_none() && !self.streams.borrow().is_empty() {
            cap(WATCH_BUDGET, &mut budget);
        }
        budget.unwrap_or(Duration::ZERO)
    }

    fn poll_and_dispatch(&self, budget: Duration) -> bool {
        let (read_set, write_set) = self.streams.borrow().interest_sets();
        if read_set.is_empty() && write_set.is_empty() && budget.is_zero() {
            return false;
        }
        let ready = match self
            .reactor
            .borrow_mut()
            .poll(&read_set, &write_set, budget)
        {
            Ok(ready) => ready,
            Err(error) => {
                self.report_error(
                    "reactor poll failed",
                    Some(&LoopError::io(error.to_string())),
                );
                return false;
            }
        };
        if ready.is_empty() {
            return false;
        }
        let fired = self.streams.borrow_mut().take_ready(&ready);
        let any_fired = !fired.is_empty();
        for watcher in fired {
            if let Err(error) = watcher.fire() {
                self.report_error("stream watcher callback failed", Some(&error));
            }
        }
        any_fired
    }

    fn sweep_unhandled(&self) {
        let current = self.tick_counter.get();
        let mut to_report = vec![];
        self.unhandled.borrow_mut().retain(|entry| {
            if entry.handled.get() {
                return false;
            }
            // One full tick of grace after the tick that saw the
            // rejection, so late handler attachment stays possible.
            if current > entry.tick + 1 {
                to_report.push(entry.reason.clone());
                return false;
            }
            true
        });
        for reason in to_report {
            self.report_error("unhandled promise rejection", Some(&reason));
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        !self.tasks.borrow().has_active()
            && self.timers.borrow().is_empty()
            && !self.http.borrow().has_work()
            && self.files.borrow().is_empty()
            && self.file_watchers.borrow().is_empty()
            && self
                .db
                .borrow()
                .as_ref()
                .is_none_or(|queue| queue.is_empty())
            && self.streams.borrow().is_empty()
            && self.tick_queue.borrow().is_empty()
            && self.unhandled.borrow().is_empty()
    }

    /// Forced shutdown: clear every manager, reject every outstanding
    /// completion with [`LoopError::Shutdown`] (HTTP callbacks get their
    /// literal shutdown outcome), and give the rejection continuations one
    /// final micro-task drain.
    fn shut_down(&self) {
        tracing::debug!("forced shutdown: clearing managers");

        let timer_aborts = self.timers.borrow_mut().drain_for_shutdown();
        let stream_aborts = self.streams.borrow_mut().drain_for_shutdown();
        let task_aborts = self.tasks.borrow_mut().drain_for_shutdown();
        let file_callbacks = self.files.borrow_mut().drain_for_shutdown();
        let http_completions = self.http.borrow_mut().drain_for_shutdown();
        let db_callbacks = match self.db.borrow_mut().as_mut() {
            Some(queue) => queue.drain_for_shutdown(),
            None => vec![],
        };
        self.file_watchers.borrow_mut().clear();

        for abort in timer_aborts.into_iter().chain(stream_aborts).chain(task_aborts) {
            abort();
        }
        for cb in file_callbacks {
            cb(Err(LoopError::Shutdown));
        }
        for (cb, outcome) in http_completions {
            cb(outcome);
        }
        for cb in db_callbacks {
            cb(Err(LoopError::Shutdown));
        }

        // Let the rejection continuations observe their promises, then drop
        // whatever they re-enqueued.
        self.drain_next_tick();
        self.drain_deferred();
        self.tick_queue.borrow_mut().clear();
        self.tick_counter.set(self.tick_counter.get() + 1);
    }

    pub(crate) fn stats(&self) -> super::stats::LoopStats {
        super::stats::LoopStats {
            tick: self.tick_counter.get(),
            active_tasks: self.tasks.borrow().active_count(),
            pending_timers: self.timers.borrow().len(),
            http_active: self.http.borrow().active_count(),
            http_queued: self.http.borrow().queued_count(),
            file_ops_pending: self.files.borrow().len(),
            file_watchers: self.file_watchers.borrow().len(),
            stream_watchers: self.streams.borrow().len(),
            db_ops_pending: self
                .db
                .borrow()
                .as_ref()
                .map_or(0, |queue| queue.len()),
            next_tick_queued: self.tick_queue.borrow().next_tick_len(),
            deferred_queued: self.tick_queue.borrow().deferred_len(),
        }
    }
}

/// A singleton per construction; tests gain isolation by constructing fresh
/// loops. `run` installs the loop as the thread's current loop for the
/// duration, so [`LoopHandle::current`] works from inside tasks.
///
/// [`LoopHandle::current`]: super::handle::LoopHandle::current
pub struct EventLoop {
    core: Rc<LoopCore>,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop").field("core", &self.core).finish()
    }
}

impl EventLoop {
    /// Build with the given configuration and the portable `poll(2)`
    /// reactor backend.
    pub fn new(config: RuntimeConfig) -> Result<Self, LoopError> {
        Self::with_reactor(config, Box::new(PollReactor::new()))
    }

    /// Defaults everywhere; the common entry point for tests.
    pub fn new_default() -> Result<Self, LoopError> {
        Self::new(RuntimeConfig::default())
    }

    /// Build with an explicit reactor backend (e.g. [`MioReactor`]).
    ///
    /// [`MioReactor`]: crate::reactor::MioReactor
    pub fn with_reactor(
        config: RuntimeConfig,
        reactor: Box<dyn Reactor>,
    ) -> Result<Self, LoopError> {
        config.validate()?;
        Ok(EventLoop {
            core: Rc::new(LoopCore::new(config, reactor)),
        })
    }

    #[must_use]
    pub fn handle(&self) -> super::handle::LoopHandle {
        super::handle::LoopHandle::new(self.core.clone())
    }

    /// Replace the error sink (callback failures, watcher errors, unhandled
    /// rejections). The default writes to stderr.
    pub fn set_error_sink(&self, sink: ErrorSink) { self.core.set_error_sink(sink); }

    /// Drive the loop until idle (or stopped), starting from the given root
    /// routine. Returns the root's result; a forced shutdown surfaces as
    /// [`LoopError::Shutdown`].
    pub fn run<T, F>(&self, root: F) -> Result<T, LoopError>
    where
        T: Clone + 'static,
        F: Future<Output = Result<T, LoopError>> + 'static,
    {
        let _guard = super::handle::CurrentLoopGuard::enter(&self.core);
        let handle = self.handle();
        let root_promise = handle.spawn(root);
        // The root's settlement is returned below; it is never "unhandled".
        root_promise.mark_handled();

        loop {
            self.core.tick();

            if self.core.force_stop_requested.get() {
                self.core.shut_down();
                break;
            }
            if self.core.is_idle() {
                break;
            }
            if self.core.stop_requested.get()
                && let Some(deadline) = self.core.stop_deadline.get()
                && Instant::now() >= deadline
            {
                tracing::warn!("graceful stop timed out, escalating to forced shutdown");
                self.core.shut_down();
                break;
            }
        }

        root_promise.result().unwrap_or(Err(LoopError::Shutdown))
    }
}
