// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Cooperative task cells over the language's compiled `async` state
//! machines.
//!
//! A task is created not-yet-started; the loop starts every NEW task in
//! FIFO order on the next tick. A pending poll suspends the task; the waker
//! installed during the poll re-queues the task id when the awaited promise
//! settles, so suspended tasks are resumed by their completion source rather
//! than by scanning.
//!
//! The waker side uses `Arc`/`Mutex` because the `Waker` contract demands
//! `Send + Sync` even though this runtime never leaves its thread.

use futures_util::{future::LocalBoxFuture, task::{waker, ArcWake}};
use std::{cell::Cell,
          collections::{HashMap, VecDeque},
          rc::Rc,
          sync::{Arc, Mutex},
          task::{Context, Poll}};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TaskState {
    New,
    Suspended,
    Completed,
    Failed,
}

/// One spawned task: the boxed future plus bookkeeping. The completion
/// promise is settled by the wrapper future the spawn call builds, which
/// also records Completed/Failed into `state`.
pub struct TaskCell {
    id: u64,
    future: LocalBoxFuture<'static, ()>,
    state: Rc<Cell<TaskState>>,
    /// Shutdown path: reject the task's completion promise.
    abort: Option<Box<dyn FnOnce()>>,
}

impl std::fmt::Debug for TaskCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCell")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

struct TaskWaker {
    id: u64,
    ready: Arc<Mutex<VecDeque<u64>>>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Ok(mut ready) = arc_self.ready.lock() {
            ready.push_back(arc_self.id);
        }
    }
}

pub struct TaskManager {
    unstarted: VecDeque<TaskCell>,
    suspended: HashMap<u64, TaskCell>,
    ready: Arc<Mutex<VecDeque<u64>>>,
    next_id: u64,
}

impl Default for TaskManager {
    fn default() -> Self {
        TaskManager {
            unstarted: VecDeque::new(),
            suspended: HashMap::new(),
            ready: Arc::new(Mutex::new(VecDeque::new())),
            next_id: 0,
        }
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("unstarted", &self.unstarted.len())
            .field("suspended", &self.suspended.len())
            .finish()
    }
}

impl TaskManager {
    /// Queue a task for its first poll on the next tick. The caller builds
    /// the wrapper future that settles the completion promise; `abort` is
    /// the forced-shutdown rejection for that same promise.
    pub fn spawn(
        &mut self,
        future: LocalBoxFuture<'static, ()>,
        state: Rc<Cell<TaskState>>,
        abort: Option<Box<dyn FnOnce()>>,
    ) -> TaskId {
        self.next_id += 1;
        let id = self.next_id;
        self.unstarted.push_back(TaskCell {
            id,
            future,
            state,
            abort,
        });
        tracing::trace!(task = %TaskId(id), "spawned task");
        TaskId(id)
    }

    /// Next NEW task, FIFO. The loop polls it with the manager borrow
    /// released and parks it back if it suspends.
    pub fn take_startable(&mut self) -> Option<TaskCell> { self.unstarted.pop_front() }

    /// Next task whose waker fired. Ids without a suspended cell (already
    /// completed, or woken twice) are skipped.
    pub fn take_ready(&mut self) -> Option<TaskCell> {
        loop {
            let id = {
                let Ok(mut ready) = self.ready.lock() else {
                    return None;
                };
                ready.pop_front()?
            };
            if let Some(cell) = self.suspended.remove(&id) {
                return Some(cell);
            }
        }
    }

    /// Park a task that polled `Pending`.
    pub fn park(&mut self, cell: TaskCell) {
        cell.state.set(TaskState::Suspended);
        self.suspended.insert(cell.id, cell);
    }

    /// Poll one task cell to its next suspension point. Returns the cell
    /// back when it suspended, `None` when it terminated.
    pub fn poll_cell(ready: &Arc<Mutex<VecDeque<u64>>>, mut cell: TaskCell) -> Option<TaskCell> {
        let task_waker = waker(Arc::new(TaskWaker {
            id: cell.id,
            ready: ready.clone(),
        }));
        let mut cx = Context::from_waker(&task_waker);
        match cell.future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                tracing::trace!(task = %TaskId(cell.id), state = %cell.state.get(), "task terminated");
                None
            }
            Poll::Pending => Some(cell),
        }
    }

    /// Shared handle to the ready queue for [`poll_cell`](Self::poll_cell).
    #[must_use]
    pub fn ready_queue(&self) -> Arc<Mutex<VecDeque<u64>>> { self.ready.clone() }

    /// Whether any NEW task awaits its first poll.
    #[must_use]
    pub fn has_startable(&self) -> bool { !self.unstarted.is_empty() }

    /// True while any task has not terminated.
    #[must_use]
    pub fn has_active(&self) -> bool {
        !self.unstarted.is_empty() || !self.suspended.is_empty()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.unstarted.len() + self.suspended.len()
    }

    /// Whether any waker has fired since the last drain.
    #[must_use]
    pub fn has_woken(&self) -> bool {
        self.ready
            .lock()
            .map(|ready| !ready.is_empty())
            .unwrap_or(false)
    }

    /// Forced shutdown: drop every task and collect the abort closures that
    /// reject their completion promises.
    pub fn drain_for_shutdown(&mut self) -> Vec<Box<dyn FnOnce()>> {
        let mut aborts = vec![];
        for cell in self
            .unstarted
            .drain(..)
            .chain(self.suspended.drain().map(|(_, cell)| cell))
        {
            if let Some(abort) = cell.abort {
                aborts.push(abort);
            }
        }
        if let Ok(mut ready) = self.ready.lock() {
            ready.clear();
        }
        aborts
    }
}
