// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! One-shot and periodic timers over the deadline backend.
//!
//! Periodic timers reschedule by `previous due + interval` (not `now +
//! interval`) so cadence is preserved under modest overruns. The manager is
//! driven with a take/reschedule split: the loop core takes the due batch,
//! releases the manager borrow, runs the callbacks, then hands periodic
//! entries back. That way a timer callback can add or cancel timers without
//! re-entering a held borrow.

use crate::{common::sizes::InlineVec,
            error::LoopError,
            time::deadline_heap::{DeadlineHeap, TimerBackend}};
use std::{collections::{HashMap, HashSet},
          time::{Duration, Instant}};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    #[must_use]
    pub fn raw(&self) -> u64 { self.0 }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Timer callbacks report failures as values; the loop routes them to the
/// error sink. They never abort the tick loop.
pub type TimerCallback = Box<dyn FnMut() -> Result<(), LoopError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    OneShot,
    Periodic {
        interval: Duration,
        max_executions: Option<u32>,
        executions: u32,
    },
}

struct TimerEntry {
    kind: TimerKind,
    due: Instant,
    cb: TimerCallback,
    /// Invoked instead of `cb` when the loop is forced to stop, so a
    /// promise riding on this timer can be rejected rather than leaked.
    abort: Option<Box<dyn FnOnce()>>,
}

/// A timer popped from the heap, ready to fire. The loop core runs
/// [`fire`](DueTimer::fire) with the manager borrow released, then returns
/// periodic entries via [`TimerManager::reschedule`].
pub struct DueTimer {
    id: u64,
    due: Instant,
    kind: TimerKind,
    cb: TimerCallback,
    abort: Option<Box<dyn FnOnce()>>,
}

impl std::fmt::Debug for DueTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DueTimer")
            .field("id", &self.id)
            .field("due", &self.due)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl DueTimer {
    pub fn fire(&mut self) -> Result<(), LoopError> { (self.cb)() }

    #[must_use]
    pub fn id(&self) -> TimerId { TimerId(self.id) }

    #[must_use]
    pub fn is_periodic(&self) -> bool {
        matches!(self.kind, TimerKind::Periodic { .. })
    }
}

pub struct TimerManager<B: TimerBackend = DeadlineHeap> {
    backend: B,
    entries: HashMap<u64, TimerEntry>,
    /// Ids currently out with the loop core (between take and reschedule).
    in_flight: HashSet<u64>,
    /// In-flight ids cancelled mid-dispatch; reschedule drops them.
    cancelled_in_flight: HashSet<u64>,
    next_id: u64,
}

impl Default for TimerManager<DeadlineHeap> {
    fn default() -> Self { TimerManager::new(DeadlineHeap::new()) }
}

impl<B: TimerBackend> std::fmt::Debug for TimerManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerManager")
            .field("pending", &self.entries.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl<B: TimerBackend> TimerManager<B> {
    pub fn new(backend: B) -> Self {
        TimerManager {
            backend,
            entries: HashMap::new(),
            in_flight: HashSet::new(),
            cancelled_in_flight: HashSet::new(),
            next_id: 0,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_timer(
        &mut self,
        delay: Duration,
        cb: impl FnOnce() -> Result<(), LoopError> + 'static,
    ) -> TimerId {
        self.add_timer_with_abort(delay, cb, None)
    }

    /// One-shot timer with an optional shutdown path. `abort` runs instead
    /// of `cb` when the loop is forced to stop while the timer is pending.
    pub fn add_timer_with_abort(
        &mut self,
        delay: Duration,
        cb: impl FnOnce() -> Result<(), LoopError> + 'static,
        abort: Option<Box<dyn FnOnce()>>,
    ) -> TimerId {
        let id = self.allocate_id();
        let due = Instant::now() + delay;
        // Adapt the FnOnce to the stored FnMut shape. One-shot entries are
        // removed before firing, so the second-call arm is unreachable.
        let mut cb = Some(cb);
        let entry = TimerEntry {
            kind: TimerKind::OneShot,
            due,
            cb: Box::new(move || match cb.take() {
                Some(cb) => cb(),
                None => Ok(()),
            }),
            abort,
        };
        self.entries.insert(id, entry);
        self.backend.insert(id, due);
        tracing::trace!(timer = %TimerId(id), ?delay, "added one-shot timer");
        TimerId(id)
    }

    pub fn add_periodic(
        &mut self,
        interval: Duration,
        cb: impl FnMut() -> Result<(), LoopError> + 'static,
        max_executions: Option<u32>,
    ) -> TimerId {
        let id = self.allocate_id();
        let due = Instant::now() + interval;
        let entry = TimerEntry {
            kind: TimerKind::Periodic {
                interval,
                max_executions,
                executions: 0,
            },
            due,
            cb: Box::new(cb),
            abort: None,
        };
        self.entries.insert(id, entry);
        self.backend.insert(id, due);
        tracing::trace!(timer = %TimerId(id), ?interval, "added periodic timer");
        TimerId(id)
    }

    /// Returns `true` iff the timer was pending (or mid-dispatch). A timer
    /// cancelled before its due-time never fires again.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if self.entries.remove(&id.0).is_some() {
            self.backend.remove(id.0);
            tracing::trace!(timer = %id, "cancelled timer");
            return true;
        }
        if self.in_flight.contains(&id.0) {
            self.cancelled_in_flight.insert(id.0);
            tracing::trace!(timer = %id, "cancelled in-flight periodic timer");
            return true;
        }
        false
    }

    /// Pop every timer with `due <= now`, FIFO by heap order. The popped
    /// entries are marked in-flight until [`reschedule`](Self::reschedule)
    /// hands them back (periodic) or they are dropped (one-shot).
    pub fn take_due(&mut self, now: Instant) -> InlineVec<DueTimer> {
        let mut due_batch = InlineVec::new();
        while let Some(id) = self.backend.pop_due_before(now) {
            let Some(entry) = self.entries.remove(&id) else {
                continue;
            };
            if entry.kind != TimerKind::OneShot {
                self.in_flight.insert(id);
            }
            due_batch.push(DueTimer {
                id,
                due: entry.due,
                kind: entry.kind,
                cb: entry.cb,
                abort: entry.abort,
            });
        }
        due_batch
    }

    /// Hand a fired periodic timer back. Advances the cadence, enforces the
    /// max-execution count, and honors a cancellation that happened while
    /// the callback ran. One-shot timers are dropped silently.
    pub fn reschedule(&mut self, fired: DueTimer) {
        self.in_flight.remove(&fired.id);
        if self.cancelled_in_flight.remove(&fired.id) {
            return;
        }
        let TimerKind::Periodic {
            interval,
            max_executions,
            executions,
        } = fired.kind
        else {
            return;
        };
        let executions = executions + 1;
        if let Some(max) = max_executions
            && executions >= max
        {
            tracing::trace!(timer = %TimerId(fired.id), executions, "periodic timer exhausted");
            return;
        }
        // Cadence: next due derives from the previous due, not from now.
        let due = fired.due + interval;
        self.entries.insert(
            fired.id,
            TimerEntry {
                kind: TimerKind::Periodic {
                    interval,
                    max_executions,
                    executions,
                },
                due,
                cb: fired.cb,
                abort: fired.abort,
            },
        );
        self.backend.insert(fired.id, due);
    }

    /// `max(0, earliest due - now)`, or `None` when no timer is pending.
    pub fn next_delay(&mut self, now: Instant) -> Option<Duration> {
        self.backend
            .peek_due()
            .map(|due| due.saturating_duration_since(now))
    }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() + self.in_flight.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Forced shutdown: drop every pending timer and collect the abort
    /// closures so promises riding on timers get rejected.
    pub fn drain_for_shutdown(&mut self) -> Vec<Box<dyn FnOnce()>> {
        self.backend.clear();
        self.in_flight.clear();
        self.cancelled_in_flight.clear();
        self.entries
            .drain()
            .filter_map(|(_, entry)| entry.abort)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cb_ok;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, rc::Rc};

    fn drive<B: TimerBackend>(manager: &mut TimerManager<B>, now: Instant) -> usize {
        let batch = manager.take_due(now);
        let mut fired = 0;
        for mut due_timer in batch {
            due_timer.fire().unwrap();
            fired += 1;
            if due_timer.is_periodic() {
                manager.reschedule(due_timer);
            }
        }
        fired
    }

    #[test]
    fn test_one_shot_fires_once_and_is_removed() {
        let mut manager = TimerManager::default();
        let count = Rc::new(RefCell::new(0));
        let count_clone = count.clone();

        manager.add_timer(Duration::ZERO, move || {
            *count_clone.borrow_mut() += 1;
            cb_ok!()
        });

        let now = Instant::now() + Duration::from_millis(1);
        assert_eq!(drive(&mut manager, now), 1);
        assert_eq!(*count.borrow(), 1);
        assert!(manager.is_empty());
        assert_eq!(drive(&mut manager, now + Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut manager = TimerManager::default();
        let fired = Rc::new(RefCell::new(false));
        let fired_clone = fired.clone();

        let id = manager.add_timer(Duration::ZERO, move || {
            *fired_clone.borrow_mut() = true;
            cb_ok!()
        });

        assert!(manager.cancel(id));
        assert!(!manager.cancel(id));
        drive(&mut manager, Instant::now() + Duration::from_secs(1));
        assert!(!*fired.borrow());
    }

    #[test]
    fn test_periodic_cadence_derives_from_previous_due() {
        let mut manager = TimerManager::default();
        let count = Rc::new(RefCell::new(0));
        let count_clone = count.clone();
        let interval = Duration::from_millis(10);

        manager.add_periodic(
            interval,
            move || {
                *count_clone.borrow_mut() += 1;
                cb_ok!()
            },
            None,
        );

        // A late tick drains one execution, and the reschedule is relative
        // to the original due time, so the next one is due immediately too.
        let late = Instant::now() + Duration::from_millis(25);
        assert_eq!(drive(&mut manager, late), 1);
        assert_eq!(drive(&mut manager, late), 1);
        assert_eq!(*count.borrow(), 2);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_periodic_max_executions_removes_timer() {
        let mut manager = TimerManager::default();
        let count = Rc::new(RefCell::new(0));
        let count_clone = count.clone();

        manager.add_periodic(
            Duration::ZERO,
            move || {
                *count_clone.borrow_mut() += 1;
                cb_ok!()
            },
            Some(3),
        );

        let mut total = 0;
        for step in 1..=10 {
            total += drive(
                &mut manager,
                Instant::now() + Duration::from_millis(step),
            );
        }
        assert_eq!(total, 3);
        assert_eq!(*count.borrow(), 3);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_cancel_from_inside_callback_stops_periodic() {
        let manager = Rc::new(RefCell::new(TimerManager::default()));
        let count = Rc::new(RefCell::new(0));

        let id = {
            let count = count.clone();
            manager.borrow_mut().add_periodic(
                Duration::ZERO,
                move || {
                    *count.borrow_mut() += 1;
                    cb_ok!()
                },
                None,
            )
        };

        // Simulate the loop core: take, fire, cancel mid-dispatch, then
        // reschedule. The cancellation must win.
        let batch = manager
            .borrow_mut()
            .take_due(Instant::now() + Duration::from_millis(1));
        for mut due_timer in batch {
            due_timer.fire().unwrap();
            assert!(manager.borrow_mut().cancel(id));
            manager.borrow_mut().reschedule(due_timer);
        }
        assert_eq!(*count.borrow(), 1);
        assert!(manager.borrow().is_empty());
    }

    #[test]
    fn test_next_delay_clamps_to_zero() {
        let mut manager = TimerManager::default();
        manager.add_timer(Duration::ZERO, || cb_ok!());
        let late = Instant::now() + Duration::from_secs(1);
        assert_eq!(manager.next_delay(late), Some(Duration::ZERO));
        assert_eq!(
            TimerManager::default().next_delay(Instant::now()),
            None
        );
    }

    #[test]
    fn test_drain_for_shutdown_runs_nothing_but_returns_aborts() {
        let mut manager = TimerManager::default();
        manager.add_timer_with_abort(
            Duration::from_secs(10),
            || cb_ok!(),
            Some(Box::new(|| {})),
        );
        manager.add_timer(Duration::from_secs(10), || cb_ok!());

        let aborts = manager.drain_for_shutdown();
        assert_eq!(aborts.len(), 1);
        assert!(manager.is_empty());
    }
}
