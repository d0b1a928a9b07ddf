// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Read/write watchers over raw descriptors.
//!
//! Watchers are one-shot, semaphore-style: delivering readiness removes the
//! watcher, and a caller that wants sustained notification re-registers from
//! inside its callback. When one poll reports both directions, write-ready
//! callbacks fire before read-ready ones, so in-flight senders unblock
//! before new receivers consume buffer capacity.

use crate::{common::sizes::InlineVec, error::LoopError, reactor::ReadyFds};
use std::os::unix::io::RawFd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    #[must_use]
    pub fn raw(&self) -> u64 { self.0 }
}

impl std::fmt::Display for WatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watcher#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// One-shot readiness callback. Receives the ready descriptor; failures go
/// to the error sink.
pub type WatcherCallback = Box<dyn FnOnce(RawFd) -> Result<(), LoopError>>;

struct StreamWatcher {
    id: u64,
    fd: RawFd,
    cb: WatcherCallback,
    /// Shutdown path: reject whatever promise rides on this watcher.
    abort: Option<Box<dyn FnOnce()>>,
}

impl std::fmt::Debug for StreamWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWatcher")
            .field("id", &self.id)
            .field("fd", &self.fd)
            .finish_non_exhaustive()
    }
}

/// A watcher whose descriptor came back ready. The loop core runs
/// [`fire`](FiredWatcher::fire) with the manager borrow released.
pub struct FiredWatcher {
    pub id: WatcherId,
    pub fd: RawFd,
    pub direction: Direction,
    cb: WatcherCallback,
}

impl std::fmt::Debug for FiredWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiredWatcher")
            .field("id", &self.id)
            .field("fd", &self.fd)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

impl FiredWatcher {
    pub fn fire(self) -> Result<(), LoopError> { (self.cb)(self.fd) }
}

#[derive(Default)]
pub struct StreamManager {
    read_watchers: Vec<StreamWatcher>,
    write_watchers: Vec<StreamWatcher>,
    next_id: u64,
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("read_watchers", &self.read_watchers.len())
            .field("write_watchers", &self.write_watchers.len())
            .finish()
    }
}

impl StreamManager {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_read(
        &mut self,
        fd: RawFd,
        cb: impl FnOnce(RawFd) -> Result<(), LoopError> + 'static,
    ) -> WatcherId {
        self.add_read_with_abort(fd, cb, None)
    }

    pub fn add_read_with_abort(
        &mut self,
        fd: RawFd,
        cb: impl FnOnce(RawFd) -> Result<(), LoopError> + 'static,
        abort: Option<Box<dyn FnOnce()>>,
    ) -> WatcherId {
        let id = self.allocate_id();
        self.read_watchers.push(StreamWatcher {
            id,
            fd,
            cb: Box::new(cb),
            abort,
        });
        tracing::trace!(watcher = id, fd, "added read watcher");
        WatcherId(id)
    }

    pub fn add_write(
        &mut self,
        fd: RawFd,
        cb: impl FnOnce(RawFd) -> Result<(), LoopError> + 'static,
    ) -> WatcherId {
        self.add_write_with_abort(fd, cb, None)
    }

    pub fn add_write_with_abort(
        &mut self,
        fd: RawFd,
        cb: impl FnOnce(RawFd) -> Result<(), LoopError> + 'static,
        abort: Option<Box<dyn FnOnce()>>,
    ) -> WatcherId {
        let id = self.allocate_id();
        self.write_watchers.push(StreamWatcher {
            id,
            fd,
            cb: Box::new(cb),
            abort,
        });
        tracing::trace!(watcher = id, fd, "added write watcher");
        WatcherId(id)
    }

    /// Returns `true` iff the watcher was registered.
    pub fn remove(&mut self, id: WatcherId) -> bool {
        let before = self.read_watchers.len() + self.write_watchers.len();
        self.read_watchers.retain(|watcher| watcher.id != id.0);
        self.write_watchers.retain(|watcher| watcher.id != id.0);
        before != self.read_watchers.len() + self.write_watchers.len()
    }

    /// Drop every watcher on the given descriptor (both directions).
    /// Returns how many were removed.
    pub fn clear_fd(&mut self, fd: RawFd) -> usize {
        let before = self.read_watchers.len() + self.write_watchers.len();
        self.read_watchers.retain(|watcher| watcher.fd != fd);
        self.write_watchers.retain(|watcher| watcher.fd != fd);
        before - (self.read_watchers.len() + self.write_watchers.len())
    }

    /// Deduplicated descriptor sets for the reactor call.
    #[must_use]
    pub fn interest_sets(&self) -> (InlineVec<RawFd>, InlineVec<RawFd>) {
        let mut read: InlineVec<RawFd> = InlineVec::new();
        for watcher in &self.read_watchers {
            if !read.contains(&watcher.fd) {
                read.push(watcher.fd);
            }
        }
        let mut write: InlineVec<RawFd> = InlineVec::new();
        for watcher in &self.write_watchers {
            if !write.contains(&watcher.fd) {
                write.push(watcher.fd);
            }
        }
        (read, write)
    }

    /// Remove and return the watchers whose descriptors are ready: write
    /// direction first, then read, each in registration order.
    pub fn take_ready(&mut self, ready: &ReadyFds) -> Vec<FiredWatcher> {
        let mut fired = vec![];

        let mut remaining_write = vec![];
        for watcher in self.write_watchers.drain(..) {
            if ready.write.contains(&watcher.fd) {
                fired.push(FiredWatcher {
                    id: WatcherId(watcher.id),
                    fd: watcher.fd,
                    direction: Direction::Write,
                    cb: watcher.cb,
                });
            } else {
                remaining_write.push(watcher);
            }
        }
        self.write_watchers = remaining_write;

        let mut remaining_read = vec![];
        for watcher in self.read_watchers.drain(..) {
            if ready.read.contains(&watcher.fd) {
                fired.push(FiredWatcher {
                    id: WatcherId(watcher.id),
                    fd: watcher.fd,
                    direction: Direction::Read,
                    cb: watcher.cb,
                });
            } else {
                remaining_read.push(watcher);
            }
        }
        self.read_watchers = remaining_read;

        fired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_watchers.len() + self.write_watchers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Forced shutdown: drop every watcher and collect abort closures.
    pub fn drain_for_shutdown(&mut self) -> Vec<Box<dyn FnOnce()>> {
        self.read_watchers
            .drain(..)
            .chain(self.write_watchers.drain(..))
            .filter_map(|watcher| watcher.abort)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cb_ok;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, rc::Rc};

    fn ready(read: &[RawFd], write: &[RawFd]) -> ReadyFds {
        ReadyFds {
            read: read.iter().copied().collect(),
            write: write.iter().copied().collect(),
        }
    }

    #[test]
    fn test_write_fires_before_read() {
        let mut manager = StreamManager::default();
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(vec![]));

        let order_read = order.clone();
        manager.add_read(3, move |_| {
            order_read.borrow_mut().push("read");
            cb_ok!()
        });
        let order_write = order.clone();
        manager.add_write(3, move |_| {
            order_write.borrow_mut().push("write");
            cb_ok!()
        });

        let fired = manager.take_ready(&ready(&[3], &[3]));
        for watcher in fired {
            watcher.fire().unwrap();
        }
        assert_eq!(*order.borrow(), vec!["write", "read"]);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_watchers_are_one_shot() {
        let mut manager = StreamManager::default();
        manager.add_read(5, |_| cb_ok!());

        let fired = manager.take_ready(&ready(&[5], &[]));
        assert_eq!(fired.len(), 1);
        assert!(manager.is_empty());

        // A second readiness report finds no watcher.
        let fired = manager.take_ready(&ready(&[5], &[]));
        assert!(fired.is_empty());
    }

    #[test]
    fn test_not_ready_watchers_are_kept() {
        let mut manager = StreamManager::default();
        manager.add_read(5, |_| cb_ok!());
        manager.add_read(6, |_| cb_ok!());

        let fired = manager.take_ready(&ready(&[6], &[]));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].fd, 6);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_and_clear_fd() {
        let mut manager = StreamManager::default();
        let id = manager.add_read(5, |_| cb_ok!());
        manager.add_write(5, |_| cb_ok!());
        manager.add_read(7, |_| cb_ok!());

        assert!(manager.remove(id));
        assert!(!manager.remove(id));
        assert_eq!(manager.clear_fd(5), 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_interest_sets_deduplicate() {
        let mut manager = StreamManager::default();
        manager.add_read(5, |_| cb_ok!());
        manager.add_read(5, |_| cb_ok!());
        manager.add_write(6, |_| cb_ok!());

        let (read, write) = manager.interest_sets();
        assert_eq!(read.as_slice(), &[5]);
        assert_eq!(write.as_slice(), &[6]);
    }

    #[test]
    fn test_duplicate_fd_watchers_all_fire() {
        let mut manager = StreamManager::default();
        let count = Rc::new(RefCell::new(0));
        for _ in 0..2 {
            let count = count.clone();
            manager.add_read(5, move |_| {
                *count.borrow_mut() += 1;
                cb_ok!()
            });
        }

        for watcher in manager.take_ready(&ready(&[5], &[])) {
            watcher.fire().unwrap();
        }
        assert_eq!(*count.borrow(), 2);
    }
}
