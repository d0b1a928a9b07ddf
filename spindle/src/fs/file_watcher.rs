// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words mtime inotify

//! Polling file watchers.
//!
//! Watcher semantics are deliberately "eventually detects change within one
//! poll interval": each due watcher runs a stat and compares against its
//! last snapshot. A change in size, or in mtime by more than the filesystem
//! precision epsilon (1 ms), fires `modified`; an existing-to-missing
//! transition fires `deleted` exactly once; missing-to-existing fires
//! `created`. Precise inotify/FSEvents integration is an optional backend,
//! not this one.

use crate::error::LoopError;
use std::{collections::HashMap,
          fs,
          path::{Path, PathBuf},
          time::{Duration, Instant, SystemTime}};
use strum_macros::Display;

/// Filesystem mtime precision; deltas at or below this are noise.
pub const MTIME_EPSILON: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileWatcherId(u64);

impl FileWatcherId {
    #[must_use]
    pub fn raw(&self) -> u64 { self.0 }
}

impl std::fmt::Display for FileWatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file-watcher#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FileEvent {
    Created,
    Modified,
    Deleted,
}

/// Change callback: `(event, path)`. Errors go to the error sink.
pub type WatchCallback = Box<dyn FnMut(FileEvent, &Path) -> Result<(), LoopError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    mtime: Option<SystemTime>,
    size: u64,
}

fn take_snapshot(path: &Path) -> Option<Snapshot> {
    fs::metadata(path).ok().map(|metadata| Snapshot {
        mtime: metadata.modified().ok(),
        size: metadata.len(),
    })
}

fn mtime_changed(old: Option<SystemTime>, new: Option<SystemTime>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => {
            let delta = new
                .duration_since(old)
                .or_else(|_| old.duration_since(new))
                .unwrap_or(Duration::ZERO);
            delta > MTIME_EPSILON
        }
        (None, None) => false,
        _ => true,
    }
}

/// One registered watcher. Taken out of the set for dispatch (the callback
/// may add or remove watchers) and restored afterwards.
pub struct WatcherEntry {
    path: PathBuf,
    poll_interval: Duration,
    last_checked: Option<Instant>,
    snapshot: Option<Snapshot>,
    cb: WatchCallback,
}

impl std::fmt::Debug for WatcherEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherEntry")
            .field("path", &self.path)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl WatcherEntry {
    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// Stat the path and compare against the last snapshot. Updates the
    /// snapshot and returns the event to fire, if any.
    pub fn check(&mut self, now: Instant) -> Option<FileEvent> {
        self.last_checked = Some(now);
        let current = take_snapshot(&self.path);
        let event = match (&self.snapshot, &current) {
            (None, Some(_)) => Some(FileEvent::Created),
            (Some(_), None) => Some(FileEvent::Deleted),
            (Some(old), Some(new)) => {
                if old.size != new.size || mtime_changed(old.mtime, new.mtime) {
                    Some(FileEvent::Modified)
                } else {
                    None
                }
            }
            (None, None) => None,
        };
        self.snapshot = current;
        event
    }

    pub fn fire(&mut self, event: FileEvent) -> Result<(), LoopError> {
        let path = self.path.clone();
        (self.cb)(event, &path)
    }
}

#[derive(Default)]
pub struct FileWatcherSet {
    entries: HashMap<u64, WatcherEntry>,
    /// Registration order; polling walks this so firing order is stable.
    order: Vec<u64>,
    next_id: u64,
}

impl std::fmt::Debug for FileWatcherSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcherSet")
            .field("watchers", &self.order.len())
            .finish()
    }
}

impl FileWatcherSet {
    /// Register a watcher. The initial snapshot is taken immediately, so
    /// only changes after registration fire.
    pub fn add(
        &mut self,
        path: impl Into<PathBuf>,
        poll_interval: Duration,
        cb: impl FnMut(FileEvent, &Path) -> Result<(), LoopError> + 'static,
    ) -> FileWatcherId {
        self.next_id += 1;
        let id = self.next_id;
        let path = path.into();
        let snapshot = take_snapshot(&path);
        tracing::trace!(watcher = id, path = %path.display(), "added file watcher");
        self.entries.insert(
            id,
            WatcherEntry {
                path,
                poll_interval,
                last_checked: None,
                snapshot,
                cb: Box::new(cb),
            },
        );
        self.order.push(id);
        FileWatcherId(id)
    }

    pub fn remove(&mut self, id: FileWatcherId) -> bool {
        self.order.retain(|entry_id| *entry_id != id.0);
        self.entries.remove(&id.0).is_some()
    }

    /// Take every watcher whose poll interval has elapsed, in registration
    /// order. The caller runs the stat + callback with the set borrow
    /// released, then restores.
    pub fn take_due(&mut self, now: Instant) -> Vec<(FileWatcherId, WatcherEntry)> {
        let due_ids: Vec<u64> = self
            .order
            .iter()
            .filter(|id| {
                self.entries.get(id).is_some_and(|entry| {
                    entry
                        .last_checked
                        .is_none_or(|last| now - last >= entry.poll_interval)
                })
            })
            .copied()
            .collect();
        due_ids
            .into_iter()
            .filter_map(|id| {
                self.entries
                    .remove(&id)
                    .map(|entry| (FileWatcherId(id), entry))
            })
            .collect()
    }

    /// Put a dispatched watcher back, unless it was removed mid-dispatch.
    pub fn restore(&mut self, id: FileWatcherId, entry: WatcherEntry) {
        if self.order.contains(&id.0) {
            self.entries.insert(id.0, entry);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize { self.order.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
