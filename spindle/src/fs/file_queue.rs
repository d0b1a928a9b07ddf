// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Sequenced filesystem operations with a bounded work budget per tick.
//!
//! The queue executes one slice per tick: either a whole synchronous
//! operation or one bounded chunk of a streaming write/copy, which then
//! re-enqueues itself at the front until EOF so sequencing is preserved.
//! Cancellation is honored between chunks; a begun synchronous operation
//! runs to completion.

use crate::{error::LoopError,
            fs::file_op::{FileCallback, FileOpId, FileOpKind, FileOpResult,
                          FileStat, MkdirOptions}};
use std::{cell::Cell,
          collections::VecDeque,
          fs,
          fs::File,
          io::{Read, Seek, SeekFrom, Write},
          path::Path,
          rc::Rc};

pub struct QueuedFileOp {
    id: u64,
    kind: FileOpKind,
    cancelled: Rc<Cell<bool>>,
    cb: FileCallback,
}

impl std::fmt::Debug for QueuedFileOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedFileOp")
            .field("id", &self.id)
            .field("kind", &self.kind.tag())
            .finish_non_exhaustive()
    }
}

/// Mid-flight state of a cooperatively chunked write or copy.
pub struct StreamingFileOp {
    id: u64,
    state: StreamingState,
    cancelled: Rc<Cell<bool>>,
    cb: FileCallback,
}

enum StreamingState {
    Write {
        file: File,
        payload: Vec<u8>,
        written: usize,
    },
    Copy {
        src: File,
        dst: File,
        copied: u64,
    },
}

impl std::fmt::Debug for StreamingFileOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingFileOp")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// One unit of per-tick work.
#[derive(Debug)]
pub enum FileQueueItem {
    Sync(QueuedFileOp),
    Streaming(StreamingFileOp),
}

/// Outcome of executing one slice. `completion` invokes the callback (run
/// it with the manager borrow released); `requeue` goes back to the queue
/// front.
pub struct FileSliceOutcome {
    pub completion: Option<(FileCallback, Result<FileOpResult, LoopError>)>,
    pub requeue: Option<StreamingFileOp>,
}

impl std::fmt::Debug for FileSliceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSliceOutcome")
            .field("completed", &self.completion.is_some())
            .field("requeued", &self.requeue.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct FileQueue {
    queue: VecDeque<FileQueueItem>,
    next_id: u64,
}

impl std::fmt::Debug for FileQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileQueue")
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl FileQueue {
    /// Queue an operation. The shared `cancelled` flag belongs to the
    /// owning promise; a flagged operation is never executed.
    pub fn enqueue(
        &mut self,
        kind: FileOpKind,
        cancelled: Rc<Cell<bool>>,
        cb: FileCallback,
    ) -> FileOpId {
        self.next_id += 1;
        let id = self.next_id;
        tracing::trace!(op = id, kind = kind.tag(), "enqueued file operation");
        self.queue.push_back(FileQueueItem::Sync(QueuedFileOp {
            id,
            kind,
            cancelled,
            cb,
        }));
        FileOpId::new(id)
    }

    /// Pop the next non-cancelled item. Cancelled operations are discarded
    /// without executing.
    pub fn pop_item(&mut self) -> Option<FileQueueItem> {
        while let Some(item) = self.queue.pop_front() {
            let cancelled = match &item {
                FileQueueItem::Sync(op) => op.cancelled.get(),
                FileQueueItem::Streaming(op) => op.cancelled.get(),
            };
            if cancelled {
                tracing::trace!("dropped cancelled file operation");
                continue;
            }
            return Some(item);
        }
        None
    }

    /// Put a partially streamed operation back at the queue front so the
    /// next tick continues it before anything newer runs.
    pub fn requeue_front(&mut self, op: StreamingFileOp) {
        self.queue.push_front(FileQueueItem::Streaming(op));
    }

    #[must_use]
    pub fn len(&self) -> usize { self.queue.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    /// Forced shutdown: drop the queue and collect the completion
    /// callbacks so their promises can be rejected.
    pub fn drain_for_shutdown(&mut self) -> Vec<FileCallback> {
        self.queue
            .drain(..)
            .map(|item| match item {
                FileQueueItem::Sync(op) => op.cb,
                FileQueueItem::Streaming(op) => op.cb,
            })
            .collect()
    }
}

/// Execute one queue slice. Runs with the [`FileQueue`] borrow released;
/// only the returned `requeue` re-enters the manager.
pub fn execute_slice(item: FileQueueItem, chunk_bytes: usize) -> FileSliceOutcome {
    match item {
        FileQueueItem::Sync(op) => execute_sync(op, chunk_bytes),
        FileQueueItem::Streaming(op) => advance_streaming(op, chunk_bytes),
    }
}

fn done(cb: FileCallback, result: Result<FileOpResult, LoopError>) -> FileSliceOutcome {
    FileSliceOutcome {
        completion: Some((cb, result)),
        requeue: None,
    }
}

fn execute_sync(op: QueuedFileOp, chunk_bytes: usize) -> FileSliceOutcome {
    let QueuedFileOp {
        id,
        kind,
        cancelled,
        cb,
    } = op;
    match kind {
        FileOpKind::Read { path, options } => {
            let result = read_file(&path, options.offset, options.max_bytes);
            done(cb, result)
        }
        FileOpKind::Write {
            path,
            payload,
            options,
        } => {
            if options.create_dirs
                && let Some(parent) = path.parent()
                && let Err(err) = fs::create_dir_all(parent)
            {
                return done(cb, Err(err.into()));
            }
            if options.use_streaming {
                match File::create(&path) {
                    Ok(file) => advance_streaming(
                        StreamingFileOp {
                            id,
                            state: StreamingState::Write {
                                file,
                                payload,
                                written: 0,
                            },
                            cancelled,
                            cb,
                        },
                        chunk_bytes,
                    ),
                    Err(err) => done(cb, Err(err.into())),
                }
            } else {
                let result = fs::write(&path, &payload)
                    .map(|()| FileOpResult::Written(payload.len() as u64))
                    .map_err(LoopError::from);
                done(cb, result)
            }
        }
        FileOpKind::Append { path, payload } => {
            let result = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut file| file.write_all(&payload))
                .map(|()| FileOpResult::Written(payload.len() as u64))
                .map_err(LoopError::from);
            done(cb, result)
        }
        FileOpKind::Delete { path } => {
            let result = fs::remove_file(&path)
                .map(|()| FileOpResult::Done(true))
                .map_err(LoopError::from);
            done(cb, result)
        }
        FileOpKind::Exists { path } => {
            done(cb, Ok(FileOpResult::Exists(path.exists())))
        }
        FileOpKind::Stat { path } => {
            let result = fs::metadata(&path)
                .map(|metadata| FileOpResult::Stat(FileStat::from_metadata(&metadata)))
                .map_err(LoopError::from);
            done(cb, result)
        }
        FileOpKind::Mkdir { path, options } => {
            let result = match options {
                MkdirOptions::CreateIntermediateDirectories => fs::create_dir_all(&path),
                MkdirOptions::ParentMustExist => fs::create_dir(&path),
            }
            .map(|()| FileOpResult::Done(true))
            .map_err(LoopError::from);
            done(cb, result)
        }
        FileOpKind::Rmdir { path, options } => {
            let result = if options.recursive {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_dir(&path)
            }
            .map(|()| FileOpResult::Done(true))
            .map_err(LoopError::from);
            done(cb, result)
        }
        FileOpKind::Copy { from, to, options } => {
            if !options.overwrite && to.exists() {
                return done(
                    cb,
                    Err(LoopError::io(format!(
                        "copy destination already exists: {}",
                        to.display()
                    ))),
                );
            }
            if options.use_streaming {
                let opened = File::open(&from)
                    .and_then(|src| File::create(&to).map(|dst| (src, dst)));
                match opened {
                    Ok((src, dst)) => advance_streaming(
                        StreamingFileOp {
                            id,
                            state: StreamingState::Copy {
                                src,
                                dst,
                                copied: 0,
                            },
                            cancelled,
                            cb,
                        },
                        chunk_bytes,
                    ),
                    Err(err) => done(cb, Err(err.into())),
                }
            } else {
                let result = fs::copy(&from, &to)
                    .map(|_| FileOpResult::Done(true))
                    .map_err(LoopError::from);
                done(cb, result)
            }
        }
        FileOpKind::Rename { from, to, options } => {
            if !options.overwrite && to.exists() {
                return done(
                    cb,
                    Err(LoopError::io(format!(
                        "rename destination already exists: {}",
                        to.display()
                    ))),
                );
            }
            let result = fs::rename(&from, &to)
                .map(|()| FileOpResult::Done(true))
                .map_err(LoopError::from);
            done(cb, result)
        }
    }
}

fn read_file(
    path: &Path,
    offset: Option<u64>,
    max_bytes: Option<usize>,
) -> Result<FileOpResult, LoopError> {
    let mut file = File::open(path)?;
    if let Some(offset) = offset {
        file.seek(SeekFrom::Start(offset))?;
    }
    let mut buffer = vec![];
    match max_bytes {
        Some(max) => {
            let mut bounded = file.take(max as u64);
            bounded.read_to_end(&mut buffer)?;
        }
        None => {
            file.read_to_end(&mut buffer)?;
        }
    }
    Ok(FileOpResult::Bytes(buffer))
}

/// Write or copy one bounded chunk. Cancellation between chunks lands here:
/// `pop_item` already dropped the operation if the flag was set before this
/// tick's slice.
fn advance_streaming(mut op: StreamingFileOp, chunk_bytes: usize) -> FileSliceOutcome {
    match &mut op.state {
        StreamingState::Write {
            file,
            payload,
            written,
        } => {
            let remaining = payload.len() - *written;
            let chunk = remaining.min(chunk_bytes);
            if let Err(err) = file.write_all(&payload[*written..*written + chunk]) {
                return done(op.cb, Err(err.into()));
            }
            *written += chunk;
            if *written >= payload.len() {
                let total = *written as u64;
                done(op.cb, Ok(FileOpResult::Written(total)))
            } else {
                tracing::trace!(op = op.id, written = *written, "streamed write chunk");
                FileSliceOutcome {
                    completion: None,
                    requeue: Some(op),
                }
            }
        }
        StreamingState::Copy { src, dst, copied } => {
            let mut buffer = vec![0u8; chunk_bytes];
            let read_bytes = match src.read(&mut buffer) {
                Ok(read_bytes) => read_bytes,
                Err(err) => return done(op.cb, Err(err.into())),
            };
            if read_bytes == 0 {
                return done(op.cb, Ok(FileOpResult::Done(true)));
            }
            if let Err(err) = dst.write_all(&buffer[..read_bytes]) {
                return done(op.cb, Err(err.into()));
            }
            *copied += read_bytes as u64;
            tracing::trace!(op = op.id, copied = *copied, "streamed copy chunk");
            FileSliceOutcome {
                completion: None,
                requeue: Some(op),
            }
        }
    }
}
