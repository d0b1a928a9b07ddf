// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Filesystem operation records: the closed set of kinds, their option
//! records, and the result values handed to completion callbacks.

use crate::error::LoopError;
use std::{path::PathBuf, time::UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileOpId(u64);

impl FileOpId {
    pub(crate) fn new(raw: u64) -> Self { FileOpId(raw) }

    #[must_use]
    pub fn raw(&self) -> u64 { self.0 }
}

impl std::fmt::Display for FileOpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file-op#{}", self.0)
    }
}

/// Stat record delivered for [`FileOpKind::Stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Milliseconds since the Unix epoch; `None` when the platform cannot
    /// report a modification time.
    pub modified_ms: Option<u128>,
    pub is_dir: bool,
    pub is_file: bool,
    pub readonly: bool,
}

impl FileStat {
    pub(crate) fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        FileStat {
            size: metadata.len(),
            modified_ms: metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_millis()),
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
            readonly: metadata.permissions().readonly(),
        }
    }
}

/// Result value per kind: read yields bytes, write/append a byte count,
/// exists a bool, stat a record, and the directory/copy/rename kinds a
/// success flag.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOpResult {
    Bytes(Vec<u8>),
    Written(u64),
    Exists(bool),
    Stat(FileStat),
    Done(bool),
}

/// Completion callback: `Err` carries the failure, `Ok` the kind-specific
/// result value.
pub type FileCallback = Box<dyn FnOnce(Result<FileOpResult, LoopError>)>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Byte offset to start reading from.
    pub offset: Option<u64>,
    /// Upper bound on bytes read; `None` reads to EOF.
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Create missing parent directories first.
    pub create_dirs: bool,
    /// Write cooperatively in bounded chunks, one chunk per tick, honoring
    /// cancellation between chunks.
    pub use_streaming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MkdirOptions {
    #[default]
    CreateIntermediateDirectories,
    ParentMustExist,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveDirOptions {
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    pub overwrite: bool,
    pub use_streaming: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameOptions {
    pub overwrite: bool,
}

/// The ten operation kinds with their per-kind option records.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOpKind {
    Read {
        path: PathBuf,
        options: ReadOptions,
    },
    Write {
        path: PathBuf,
        payload: Vec<u8>,
        options: WriteOptions,
    },
    Append {
        path: PathBuf,
        payload: Vec<u8>,
    },
    Delete {
        path: PathBuf,
    },
    Exists {
        path: PathBuf,
    },
    Stat {
        path: PathBuf,
    },
    Mkdir {
        path: PathBuf,
        options: MkdirOptions,
    },
    Rmdir {
        path: PathBuf,
        options: RemoveDirOptions,
    },
    Copy {
        from: PathBuf,
        to: PathBuf,
        options: CopyOptions,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        options: RenameOptions,
    },
}

impl FileOpKind {
    /// Short tag for trace output.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            FileOpKind::Read { .. } => "read",
            FileOpKind::Write { .. } => "write",
            FileOpKind::Append { .. } => "append",
            FileOpKind::Delete { .. } => "delete",
            FileOpKind::Exists { .. } => "exists",
            FileOpKind::Stat { .. } => "stat",
            FileOpKind::Mkdir { .. } => "mkdir",
            FileOpKind::Rmdir { .. } => "rmdir",
            FileOpKind::Copy { .. } => "copy",
            FileOpKind::Rename { .. } => "rename",
        }
    }
}
