// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Disposable on-disk workspace for the file queue and watcher tests.
//!
//! Each fixture claims its own directory under the system temp root, named
//! by owning process id, a per-process sequence number, and a random tag,
//! so parallel `cargo test` binaries (and repeated runs of the same one)
//! never collide. The directory and everything in it is removed when the
//! fixture drops, including after a failed assertion.

use crate::error::LoopError;
use rand::Rng;
use std::{path::{Path, PathBuf},
          sync::atomic::{AtomicU64, Ordering}};

static NEXT_SCRATCH_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create a fresh, empty scratch directory.
    ///
    /// # Errors
    ///
    /// Fails with [`LoopError::Io`] when the directory cannot be created
    /// (permissions, full filesystem).
    pub fn new() -> Result<Self, LoopError> {
        let sequence = NEXT_SCRATCH_ID.fetch_add(1, Ordering::Relaxed);
        let tag: u32 = rand::rng().random();
        let root = std::env::temp_dir().join(format!(
            "spindle-{}-{sequence}-{tag:08x}",
            std::process::id()
        ));
        std::fs::create_dir(&root)?;
        Ok(ScratchDir { root })
    }

    #[must_use]
    pub fn path(&self) -> &Path { &self.root }

    /// Path of a file or subdirectory inside the scratch space. Nothing is
    /// created here; the caller decides what lives at the path.
    #[must_use]
    pub fn file(&self, name: &str) -> PathBuf { self.root.join(name) }
}

/// Cleanup failure is irrelevant to the test outcome, so the result is
/// discarded.
impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

impl AsRef<Path> for ScratchDir {
    fn as_ref(&self) -> &Path { &self.root }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_fixture_gets_its_own_directory() {
        let first = ScratchDir::new().unwrap();
        let second = ScratchDir::new().unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first.path().exists());
        assert!(second.path().exists());
    }

    #[test]
    fn test_drop_removes_directory_and_contents() {
        let scratch = ScratchDir::new().unwrap();
        std::fs::write(scratch.file("leftover.txt"), b"x").unwrap();
        let root = scratch.path().to_path_buf();

        drop(scratch);
        assert!(!root.exists());
    }

    #[test]
    fn test_file_paths_stay_inside_the_root() {
        let scratch = ScratchDir::new().unwrap();
        let nested = scratch.file("data.bin");
        assert!(nested.starts_with(scratch.path()));
        assert!(!nested.exists());
    }
}
