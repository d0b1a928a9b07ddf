// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use smallvec::SmallVec;

/// Inline storage for hot-path collections (ready fd batches, due timer
/// batches, fired watcher lists). Eight slots covers the common case of a
/// tick touching a handful of sources without a heap allocation.
pub const INLINE_VEC_SIZE: usize = 8;

pub type InlineVec<T> = SmallVec<[T; INLINE_VEC_SIZE]>;
