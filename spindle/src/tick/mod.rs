// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// Attach sources.
pub mod tick_queue;

// Re-export.
pub use tick_queue::*;
