// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// Attach sources.
pub mod blocking_queue;
pub mod operation;
pub mod socket_poll;
pub mod sqlite_driver;

// Re-export.
pub use blocking_queue::*;
pub use operation::*;
pub use socket_poll::*;
pub use sqlite_driver::*;
