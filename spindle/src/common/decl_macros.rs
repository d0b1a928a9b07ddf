// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

/// Success terminator for loop callbacks.
///
/// Everything the runtime invokes - timer callbacks, watcher callbacks,
/// tick jobs - completes with `Result<(), LoopError>`. This macro pins that
/// exact type down, so a bare closure like `|| cb_ok!()` infers correctly
/// without a turbofish on every `Ok(())`.
#[macro_export]
macro_rules! cb_ok {
    () => {
        Ok::<(), $crate::error::LoopError>(())
    };
}
