// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Hard bound on walked stack frames, so a corrupted or cyclic stack cannot
/// wedge the crash path in an unbounded unwind.
pub const CRASHLOG_MAX_FRAMES: usize = 100;

/// Initial capacity of the demangle scratch buffer. The buffer grows when a
/// longer name shows up and never shrinks.
pub const CRASHLOG_DEMANGLE_CAPACITY: usize = 512;

/// Layout of the report header timestamp, UTC at second resolution.
pub const CRASHLOG_TIMESTAMP_FORMAT: &str = "[%Y-%m-%d %H:%M:%S UTC]";

/// Frames between the fault site and the walker's entry when unwinding out
/// of a signal handler without a usable fault instruction pointer.
pub const SIGNAL_HANDLER_FRAMES: usize = 3;

/// Same, for the panic hook path.
pub const PANIC_HOOK_FRAMES: usize = 4;
