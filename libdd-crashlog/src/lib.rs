// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Crash reporting for native processes.
//!
//! Installs handlers for the fatal-signal set and a process-wide panic hook,
//! and, when the process goes down, writes a timestamped, symbolized report
//! to a local file and to stderr before terminating in a controlled manner
//! (abort for a core dump, or an explicit exit).
//!
//! ```no_run
//! libdd_crashlog::init("/tmp/crashlog.txt");
//! ```

mod api;
mod collector;
mod crash_info;
mod shared;

#[cfg(unix)]
pub use api::{init, init_with_config, reinstall_signal_handlers, shutdown};
pub use crash_info::*;
pub use shared::configuration::{
    BacktraceCollection, CrashlogConfiguration, SigPipePolicy, TerminationPolicy,
};
