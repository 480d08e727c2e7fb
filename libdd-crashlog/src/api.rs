// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

//! Process-wide lifecycle: opens the report sink, installs the handlers,
//! and tears everything down exactly once.

use crate::collector::crash_handler::{self, ReporterState, Sink};
use crate::collector::panic_handler;
use crate::collector::signal_handler_manager::{
    register_crash_handlers, restore_default_signal_handlers,
};
use crate::crash_info::Demangler;
use crate::shared::configuration::CrashlogConfiguration;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Initializes crash reporting with defaults: report appended to
/// `report_path`, altstack-backed handlers for {SIGSEGV, SIGABRT, SIGFPE},
/// SIGPIPE logged without terminating, abort-for-core-dump termination.
///
/// Call once, as early as possible, before other subsystems start. Failures
/// to create the report directory or open the file are written to stderr and
/// degrade to stderr-only reporting; this function never panics and never
/// reports an error to the caller.
pub fn init(report_path: impl Into<PathBuf>) {
    init_with_config(CrashlogConfiguration::with_report_path(report_path));
}

/// As [`init`], with full control over the configuration.
pub fn init_with_config(config: CrashlogConfiguration) {
    let file = config.report_path().as_deref().and_then(open_report_sink);
    crash_handler::replace_state(ReporterState {
        sink: Sink { file },
        demangler: Demangler::new(),
        config,
    });
    // The state must be published before any handler can fire.
    if let Err(e) = reinstall_signal_handlers_impl() {
        eprintln!("crashlog: could not install signal handlers: {e:#}");
    }
    panic_handler::install_panic_hook();
}

/// Opens the report file in append mode, creating its parent directory if
/// needed. A failure leaves reporting in stderr-only mode.
fn open_report_sink(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "crashlog: could not create report directory '{}': {e}",
                    parent.display()
                );
                return None;
            }
        }
    }
    match File::options().append(true).create(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!(
                "crashlog: could not open report file '{}': {e}",
                path.display()
            );
            None
        }
    }
}

/// Re-registers the signal handlers from the current configuration, for
/// callers whose handlers were clobbered by another library. No-op (with a
/// stderr note) when crash reporting was never initialized.
pub fn reinstall_signal_handlers() {
    if let Err(e) = reinstall_signal_handlers_impl() {
        eprintln!("crashlog: could not reinstall signal handlers: {e:#}");
    }
}

fn reinstall_signal_handlers_impl() -> anyhow::Result<()> {
    let state_ptr = crash_handler::state();
    anyhow::ensure!(!state_ptr.is_null(), "crash reporting is not initialized");
    // SAFETY: the state is never freed while published; registration only
    // reads the configuration.
    let config = unsafe { &(*state_ptr).config };
    register_crash_handlers(config)
}

/// Tears crash reporting down: flushes and closes the report sink exactly
/// once, restores default signal dispositions and the previous panic hook.
/// Idempotent: later calls are no-ops.
///
/// Also runs on the crash path itself, after the report is written and
/// before the process terminates, so it must not interact with the
/// allocator: the state is leaked, never freed, and closing the sink is a
/// flush plus a `close(2)`.
pub fn shutdown() {
    let state_ptr = crash_handler::take_state();
    if state_ptr.is_null() {
        return;
    }
    // SAFETY: the pointer was swapped out above, so this is the only path
    // still driving it; handlers observe null from now on.
    let state = unsafe { &mut *state_ptr };
    if let Some(mut file) = state.sink.file.take() {
        let _ = file.flush();
        // Dropping the File closes the fd.
    }
    restore_default_signal_handlers(&state.config);
    panic_handler::restore_previous_panic_hook();
    // `state` itself stays allocated: a handler on another thread may still
    // hold the pointer it loaded before the swap.
}
