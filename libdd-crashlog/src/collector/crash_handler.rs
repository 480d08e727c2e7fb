// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

use super::emitters::{self, FrameSkip, ReportCause};
use super::signal_handler_manager::restore_default_signal_handlers;
use crate::api;
use crate::crash_info::{signal_from_signum, Demangler};
use crate::shared::configuration::{CrashlogConfiguration, TerminationPolicy};
use crate::shared::constants::SIGNAL_HANDLER_FRAMES;
use libc::{c_void, siginfo_t, ucontext_t, EXIT_FAILURE};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet};
use std::fs::File;
use std::io::Write;
use std::os::unix::io::FromRawFd;
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicPtr, AtomicU64};

// Note that this file makes use of the following async-signal safe functions
// in a signal handler.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
// - abort
// - close (when the report `File` drops)
// - raise
// - sigaction
// - write
// - _exit
// Writing through `std::fs::File` is a pragmatic relaxation, not strict
// POSIX async-signal-safety. The handler never takes a lock and never
// allocates beyond the pre-grown demangle scratch buffer.

/// Everything a handler needs, allocated before any handler can fire.
///
/// Single writer at init, read-only during handling (the demangle scratch is
/// the one mutable part, serialized by the single active crash path), and
/// leaked rather than freed on teardown so a concurrently firing handler can
/// never observe freed memory.
pub(crate) struct ReporterState {
    pub(crate) config: CrashlogConfiguration,
    pub(crate) sink: Sink,
    pub(crate) demangler: Demangler,
}

static STATE: AtomicPtr<ReporterState> = AtomicPtr::new(ptr::null_mut());

/// One-shot guard: at most one fatal crash report per process.
static REPORTS_STARTED: AtomicU64 = AtomicU64::new(0);

/// Mirrors every report line to stderr, and to the report file when one is
/// open. Write errors are swallowed: by the time the sink is in use there is
/// no caller left to hear them.
pub(crate) struct Sink {
    pub(crate) file: Option<File>,
}

impl Sink {
    pub(crate) fn stderr_only() -> Self {
        Self { file: None }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // Raw fd 2: `std::io::stderr()` takes a lock, which is not an option
        // inside a signal handler.
        // SAFETY: fd 2 outlives the process; ManuallyDrop keeps it open.
        let mut stderr = std::mem::ManuallyDrop::new(unsafe { File::from_raw_fd(2) });
        let _ = stderr.write_all(buf);
        if let Some(file) = self.file.as_mut() {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Publishes the reporting state, dropping any previous one.
/// PRECONDITIONS:
///     No handler registered against the previous state may still fire:
///     callers install handlers only after publishing.
/// ATOMICITY:
///     This function uses a swap on an atomic pointer.
pub(crate) fn replace_state(state: ReporterState) {
    let box_ptr = Box::into_raw(Box::new(state));
    let old = STATE.swap(box_ptr, SeqCst);
    if !old.is_null() {
        // SAFETY: the pointer can only come from Box::into_raw above.
        unsafe { drop(Box::from_raw(old)) };
    }
}

/// Takes the state out, leaving null behind. The caller decides whether to
/// drop it (there is no such caller today) or leak it (teardown does, so a
/// handler still holding the pointer stays safe).
pub(crate) fn take_state() -> *mut ReporterState {
    STATE.swap(ptr::null_mut(), SeqCst)
}

pub(crate) fn state() -> *mut ReporterState {
    STATE.load(SeqCst)
}

/// Claims the right to write the process's one crash report. The first
/// caller wins; everybody after gets `false`.
pub(crate) fn acquire_report_guard() -> bool {
    REPORTS_STARTED.fetch_add(1, SeqCst) == 0
}

pub(crate) extern "C" fn handle_posix_sigaction(
    signum: i32,
    _sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    handle_posix_signal_impl(signum, ucontext as *mut ucontext_t);
}

fn handle_posix_signal_impl(signum: i32, ucontext: *mut ucontext_t) -> ! {
    // If this code hits a stack overflow, then it will result in a second
    // segfault, caught by the one-shot guard below.
    if !acquire_report_guard() {
        // A second fatal signal means the crash path itself crashed, or two
        // threads faulted at once. Nothing left to report with; die now.
        terminate_by_default(signum);
    }

    let state_ptr = state();
    if state_ptr.is_null() {
        // Handlers outlived the state (crash during init or after shutdown).
        let mut sink = Sink::stderr_only();
        let _ = writeln!(
            sink,
            "crashlog: caught signal {signum} with no reporting state"
        );
        terminate_by_default(signum);
    }
    // SAFETY: the state is published before handlers are installed, never
    // freed while they are, and the one-shot guard keeps this the only
    // execution touching it mutably.
    let state = unsafe { &mut *state_ptr };

    let skip = match emitters::extract_ip(ucontext) {
        Some(fault_ip) => FrameSkip::UntilIp(fault_ip),
        None => FrameSkip::Count(SIGNAL_HANDLER_FRAMES),
    };
    let _ = emitters::emit_crash_report(state, ReportCause::Signal(signum), skip);

    let termination = state.config.termination();
    api::shutdown();
    match termination {
        // Dispositions are back at SIG_DFL; abort produces the core dump.
        // SAFETY: aborting has no preconditions.
        TerminationPolicy::CoreDump => unsafe { libc::abort() },
        // Kills the program without raising a signal or running at_exit.
        // SAFETY: exiting has no preconditions.
        TerminationPolicy::Exit => unsafe { libc::_exit(EXIT_FAILURE) },
    }
}

/// SIGPIPE under `LogAndContinue`: deliberately non-fatal. Logs the event
/// with a backtrace and returns so execution resumes. Bypasses the one-shot
/// guard so a later real crash still gets its report.
pub(crate) extern "C" fn handle_sigpipe(_signum: i32) {
    let state_ptr = state();
    if state_ptr.is_null() {
        return;
    }
    // SAFETY: see `handle_posix_signal_impl`; SIGPIPE delivery is the single
    // active handler execution while this runs.
    let state = unsafe { &mut *state_ptr };
    let _ = emitters::emit_crash_report(
        state,
        ReportCause::SigPipe,
        FrameSkip::Count(SIGNAL_HANDLER_FRAMES),
    );
}

/// Re-raises `signum` under its default disposition; used when reporting is
/// impossible or already done by another execution.
fn terminate_by_default(signum: i32) -> ! {
    let state_ptr = state();
    if !state_ptr.is_null() {
        // SAFETY: read-only access; the state is never freed while published.
        restore_default_signal_handlers(unsafe { &(*state_ptr).config });
    } else if let Ok(signal_type) = signal_from_signum(signum) {
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: restoring SIG_DFL has no preconditions.
        let _ = unsafe { signal::sigaction(signal_type, &action) };
    }
    // SAFETY: raising a signal has no preconditions.
    unsafe { libc::raise(signum) };
    // Every signal we install default-terminates; if the raise was somehow
    // swallowed, exit rather than return into the fault.
    // SAFETY: exiting has no preconditions.
    unsafe { libc::_exit(EXIT_FAILURE) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_writes_to_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("report.txt");
        let file = File::options()
            .append(true)
            .create(true)
            .open(&path)
            .unwrap();
        let mut sink = Sink { file: Some(file) };
        writeln!(sink, "hello report").unwrap();
        sink.flush().unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "hello report\n");
    }

    #[test]
    fn test_sink_stderr_only_swallows_everything() {
        let mut sink = Sink::stderr_only();
        writeln!(sink, "degraded mode line").unwrap();
        sink.flush().unwrap();
    }

    #[test]
    fn test_report_guard_is_one_shot() {
        // Other tests never touch the guard, so the first claim wins and
        // every claim after that loses.
        assert!(acquire_report_guard());
        assert!(!acquire_report_guard());
        assert!(!acquire_report_guard());
    }
}
