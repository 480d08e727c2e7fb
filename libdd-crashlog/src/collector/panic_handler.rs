// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::crash_handler::{self, acquire_report_guard};
use super::emitters::{self, FrameSkip, ReportCause};
use crate::api;
use crate::shared::configuration::TerminationPolicy;
use crate::shared::constants::PANIC_HOOK_FRAMES;
use std::any::Any;
use std::panic::{self, PanicHookInfo};
use std::ptr;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering::SeqCst;

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync>;
static PREVIOUS_PANIC_HOOK: AtomicPtr<PanicHook> = AtomicPtr::new(ptr::null_mut());

/// Installs the process-wide hook invoked when a panic reaches the top of
/// the stack with no recovery point, and stores the previous hook so
/// teardown can put it back.
///
/// PRECONDITIONS:
///     The reporting state must already be published.
/// SAFETY:
///     Crash-reporting functions are not guaranteed to be reentrant.
///     No other crash-handler functions should be called concurrently.
/// ATOMICITY:
///     This function uses a swap on an atomic pointer.
pub(crate) fn install_panic_hook() {
    // register only once, if it is already registered, do nothing
    if !PREVIOUS_PANIC_HOOK.load(SeqCst).is_null() {
        return;
    }

    let old_hook = panic::take_hook();
    let old_hook_ptr = Box::into_raw(Box::new(old_hook));
    let old = PREVIOUS_PANIC_HOOK.swap(old_hook_ptr, SeqCst);
    if !old.is_null() {
        // SAFETY: the pointer can only come from Box::into_raw above.
        unsafe { drop(Box::from_raw(old)) };
    }
    panic::set_hook(Box::new(|panic_info| {
        handle_uncaught_exception(Some(panic_info.payload()))
    }));
}

/// Puts the pre-init hook back. Best effort: swapping hooks mid-panic is
/// not possible, and by then the process is about to terminate anyway.
pub(crate) fn restore_previous_panic_hook() {
    if std::thread::panicking() {
        return;
    }
    let old_hook_ptr = PREVIOUS_PANIC_HOOK.swap(ptr::null_mut(), SeqCst);
    if !old_hook_ptr.is_null() {
        // SAFETY: the pointer can only come from Box::into_raw in
        // install_panic_hook.
        let old_hook = unsafe { Box::from_raw(old_hook_ptr) };
        panic::set_hook(*old_hook);
    }
}

/// The process-wide "no handler found" callback: formats a cause from the
/// in-flight payload, writes the report (skipping the hook's own frames),
/// runs teardown, and terminates per configuration.
fn handle_uncaught_exception(payload: Option<&(dyn Any + Send)>) {
    if !acquire_report_guard() {
        // A crash report is already being written on another path.
        return;
    }
    let state_ptr = crash_handler::state();
    if state_ptr.is_null() {
        return;
    }
    // SAFETY: the state is published before the hook is installed, never
    // freed while it is, and the report guard keeps this the only execution
    // touching it mutably.
    let state = unsafe { &mut *state_ptr };

    let cause = match payload {
        Some(payload) => ReportCause::Panic {
            type_name: payload_type_name(payload),
            message: payload_message(payload),
        },
        None => ReportCause::NoException,
    };
    let _ = emitters::emit_crash_report(state, cause, FrameSkip::Count(PANIC_HOOK_FRAMES));

    let termination = state.config.termination();
    api::shutdown();
    match termination {
        // Dispositions are back at SIG_DFL; abort produces the core dump.
        // SAFETY: aborting has no preconditions.
        TerminationPolicy::CoreDump => unsafe { libc::abort() },
        // SAFETY: exiting has no preconditions.
        TerminationPolicy::Exit => unsafe { libc::_exit(libc::EXIT_FAILURE) },
    }
}

/// The payload's runtime type, as far as `dyn Any` lets us see it: the
/// standard `panic!` payloads are `&str` and `String`; anything else walked
/// in through `panic_any` and keeps its name to itself.
pub(crate) fn payload_type_name(payload: &(dyn Any + Send)) -> &'static str {
    if payload.is::<&str>() {
        std::any::type_name::<&str>()
    } else if payload.is::<String>() {
        std::any::type_name::<String>()
    } else {
        "<unknown>"
    }
}

pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> Option<&str> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some(s)
    } else {
        payload.downcast_ref::<String>().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_type_name() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(payload_type_name(payload.as_ref()), "&str");

        let payload: Box<dyn Any + Send> = Box::new("boom".to_string());
        assert_eq!(payload_type_name(payload.as_ref()), "alloc::string::String");

        let payload: Box<dyn Any + Send> = Box::new(42usize);
        assert_eq!(payload_type_name(payload.as_ref()), "<unknown>");
    }

    #[test]
    fn test_payload_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(payload_message(payload.as_ref()), Some("boom"));

        let payload: Box<dyn Any + Send> = Box::new("heap boom".to_string());
        assert_eq!(payload_message(payload.as_ref()), Some("heap boom"));

        let payload: Box<dyn Any + Send> = Box::new(42usize);
        assert_eq!(payload_message(payload.as_ref()), None);
    }

    #[test]
    fn test_install_and_restore_hook() {
        assert!(PREVIOUS_PANIC_HOOK.load(SeqCst).is_null());

        install_panic_hook();
        assert!(!PREVIOUS_PANIC_HOOK.load(SeqCst).is_null());

        // Installing twice keeps the first saved hook.
        let saved = PREVIOUS_PANIC_HOOK.load(SeqCst);
        install_panic_hook();
        assert_eq!(PREVIOUS_PANIC_HOOK.load(SeqCst), saved);

        restore_previous_panic_hook();
        assert!(PREVIOUS_PANIC_HOOK.load(SeqCst).is_null());
    }
}
