// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::crash_handler::{handle_posix_sigaction, handle_sigpipe};
use crate::crash_info::signal_from_signum;
use crate::shared::configuration::{CrashlogConfiguration, SigPipePolicy};
use libc::{
    c_void, mmap, sigaltstack, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ,
    PROT_WRITE, SIGSTKSZ,
};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow};
use std::ptr;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering::SeqCst;

// Linux seems to have the most, supporting up to 64 inclusive
// https://man7.org/linux/man-pages/man7/signal.7.html
const MAX_SIGNALS: usize = 65;

// One alternate-stack buffer per registered signal, mapped on first install
// and never unmapped while handlers remain installed.
static ALT_STACKS: [AtomicPtr<c_void>; MAX_SIGNALS] =
    [const { AtomicPtr::new(ptr::null_mut()) }; MAX_SIGNALS];

/// Registers the UNIX signal handlers for the configured fatal set, plus the
/// SIGPIPE handler selected by the configuration's [`SigPipePolicy`].
/// Re-installation (any number of times, e.g. after another library
/// clobbered the handlers) is supported and reuses the existing
/// alternate-stack buffers.
/// PRECONDITIONS:
///     The reporting state must be published before this is called, so a
///     handler firing mid-registration finds it.
/// SAFETY:
///     Crash-reporting functions are not guaranteed to be reentrant.
///     No other crash-handler functions should be called concurrently.
pub(crate) fn register_crash_handlers(config: &CrashlogConfiguration) -> anyhow::Result<()> {
    let mut errors = vec![];

    for signum in config.signals() {
        // SAFETY: installing a handler has no preconditions beyond a valid
        // signum, which `CrashlogConfiguration::new` already checked.
        if let Err(e) = unsafe { install_signal_handler(*signum, config) } {
            errors.push(format!("Unable to register signal {signum}: {e:?}"));
        }
    }

    let sigpipe_result = match config.sigpipe() {
        // SAFETY: as above.
        SigPipePolicy::LogAndContinue => unsafe { install_sigpipe_handler(config) },
        SigPipePolicy::Fatal => unsafe { install_signal_handler(libc::SIGPIPE, config) },
    };
    if let Err(e) = sigpipe_result {
        errors.push(format!("Unable to register SIGPIPE: {e:?}"));
    }

    anyhow::ensure!(
        errors.is_empty(),
        "Errors registering signal handlers {errors:?}"
    );
    Ok(())
}

/// Configures the signal's dedicated alternate stack and registers the crash
/// handler with the run-on-alternate-stack flag, then unblocks the signal at
/// the process mask so the handler can fire even when a re-entrant crash
/// left it blocked. Replaces whatever handler was installed before.
unsafe fn install_signal_handler(
    signum: i32,
    config: &CrashlogConfiguration,
) -> anyhow::Result<()> {
    install_with_handler(
        signum,
        config,
        SigHandler::SigAction(handle_posix_sigaction),
    )
}

/// SIGPIPE under `LogAndContinue`: same alternate-stack setup, but the
/// handler logs and returns instead of terminating.
unsafe fn install_sigpipe_handler(config: &CrashlogConfiguration) -> anyhow::Result<()> {
    install_with_handler(libc::SIGPIPE, config, SigHandler::Handler(handle_sigpipe))
}

unsafe fn install_with_handler(
    signum: i32,
    config: &CrashlogConfiguration,
    handler: SigHandler,
) -> anyhow::Result<()> {
    let signal_type = signal_from_signum(signum)?;

    if config.create_alt_stack() {
        let buffer = alt_stack_for(signum)?;
        let stack = libc::stack_t {
            ss_sp: buffer,
            ss_flags: 0,
            ss_size: alt_stack_size(),
        };
        let rval = sigaltstack(&stack, ptr::null_mut());
        anyhow::ensure!(rval == 0, "sigaltstack failed for signal {signum}");
    }

    // It is generally preferable to run in an altstack, given the choice:
    // symbolizing a backtrace has been observed to exceed the default
    // SIGSTKSZ, and a stack-overflow SIGSEGV cannot be handled on the
    // exhausted thread stack at all.
    let extra_saflags = if config.use_alt_stack() {
        SaFlags::SA_ONSTACK
    } else {
        SaFlags::empty()
    };

    let sig_action = SigAction::new(
        handler,
        SaFlags::SA_NODEFER | extra_saflags,
        SigSet::empty(),
    );
    signal::sigaction(signal_type, &sig_action)?;

    let mut unblock = SigSet::empty();
    unblock.add(signal_type);
    signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&unblock), None)?;
    Ok(())
}

/// Maps the signal's dedicated alternate stack with a leading guard page, or
/// returns the previously mapped one. Inspired by
/// <https://github.com/rust-lang/rust/pull/69969/files>
unsafe fn alt_stack_for(signum: i32) -> anyhow::Result<*mut c_void> {
    let index = usize::try_from(signum)?;
    anyhow::ensure!(index < MAX_SIGNALS, "signal number {signum} out of range");

    let existing = ALT_STACKS[index].load(SeqCst);
    if !existing.is_null() {
        return Ok(existing);
    }

    let page_size = page_size::get();
    let stackp = mmap(
        ptr::null_mut(),
        alt_stack_size() + page_size,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANON,
        -1,
        0,
    );
    anyhow::ensure!(
        stackp != MAP_FAILED,
        "failed to allocate an alternate stack"
    );
    let guard_result = libc::mprotect(stackp, page_size, PROT_NONE);
    anyhow::ensure!(
        guard_result == 0,
        "failed to set up alternate stack guard page"
    );
    let stackp = stackp.add(page_size);

    // A racing install for the same signal keeps the winner's mapping; the
    // loser's pages stay mapped but unused.
    match ALT_STACKS[index].compare_exchange(ptr::null_mut(), stackp, SeqCst, SeqCst) {
        Ok(_) => Ok(stackp),
        Err(winner) => Ok(winner),
    }
}

/// The default SIGSTKSZ is 8KB, which symbolization can exceed; use the
/// greater of 16 pages or SIGSTKSZ.
fn alt_stack_size() -> usize {
    std::cmp::max(SIGSTKSZ, 16 * page_size::get())
}

/// Restores default dispositions for the configured fatal set and SIGPIPE.
/// Best effort: a failure on one signal does not stop the others, and this
/// must not itself be able to crash.
pub(crate) fn restore_default_signal_handlers(config: &CrashlogConfiguration) {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signum in config.signals().iter().chain([libc::SIGPIPE].iter()) {
        if let Ok(signal_type) = signal_from_signum(*signum) {
            // SAFETY: restoring SIG_DFL has no preconditions.
            let _ = unsafe { signal::sigaction(signal_type, &action) };
        }
    }
}

#[cfg(test)]
mod tests {
    #[cfg(target_os = "linux")]
    #[test]
    fn test_max_signals() {
        assert!(super::MAX_SIGNALS as libc::c_int > libc::SIGRTMAX());
    }

    #[test]
    fn test_alt_stack_size() {
        // Large enough for the walker, small enough to not matter in RSS.
        assert!(super::alt_stack_size() >= libc::SIGSTKSZ);
    }
}
