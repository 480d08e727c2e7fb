// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Signals the crashlog knows how to describe. The descriptions are owned
/// here rather than taken from the platform's signal-name table, which is
/// not available on every libc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms, non_camel_case_types)]
#[repr(C)]
pub enum SignalNames {
    SIGABRT,
    SIGBUS,
    SIGFPE,
    SIGILL,
    SIGPIPE,
    SIGSEGV,
    SIGTRAP,
    UNKNOWN,
}

#[cfg(unix)]
pub use unix::*;

#[cfg(unix)]
mod unix {
    use super::*;

    impl From<libc::c_int> for SignalNames {
        fn from(value: libc::c_int) -> Self {
            match value {
                libc::SIGABRT => SignalNames::SIGABRT,
                libc::SIGBUS => SignalNames::SIGBUS,
                libc::SIGFPE => SignalNames::SIGFPE,
                libc::SIGILL => SignalNames::SIGILL,
                libc::SIGPIPE => SignalNames::SIGPIPE,
                libc::SIGSEGV => SignalNames::SIGSEGV,
                libc::SIGTRAP => SignalNames::SIGTRAP,
                _ => SignalNames::UNKNOWN,
            }
        }
    }

    /// Human-readable description used in the crash cause line, e.g.
    /// `uncaught signal 11 (Segmentation fault)`.
    pub fn signal_description(signum: libc::c_int) -> &'static str {
        match SignalNames::from(signum) {
            SignalNames::SIGABRT => "Aborted",
            SignalNames::SIGBUS => "Bus error",
            SignalNames::SIGFPE => "Floating point exception",
            SignalNames::SIGILL => "Illegal instruction",
            SignalNames::SIGPIPE => "Broken pipe",
            SignalNames::SIGSEGV => "Segmentation fault",
            SignalNames::SIGTRAP => "Trace/breakpoint trap",
            SignalNames::UNKNOWN => "Unknown signal",
        }
    }

    /// Converts a signum into a Signal.  Can't use the from trait because we
    /// don't own either type.
    pub fn signal_from_signum(value: libc::c_int) -> anyhow::Result<nix::sys::signal::Signal> {
        let rval = match value {
            libc::SIGABRT => nix::sys::signal::Signal::SIGABRT,
            libc::SIGBUS => nix::sys::signal::Signal::SIGBUS,
            libc::SIGFPE => nix::sys::signal::Signal::SIGFPE,
            libc::SIGILL => nix::sys::signal::Signal::SIGILL,
            libc::SIGPIPE => nix::sys::signal::Signal::SIGPIPE,
            libc::SIGSEGV => nix::sys::signal::Signal::SIGSEGV,
            libc::SIGTRAP => nix::sys::signal::Signal::SIGTRAP,
            _ => anyhow::bail!("Unexpected signal number {value}"),
        };
        Ok(rval)
    }

    /// The fatal set installed when the configuration does not name one.
    pub fn default_signals() -> Vec<i32> {
        vec![libc::SIGABRT, libc::SIGFPE, libc::SIGSEGV]
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_signal_descriptions() {
            assert_eq!(signal_description(libc::SIGSEGV), "Segmentation fault");
            assert_eq!(signal_description(libc::SIGABRT), "Aborted");
            assert_eq!(
                signal_description(libc::SIGFPE),
                "Floating point exception"
            );
            assert_eq!(signal_description(libc::SIGPIPE), "Broken pipe");
            assert_eq!(signal_description(9999), "Unknown signal");
        }

        #[test]
        fn test_signal_names_from_signum() {
            assert_eq!(SignalNames::from(libc::SIGSEGV), SignalNames::SIGSEGV);
            assert_eq!(SignalNames::from(libc::SIGKILL), SignalNames::UNKNOWN);
        }

        #[test]
        fn test_signal_from_signum() {
            assert_eq!(
                signal_from_signum(libc::SIGSEGV).unwrap(),
                nix::sys::signal::Signal::SIGSEGV
            );
            // SIGKILL can't be caught, so it is not a valid fatal-set member.
            signal_from_signum(libc::SIGKILL).unwrap_err();
        }
    }
}
