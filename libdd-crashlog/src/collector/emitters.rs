// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::crash_handler::ReporterState;
use crate::crash_info::{signal_description, Demangler};
use crate::shared::configuration::{BacktraceCollection, CrashlogConfiguration};
use crate::shared::constants::{CRASHLOG_MAX_FRAMES, CRASHLOG_TIMESTAMP_FORMAT};
use chrono::Utc;
use libc::ucontext_t;
use nu_ansi_term::{Color, Style};
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("Failed to write to output: {0}")]
    WriteError(#[from] std::io::Error),
}

/// What goes on the cause line of the report.
pub(crate) enum ReportCause<'a> {
    /// A member of the fatal set, or SIGPIPE under `SigPipePolicy::Fatal`.
    Signal(i32),
    /// SIGPIPE under `LogAndContinue`; the handler returns afterwards.
    SigPipe,
    /// An uncaught panic. `type_name` still gets routed through the
    /// demangler, which is idempotent on the unmangled names the standard
    /// payloads carry.
    Panic {
        type_name: &'a str,
        message: Option<&'a str>,
    },
    /// The termination path ran with no panic in flight.
    NoException,
}

/// How many leading frames to drop so the report starts at the fault site
/// rather than inside the handler.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FrameSkip {
    /// Skip until the frame whose instruction pointer matches the fault ip
    /// taken from the signal's machine context; falls back to emitting the
    /// whole walk when the ip never shows up.
    UntilIp(usize),
    /// Drop a fixed number of walker/handler frames.
    Count(usize),
}

/// Serializes one crash report into the sink: timestamp, cause line,
/// `backtrace:` header, then one line per walked frame.
///
/// SAFETY:
///     Crash-reporting functions are not reentrant.
///     No other crash-handler functions should be called concurrently.
/// SIGNAL SAFETY:
///     Formatting goes through `write!` straight into the sink; the only
///     heap the crash path touches is the pre-grown demangle scratch.
pub(crate) fn emit_crash_report(
    state: &mut ReporterState,
    cause: ReportCause<'_>,
    skip: FrameSkip,
) -> Result<(), EmitterError> {
    let ReporterState {
        config,
        sink,
        demangler,
    } = state;

    emit_timestamp(sink)?;
    emit_cause(sink, demangler, &cause, config.color_output())?;
    if config.resolve_frames() != BacktraceCollection::Disabled {
        writeln!(sink, "backtrace:")?;
        // SAFETY: single active crash path; see the module note in
        // crash_handler.
        unsafe { emit_backtrace_by_frames(sink, demangler, config, skip)? };
    }
    sink.flush()?;
    Ok(())
}

/// `[YYYY-MM-DD HH:MM:SS UTC] `, second resolution.
fn emit_timestamp(w: &mut impl Write) -> Result<(), EmitterError> {
    write!(w, "{} ", Utc::now().format(CRASHLOG_TIMESTAMP_FORMAT))?;
    Ok(())
}

pub(crate) fn emit_cause(
    w: &mut impl Write,
    demangler: &mut Demangler,
    cause: &ReportCause<'_>,
    color: bool,
) -> Result<(), EmitterError> {
    let style = if color {
        Color::Red.bold()
    } else {
        Style::new()
    };
    write!(w, "{}", style.prefix())?;
    match cause {
        ReportCause::Signal(signum) => write!(
            w,
            "uncaught signal {signum} ({})",
            signal_description(*signum)
        )?,
        ReportCause::SigPipe => write!(w, "SIGPIPE has been received!")?,
        ReportCause::Panic { type_name, message } => {
            let type_name = demangler.demangle(type_name);
            match message {
                Some(message) => {
                    write!(w, "uncaught exception of type {type_name} ({message})")?
                }
                None => write!(w, "uncaught exception of type {type_name}")?,
            }
        }
        ReportCause::NoException => {
            write!(w, "terminate called although no exception was thrown")?
        }
    }
    writeln!(w, "{}", style.suffix())?;
    Ok(())
}

/// Streams frames into the sink as they are walked, bounded at
/// [`CRASHLOG_MAX_FRAMES`]. Every walked address produces exactly one line;
/// an address nothing could resolve is still emitted, explicitly marked.
///
/// SAFETY:
///     Getting a backtrace on rust is not guaranteed to be signal safe.
///     <https://github.com/rust-lang/backtrace-rs/issues/414>
///     Calculating the `ip` of the frames seems safe, but resolving the
///     frames sometimes crashes.
unsafe fn emit_backtrace_by_frames(
    w: &mut impl Write,
    demangler: &mut Demangler,
    config: &CrashlogConfiguration,
    skip: FrameSkip,
) -> Result<(), EmitterError> {
    let mut level = 0usize;
    let mut skipped = 0usize;
    let mut skipping = matches!(skip, FrameSkip::UntilIp(_));

    loop {
        backtrace::trace_unsynchronized(|frame| {
            let ip = frame.ip() as usize;
            match skip {
                FrameSkip::UntilIp(fault_ip) => {
                    if ip == fault_ip {
                        skipping = false;
                    }
                    if skipping {
                        return true;
                    }
                }
                FrameSkip::Count(n) => {
                    if skipped < n {
                        skipped += 1;
                        return true;
                    }
                }
            }
            if level >= CRASHLOG_MAX_FRAMES {
                return false;
            }

            if config.resolve_frames() == BacktraceCollection::EnabledWithInprocessSymbols {
                let mut emitted = false;
                backtrace::resolve_frame_unsynchronized(frame, |symbol| {
                    emitted = true;
                    let _ = emit_frame_line(
                        w,
                        demangler,
                        config.demangle_names(),
                        level,
                        ip,
                        symbol.name().and_then(|n| n.as_str()),
                        symbol.filename().and_then(|p| p.to_str()),
                        symbol.lineno(),
                    );
                });
                if !emitted {
                    let _ = emit_frame_line(
                        w,
                        demangler,
                        config.demangle_names(),
                        level,
                        ip,
                        None,
                        None,
                        None,
                    );
                }
            } else {
                let _ = emit_frame_line(
                    w,
                    demangler,
                    config.demangle_names(),
                    level,
                    ip,
                    None,
                    None,
                    None,
                );
            }
            // Flush eagerly so each frame survives even if the next one
            // faults.
            let _ = w.flush();
            level += 1;
            true
        });

        if !skipping || level > 0 {
            break;
        }
        // The fault ip never showed up in the walk; emit everything rather
        // than nothing.
        skipping = false;
    }
    Ok(())
}

/// ` <idx>: <symbol-or-placeholder> [<hex ip>]`, plus ` in <file>:<line>`
/// when debug information had them.
#[allow(clippy::too_many_arguments)]
fn emit_frame_line(
    w: &mut impl Write,
    demangler: &mut Demangler,
    demangle: bool,
    level: usize,
    ip: usize,
    symbol: Option<&str>,
    file: Option<&str>,
    line: Option<u32>,
) -> Result<(), EmitterError> {
    write!(w, " {level:3}: ")?;
    match symbol {
        Some(name) => {
            let name = if demangle { demangler.demangle(name) } else { name };
            write!(w, "{name} [{ip:x}]")?;
        }
        None => write!(w, "<unresolved> [{ip:x}]")?,
    }
    match (file, line) {
        (Some(file), Some(line)) => writeln!(w, " in {file}:{line}")?,
        (Some(file), None) => writeln!(w, " in {file}")?,
        _ => writeln!(w)?,
    }
    Ok(())
}

/// The faulting instruction pointer from the signal's machine context, used
/// to start the report at the fault site.
pub(crate) fn extract_ip(ucontext: *const ucontext_t) -> Option<usize> {
    if ucontext.is_null() {
        return None;
    }
    // SAFETY: the pointer is given to us by the signal handler, and is
    // non-null.
    unsafe {
        #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
        return Some((*(*ucontext).uc_mcontext).__ss.__rip as usize);
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        return Some((*(*ucontext).uc_mcontext).__ss.__pc as usize);

        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        return Some((*ucontext).uc_mcontext.gregs[libc::REG_RIP as usize] as usize);
        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        return Some((*ucontext).uc_mcontext.pc as usize);

        // No machine-context layout known for this platform; the caller
        // falls back to count-based frame skipping.
        #[cfg(not(any(
            all(target_os = "macos", target_arch = "x86_64"),
            all(target_os = "macos", target_arch = "aarch64"),
            all(target_os = "linux", target_arch = "x86_64"),
            all(target_os = "linux", target_arch = "aarch64"),
        )))]
        return None;
    }
}
