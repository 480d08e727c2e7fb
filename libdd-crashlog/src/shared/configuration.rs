// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::crash_info::{default_signals, signal_from_signum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Backtrace collection occurs in the context of a crashing process.
/// If the stack is sufficiently corrupted, it is possible (but unlikely),
/// for the collection itself to crash. We recommend fully enabling it, but
/// keeping a way to downgrade the collector.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BacktraceCollection {
    /// The report carries the cause line only, no `backtrace:` section.
    Disabled,
    /// Frames carry raw instruction pointers only.
    WithoutSymbols,
    /// Full in-process symbolization: function names, files and lines where
    /// debug information is available.
    EnabledWithInprocessSymbols,
}

/// A broken pipe is not a crash for most long-running programs; the default
/// logs it with a backtrace and lets execution resume.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigPipePolicy {
    LogAndContinue,
    Fatal,
}

/// Terminal disposition of the process after the report is written and
/// teardown has run.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationPolicy {
    /// `abort()` under default dispositions, producing a core dump.
    CoreDump,
    /// `_exit(EXIT_FAILURE)` without raising a signal or running at_exit.
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashlogConfiguration {
    color_output: bool,
    create_alt_stack: bool,
    // Whether to demangle symbol names in stack traces
    demangle_names: bool,
    report_path: Option<PathBuf>,
    resolve_frames: BacktraceCollection,
    signals: Vec<i32>,
    sigpipe: SigPipePolicy,
    termination: TerminationPolicy,
    use_alt_stack: bool,
}

impl CrashlogConfiguration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        report_path: Option<PathBuf>,
        create_alt_stack: bool,
        use_alt_stack: bool,
        resolve_frames: BacktraceCollection,
        mut signals: Vec<i32>,
        sigpipe: SigPipePolicy,
        termination: TerminationPolicy,
        demangle_names: bool,
        color_output: bool,
    ) -> anyhow::Result<Self> {
        // Requesting to create, but not use, the altstack is considered paradoxical.
        anyhow::ensure!(
            !create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        if signals.is_empty() {
            signals = default_signals();
        } else {
            // Ensure we don't have double elements in the signals list.
            let before_len = signals.len();
            signals.sort();
            signals.dedup();
            anyhow::ensure!(
                before_len == signals.len(),
                "Signals contained duplicate elements"
            );
            anyhow::ensure!(
                !signals.contains(&libc::SIGPIPE),
                "SIGPIPE handling is governed by SigPipePolicy, not the fatal set"
            );
            // Ensure that all signal values translate to a valid signum
            signals
                .iter()
                .try_for_each(|x| signal_from_signum(*x).map(|_| ()))?;
        }

        Ok(Self {
            color_output,
            create_alt_stack,
            demangle_names,
            report_path,
            resolve_frames,
            signals,
            sigpipe,
            termination,
            use_alt_stack,
        })
    }

    /// The common case: report appended to `path`, altstack-backed handlers
    /// for the default fatal set, full symbolization, SIGPIPE logged without
    /// terminating, abort-for-core-dump termination.
    pub fn with_report_path(path: impl Into<PathBuf>) -> Self {
        Self {
            color_output: false,
            create_alt_stack: true,
            demangle_names: true,
            report_path: Some(path.into()),
            resolve_frames: BacktraceCollection::EnabledWithInprocessSymbols,
            signals: default_signals(),
            sigpipe: SigPipePolicy::LogAndContinue,
            termination: TerminationPolicy::CoreDump,
            use_alt_stack: true,
        }
    }

    pub fn color_output(&self) -> bool {
        self.color_output
    }

    pub fn create_alt_stack(&self) -> bool {
        self.create_alt_stack
    }

    pub fn demangle_names(&self) -> bool {
        self.demangle_names
    }

    pub fn report_path(&self) -> &Option<PathBuf> {
        &self.report_path
    }

    pub fn resolve_frames(&self) -> BacktraceCollection {
        self.resolve_frames
    }

    pub fn signals(&self) -> &Vec<i32> {
        &self.signals
    }

    pub fn sigpipe(&self) -> SigPipePolicy {
        self.sigpipe
    }

    pub fn termination(&self) -> TerminationPolicy {
        self.termination
    }

    pub fn use_alt_stack(&self) -> bool {
        self.use_alt_stack
    }

    pub fn set_color_output(&mut self, color_output: bool) {
        self.color_output = color_output;
    }

    pub fn set_create_alt_stack(&mut self, create_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !create_alt_stack || self.use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.create_alt_stack = create_alt_stack;
        Ok(())
    }

    pub fn set_use_alt_stack(&mut self, use_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.use_alt_stack = use_alt_stack;
        Ok(())
    }

    pub fn set_resolve_frames(&mut self, resolve_frames: BacktraceCollection) {
        self.resolve_frames = resolve_frames;
    }

    pub fn set_sigpipe(&mut self, sigpipe: SigPipePolicy) {
        self.sigpipe = sigpipe;
    }

    pub fn set_termination(&mut self, termination: TerminationPolicy) {
        self.termination = termination;
    }
}
