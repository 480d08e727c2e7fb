// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::crash_info::Demangler;
use crate::shared::constants::CRASHLOG_MAX_FRAMES;
use serde::{Deserialize, Serialize};

/// One walked return address. Any of the resolved fields may be absent: an
/// entirely unresolved frame is a valid terminal state, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StackFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    // Per-frame resolution problems, recorded inline instead of aborting
    // the capture.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
}

impl StackFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_resolved(&self) -> bool {
        self.symbol.is_some()
    }

    pub fn demangle_name(&mut self, demangler: &mut Demangler) {
        if let Some(name) = self.symbol.take() {
            self.symbol = Some(demangler.demangle(&name).to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StackTrace {
    pub frames: Vec<StackFrame>,
    /// Set when the frame bound truncated a deeper stack.
    pub incomplete: bool,
}

impl StackTrace {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Walks the current thread's stack and resolves each return address.
    ///
    /// The walk starts `ignore_frames` levels above this function's own
    /// entry and is bounded at [`CRASHLOG_MAX_FRAMES`] frames; `incomplete`
    /// is set when the bound truncated a deeper stack. Every walked address
    /// produces exactly one frame, resolved or not.
    ///
    /// Not for the signal path: the crash handler streams frames into the
    /// sink without building a vector (see the collector's emitters).
    #[inline(never)]
    pub fn capture(ignore_frames: usize) -> Self {
        let mut frames = Vec::new();
        let mut skipped = 0usize;
        let mut truncated = false;
        backtrace::trace(|frame| {
            // The +1 drops the frame for `capture` itself.
            if skipped < ignore_frames + 1 {
                skipped += 1;
                return true;
            }
            if frames.len() >= CRASHLOG_MAX_FRAMES {
                truncated = true;
                return false;
            }
            frames.push(resolve_frame(frame));
            true
        });
        Self {
            frames,
            incomplete: truncated,
        }
    }

    pub fn demangle_names(&mut self, demangler: &mut Demangler) {
        for frame in &mut self.frames {
            frame.demangle_name(demangler);
        }
    }
}

fn resolve_frame(frame: &backtrace::Frame) -> StackFrame {
    let mut out = StackFrame::new();
    out.ip = Some(format!("{:#x}", frame.ip() as usize));
    let mut visited = false;
    backtrace::resolve_frame(frame, |symbol| {
        visited = true;
        if let Some(name) = symbol.name() {
            match name.as_str() {
                Some(name) => out.symbol = Some(name.to_string()),
                None => out.comments.push("symbol name is not UTF-8".to_string()),
            }
        }
        if let Some(file) = symbol.filename() {
            out.file = Some(file.display().to_string());
        }
        out.line = symbol.lineno();
    });
    if !visited {
        out.comments.push("no debug info for address".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hint::black_box;

    #[inline(never)]
    fn recurse(depth: usize) -> StackTrace {
        if black_box(depth) == 0 {
            StackTrace::capture(0)
        } else {
            black_box(recurse(depth - 1))
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_capture_has_frames() {
        let trace = StackTrace::capture(0);
        assert!(!trace.frames.is_empty());
        assert!(!trace.incomplete);
        // Every walked address produced a frame with an ip.
        for frame in &trace.frames {
            assert!(frame.ip.is_some());
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_capture_is_bounded() {
        let trace = recurse(3 * CRASHLOG_MAX_FRAMES);
        assert_eq!(trace.frames.len(), CRASHLOG_MAX_FRAMES);
        assert!(trace.incomplete);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_capture_resolves_test_fn() {
        let mut trace = StackTrace::capture(0);
        let mut demangler = Demangler::new();
        trace.demangle_names(&mut demangler);
        let symbols: Vec<_> = trace
            .frames
            .iter()
            .filter_map(|f| f.symbol.as_deref())
            .collect();
        assert!(
            symbols
                .iter()
                .any(|s| s.contains("test_capture_resolves_test_fn")),
            "own frame missing from {symbols:?}"
        );
    }

    #[test]
    fn test_demangle_name_in_frame() {
        let mut demangler = Demangler::new();
        let mut frame = StackFrame::new();
        frame.symbol = Some("_ZN3Foo3barEv".to_string());
        frame.demangle_name(&mut demangler);
        assert_eq!(frame.symbol.as_deref(), Some("Foo::bar"));

        let mut unresolved = StackFrame::new();
        unresolved.demangle_name(&mut demangler);
        assert_eq!(unresolved.symbol, None);
        assert!(!unresolved.is_resolved());
    }
}
