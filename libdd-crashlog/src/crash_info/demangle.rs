// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::shared::constants::CRASHLOG_DEMANGLE_CAPACITY;
use symbolic_common::Name;
use symbolic_demangle::{Demangle, DemangleOptions};

/// Demangles symbol names into a scratch buffer reused across calls.
///
/// The buffer's capacity grows when a longer name shows up and never
/// shrinks. Not reentrant: the crash path owns exactly one instance, touched
/// only from the single active handler execution.
#[derive(Debug)]
pub struct Demangler {
    scratch: String,
}

impl Demangler {
    pub fn new() -> Self {
        Self {
            scratch: String::with_capacity(CRASHLOG_DEMANGLE_CAPACITY),
        }
    }

    /// Returns the demangled form of `name`, or `name` itself when it does
    /// not demangle. Failure to demangle is not an error: a raw symbol is a
    /// valid, if less readable, report.
    pub fn demangle<'a>(&'a mut self, name: &'a str) -> &'a str {
        self.scratch.clear();
        match Name::from(name).demangle(DemangleOptions::name_only()) {
            Some(demangled) if demangled != name => {
                self.scratch.push_str(&demangled);
                self.scratch.as_str()
            }
            _ => name,
        }
    }

    pub fn scratch_capacity(&self) -> usize {
        self.scratch.capacity()
    }
}

impl Default for Demangler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_rust() {
        let mut demangler = Demangler::new();
        assert_eq!(
            demangler.demangle("_ZN3std2rt10lang_start17h7a87e81ecc4a9d6cE"),
            "std::rt::lang_start"
        );
    }

    #[test]
    fn test_demangle_cpp() {
        let mut demangler = Demangler::new();
        assert_eq!(demangler.demangle("_ZN3Foo3barEv"), "Foo::bar");
    }

    #[test]
    fn test_demangle_msvc() {
        let mut demangler = Demangler::new();
        assert_eq!(demangler.demangle("?bar@Foo@@QEAAXXZ"), "Foo::bar");
    }

    #[test]
    fn test_demangle_unmangled_passthrough() {
        let mut demangler = Demangler::new();
        assert_eq!(demangler.demangle("main"), "main");
        assert_eq!(
            demangler.demangle("invalid_mangled_name"),
            "invalid_mangled_name"
        );
    }

    #[test]
    fn test_scratch_capacity_is_monotonic() {
        let mut demangler = Demangler::new();
        let initial = demangler.scratch_capacity();
        assert!(initial >= CRASHLOG_DEMANGLE_CAPACITY);

        // A batch of demangles, long and short, must never shrink the buffer.
        let mut watermark = initial;
        for name in [
            "_ZN3std2rt10lang_start17h7a87e81ecc4a9d6cE",
            "_ZN3Foo3barEv",
            "main",
            "_ZN4core3ptr13drop_in_place17h1badfde1a7ce2e69E",
        ] {
            let _ = demangler.demangle(name);
            assert!(demangler.scratch_capacity() >= watermark);
            watermark = demangler.scratch_capacity();
        }
    }
}
