// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#[cfg(not(unix))]
fn main() {}

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    unix::main()
}

#[cfg(unix)]
mod unix {
    use anyhow::Context;
    use libdd_crashlog::{CrashlogConfiguration, TerminationPolicy};
    use std::env;
    use std::hint::black_box;

    #[inline(never)]
    unsafe fn null_write() {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            std::arch::asm!("mov dword ptr [0], eax", options(nostack));
        }

        #[cfg(target_arch = "aarch64")]
        {
            std::arch::asm!("mov x0, #0", "str x1, [x0]", options(nostack));
        }
    }

    #[inline(never)]
    fn fn2() {
        unsafe { null_write() }
    }

    #[inline(never)]
    fn fn1() {
        fn2()
    }

    #[inline(never)]
    fn recurse_then_crash(depth: usize) {
        if black_box(depth) == 0 {
            fn1();
        } else {
            recurse_then_crash(depth - 1);
        }
        black_box(depth);
    }

    #[inline(never)]
    #[allow(unconditional_recursion)]
    fn overflow_the_stack() -> u64 {
        let frame = black_box([0u64; 512]);
        frame[0] + overflow_the_stack()
    }

    pub fn main() -> anyhow::Result<()> {
        let mut args = env::args().skip(1);
        let mode = args.next().context("Unexpected number of arguments 1")?;
        let report_path = args.next().context("Unexpected number of arguments 2")?;
        anyhow::ensure!(args.next().is_none(), "unexpected extra arguments");

        match mode.as_str() {
            "donothing" => {
                libdd_crashlog::init(&report_path);
            }
            "clean_shutdown" => {
                libdd_crashlog::init(&report_path);
                libdd_crashlog::shutdown();
                libdd_crashlog::shutdown();
                println!("done");
            }
            "reinstall_then_exit" => {
                libdd_crashlog::init(&report_path);
                // Clobber a handler the way a foreign library would, then
                // ask for reinstallation.
                unsafe { libc::signal(libc::SIGSEGV, libc::SIG_DFL) };
                libdd_crashlog::reinstall_signal_handlers();
                println!("reinstalled");
            }
            "sigsegv" => {
                libdd_crashlog::init(&report_path);
                fn1();
            }
            "sigfpe" => {
                libdd_crashlog::init(&report_path);
                unsafe { libc::raise(libc::SIGFPE) };
            }
            "sigabrt" => {
                libdd_crashlog::init(&report_path);
                std::process::abort();
            }
            "sigpipe" => {
                libdd_crashlog::init(&report_path);
                unsafe { libc::raise(libc::SIGPIPE) };
                // Non-fatal by default: execution must get here.
                println!("still alive");
            }
            "panic_str" => {
                libdd_crashlog::init(&report_path);
                panic!("test output");
            }
            "panic_string" => {
                libdd_crashlog::init(&report_path);
                let details = black_box(42);
                panic!("test output {details}");
            }
            "panic_any" => {
                libdd_crashlog::init(&report_path);
                std::panic::panic_any(black_box(42usize));
            }
            "deep_recursion" => {
                libdd_crashlog::init(&report_path);
                recurse_then_crash(300);
            }
            "stack_overflow" => {
                libdd_crashlog::init(&report_path);
                black_box(overflow_the_stack());
            }
            "exit_policy" => {
                let mut config = CrashlogConfiguration::with_report_path(&report_path);
                config.set_termination(TerminationPolicy::Exit);
                libdd_crashlog::init_with_config(config);
                fn1();
            }
            _ => anyhow::bail!("unknown mode {mode}"),
        }
        Ok(())
    }
}
