// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod demangle;
mod sig_info;
mod stacktrace;

pub use demangle::Demangler;
pub use sig_info::*;
pub use stacktrace::*;
