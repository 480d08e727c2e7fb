// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg(unix)]

pub(crate) mod crash_handler;
pub(crate) mod emitters;
pub(crate) mod panic_handler;
pub(crate) mod signal_handler_manager;
