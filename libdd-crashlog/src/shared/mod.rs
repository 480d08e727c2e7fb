// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration and constants shared across the crash-reporting path.

pub(crate) mod configuration;
pub(crate) mod constants;
