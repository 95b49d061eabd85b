// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Lifecycle management for operations dispatched to a remote HPC execution
//! service: submission, reconciliation of remote job state, result staging.

pub mod adapters;
pub mod app;
pub mod config;
pub mod logging;
