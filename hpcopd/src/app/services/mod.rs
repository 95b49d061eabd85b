// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod quota;
pub mod staging;
pub mod state_machine;
pub mod submissions;
