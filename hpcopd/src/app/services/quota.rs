// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Per-owner disk figures in bytes, computed fresh for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskBudget {
    pub per_user_limit: i64,
    pub pending_usage: i64,
    pub generated_usage: i64,
}

impl DiskBudget {
    /// Remaining allowance; negative when the owner is already over quota.
    pub fn available(&self) -> i64 {
        self.per_user_limit
            .saturating_sub(self.pending_usage)
            .saturating_sub(self.generated_usage)
    }

    pub fn admits(&self, required: i64) -> bool {
        let available = self.available();
        available >= 0 && available >= required
    }
}
