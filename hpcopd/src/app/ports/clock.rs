// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Time source for operation timestamps.
pub trait ClockPort: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;

    /// Current time as stored on operation records.
    fn now_rfc3339(&self) -> String {
        self.now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.now_utc().unix_timestamp().to_string())
    }
}
