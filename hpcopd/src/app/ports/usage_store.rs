// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[async_trait]
/// Disk usage figures per owner, in bytes.
pub trait UsageStorePort: Send + Sync {
    /// Declared requirement of the owner's PENDING and STARTED operations.
    async fn pending_disk_usage(&self, owner: &str) -> AppResult<i64>;
    /// Size of results already materialized for the owner's operations.
    async fn generated_disk_usage(&self, owner: &str) -> AppResult<i64>;
}
