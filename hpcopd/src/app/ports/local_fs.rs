// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[async_trait]
/// Local filesystem boundary for the core.
pub trait LocalFilesystemPort: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> AppResult<()>;
    async fn file_size(&self, path: &Path) -> AppResult<u64>;
}
