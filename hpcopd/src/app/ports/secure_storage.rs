// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[async_trait]
/// Project storage boundary. When encryption is enabled, project folders are
/// synchronized with their encrypted counterpart and tracked as active while
/// results are written into them.
pub trait SecureStoragePort: Send + Sync {
    fn encryption_enabled(&self) -> bool;
    fn project_folder(&self, project: &str) -> AppResult<PathBuf>;
    async fn increment_usage(&self, folder: &Path) -> AppResult<()>;
    async fn sync(&self, folder: &Path) -> AppResult<()>;
    async fn set_inactive(&self, project: &str) -> AppResult<()>;
}
