// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::LocalFilesystemPort;

#[derive(Clone, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LocalFilesystemPort for LocalFilesystem {
    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "create_dir_all", path = %path.display()))]
    async fn create_dir_all(&self, path: &Path) -> AppResult<()> {
        tokio::fs::create_dir_all(path).await.map_err(|err| {
            AppError::local(format!("failed to create {}: {err}", path.display()))
        })
    }

    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "file_size", path = %path.display()))]
    async fn file_size(&self, path: &Path) -> AppResult<u64> {
        let meta = tokio::fs::metadata(path).await.map_err(|err| {
            AppError::local(format!("failed to stat {}: {err}", path.display()))
        })?;
        Ok(meta.len())
    }
}
