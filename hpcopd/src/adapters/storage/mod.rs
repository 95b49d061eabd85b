// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Plain project storage under a local root. Projects are never encrypted
//! here, so synchronization has nothing to do; usage is still tracked so the
//! active marker can be observed.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::SecureStoragePort;

pub struct LocalProjectStorage {
    root: PathBuf,
    active: Mutex<BTreeMap<String, u32>>,
}

impl LocalProjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of staging scopes currently holding `project` active.
    pub fn active_count(&self, project: &str) -> u32 {
        self.active
            .lock()
            .map(|active| active.get(project).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn project_of(&self, folder: &Path) -> AppResult<String> {
        folder
            .strip_prefix(&self.root)
            .ok()
            .and_then(|rest| rest.components().next())
            .and_then(|component| match component {
                Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                _ => None,
            })
            .ok_or_else(|| {
                AppError::invalid_argument(format!(
                    "{} is not inside the storage root",
                    folder.display()
                ))
            })
    }

    fn with_active<T>(&self, f: impl FnOnce(&mut BTreeMap<String, u32>) -> T) -> AppResult<T> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| AppError::local("project usage table is poisoned"))?;
        Ok(f(&mut active))
    }
}

fn validate_project(project: &str) -> AppResult<()> {
    let mut components = Path::new(project).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(AppError::invalid_argument(format!(
            "invalid project name: {project:?}"
        ))),
    }
}

#[async_trait]
impl SecureStoragePort for LocalProjectStorage {
    fn encryption_enabled(&self) -> bool {
        false
    }

    fn project_folder(&self, project: &str) -> AppResult<PathBuf> {
        validate_project(project)?;
        Ok(self.root.join(project))
    }

    #[tracing::instrument(name = "storage", level = "debug", skip(self, folder), fields(folder = %folder.display()))]
    async fn increment_usage(&self, folder: &Path) -> AppResult<()> {
        let project = self.project_of(folder)?;
        let count = self.with_active(|active| {
            let count = active.entry(project).or_insert(0);
            *count += 1;
            *count
        })?;
        tracing::debug!(count, "project marked active");
        Ok(())
    }

    async fn sync(&self, folder: &Path) -> AppResult<()> {
        tracing::trace!(folder = %folder.display(), "unencrypted storage, nothing to sync");
        Ok(())
    }

    #[tracing::instrument(name = "storage", level = "debug", skip(self))]
    async fn set_inactive(&self, project: &str) -> AppResult<()> {
        self.with_active(|active| {
            if let Some(count) = active.get_mut(project) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    active.remove(project);
                }
            }
        })
    }
}
