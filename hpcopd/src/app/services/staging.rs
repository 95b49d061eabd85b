// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::FutureExt;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{LocalFilesystemPort, RemoteExecutionPort, SecureStoragePort};
use crate::app::types::{Credentials, RemoteJobHandle};

/// Subdirectory of a job's working directory holding its results.
pub const OUTPUT_FOLDER: &str = "output";
/// Folder under an operation's destination that receives salvaged job logs.
pub const LOGS_FOLDER: &str = "logs";
/// Listing base for the top of a working directory.
pub const WORKING_DIR_ROOT: &str = "/";

/// Copies remote results into local project storage.
#[derive(Clone)]
pub struct StagingManager {
    remote: Arc<dyn RemoteExecutionPort>,
    local_fs: Arc<dyn LocalFilesystemPort>,
    storage: Arc<dyn SecureStoragePort>,
    project_locks: ProjectLocks,
}

impl StagingManager {
    pub fn new(
        remote: Arc<dyn RemoteExecutionPort>,
        local_fs: Arc<dyn LocalFilesystemPort>,
        storage: Arc<dyn SecureStoragePort>,
    ) -> Self {
        Self {
            remote,
            local_fs,
            storage,
            project_locks: ProjectLocks::default(),
        }
    }

    /// Downloads every plain file of `subdirectory` into `destination` and
    /// returns the local paths. Directories are skipped. Files downloaded
    /// before a failure stay on disk; re-running overwrites them.
    #[tracing::instrument(
        name = "stage_outputs",
        level = "debug",
        skip(self, handle, credentials),
        fields(job_url = %handle.job_url, destination = %destination.display())
    )]
    pub async fn stage_outputs(
        &self,
        handle: &RemoteJobHandle,
        subdirectory: &str,
        destination: &Path,
        credentials: &Credentials,
    ) -> AppResult<Vec<PathBuf>> {
        self.local_fs
            .create_dir_all(destination)
            .await
            .map_err(|err| AppError::staging(err.message().to_string()))?;

        let entries = self
            .remote
            .list_remote_files(handle, subdirectory, credentials)
            .await?;

        let mut staged = Vec::with_capacity(entries.len());
        for (path, entry) in entries {
            if !entry.is_file() {
                tracing::info!("object {path} is not a file; skipping");
                continue;
            }
            let Some(file_name) = Path::new(&path).file_name() else {
                tracing::warn!("remote entry '{path}' has no file name; skipping");
                continue;
            };
            let target = destination.join(file_name);
            self.remote
                .download(&entry, &target, credentials)
                .await
                .map_err(|err| {
                    AppError::staging(format!("failed to download {path}: {err}"))
                        .with_context(handle.job_url.clone())
                })?;
            staged.push(target);
        }
        Ok(staged)
    }

    /// Best-effort copy of the top level of each job's working directory into
    /// `destination/logs`. Failures are logged and skipped.
    pub async fn salvage_logs(
        &self,
        handles: &[RemoteJobHandle],
        destination: &Path,
        credentials: &Credentials,
    ) -> Vec<PathBuf> {
        let logs_dir = destination.join(LOGS_FOLDER);
        let mut salvaged = Vec::new();
        for (index, handle) in handles.iter().enumerate() {
            let target = if handles.len() > 1 {
                logs_dir.join(format!("stage_{}", index + 1))
            } else {
                logs_dir.clone()
            };
            match self
                .stage_outputs(handle, WORKING_DIR_ROOT, &target, credentials)
                .await
            {
                Ok(files) => salvaged.extend(files),
                Err(err) => {
                    tracing::warn!("failed to salvage logs from {}: {err}", handle.job_url);
                }
            }
        }
        salvaged
    }

    /// Runs `work` while `project` is marked active in secure storage.
    ///
    /// With encryption enabled, usage is incremented and the folder synced
    /// before `work`; afterwards the folder is synced again and the project
    /// set inactive. The release runs on every exit path, including a failed
    /// acquire and a panic inside `work`. Only one scope per project runs at
    /// a time.
    pub async fn with_project_scope<T, F>(&self, project: &str, work: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        if !self.storage.encryption_enabled() {
            return work.await;
        }
        let folder = self.storage.project_folder(project)?;
        let lock = self.project_locks.get(project);
        let active = lock.lock().await;

        let acquired = match self.storage.increment_usage(&folder).await {
            Ok(()) => self.storage.sync(&folder).await,
            Err(err) => Err(err),
        };
        let outcome = match acquired {
            Ok(()) => AssertUnwindSafe(work).catch_unwind().await,
            Err(err) => {
                tracing::warn!("failed to activate project {project}: {err}");
                Ok(Err(err))
            }
        };

        if let Err(err) = self.storage.sync(&folder).await {
            tracing::warn!("failed to sync project folder {}: {err}", folder.display());
        }
        if let Err(err) = self.storage.set_inactive(project).await {
            tracing::warn!("failed to mark project {project} inactive: {err}");
        }

        drop(active);
        self.project_locks.release(project, lock);

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[derive(Clone, Default)]
struct ProjectLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ProjectLocks {
    fn get(&self, project: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(project.to_string()).or_default().clone()
    }

    /// Forgets the project's mutex once no other scope holds or awaits it.
    fn release(&self, project: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            map.remove(project);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fs::LocalFilesystem;
    use crate::app::errors::AppErrorKind;
    use crate::app::test_support::{FakeRemote, RecordingStorage};
    use crate::app::types::RemoteEntryKind;
    use std::time::Duration;
    use tempfile::TempDir;

    const JOB: &str = "https://hpc.test/jobs/1";

    fn manager(remote: Arc<FakeRemote>, storage: Arc<RecordingStorage>) -> StagingManager {
        StagingManager::new(remote, Arc::new(LocalFilesystem::new()), storage)
    }

    fn creds() -> Credentials {
        Credentials::new("token")
    }

    fn output_listing() -> FakeRemote {
        FakeRemote::new().with_listing(
            JOB,
            OUTPUT_FOLDER,
            &[
                ("a.txt", RemoteEntryKind::File, b"alpha".as_slice()),
                ("sub/", RemoteEntryKind::Directory, b"".as_slice()),
                ("b.txt", RemoteEntryKind::File, b"beta".as_slice()),
            ],
        )
    }

    #[tokio::test]
    async fn stage_outputs_copies_files_and_skips_directories() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("op-1");
        let staging = manager(Arc::new(output_listing()), Arc::new(RecordingStorage::plain()));

        let staged = staging
            .stage_outputs(&RemoteJobHandle::from_url(JOB), OUTPUT_FOLDER, &destination, &creds())
            .await
            .expect("staging succeeds");

        assert_eq!(
            staged,
            vec![destination.join("a.txt"), destination.join("b.txt")]
        );
        assert_eq!(std::fs::read(destination.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(destination.join("b.txt")).unwrap(), b"beta");
        assert!(!destination.join("sub").exists());
    }

    #[tokio::test]
    async fn stage_outputs_overwrites_existing_files_on_rerun() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().to_path_buf();
        std::fs::write(destination.join("a.txt"), b"stale").unwrap();
        let staging = manager(Arc::new(output_listing()), Arc::new(RecordingStorage::plain()));
        let handle = RemoteJobHandle::from_url(JOB);

        let first = staging
            .stage_outputs(&handle, OUTPUT_FOLDER, &destination, &creds())
            .await
            .unwrap();
        let second = staging
            .stage_outputs(&handle, OUTPUT_FOLDER, &destination, &creds())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.len(), 2);
        assert_eq!(std::fs::read(destination.join("a.txt")).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn stage_outputs_fails_on_download_error_and_keeps_earlier_files() {
        let dir = TempDir::new().unwrap();
        let remote = output_listing().with_failing_download("b.txt");
        let staging = manager(Arc::new(remote), Arc::new(RecordingStorage::plain()));

        let err = staging
            .stage_outputs(&RemoteJobHandle::from_url(JOB), OUTPUT_FOLDER, dir.path(), &creds())
            .await
            .expect_err("download failure should surface");

        assert_eq!(err.kind(), AppErrorKind::Staging);
        assert!(err.message().contains("b.txt"));
        assert!(dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn stage_outputs_surfaces_missing_remote_directory() {
        let dir = TempDir::new().unwrap();
        let staging = manager(Arc::new(FakeRemote::new()), Arc::new(RecordingStorage::plain()));

        let err = staging
            .stage_outputs(&RemoteJobHandle::from_url(JOB), OUTPUT_FOLDER, dir.path(), &creds())
            .await
            .expect_err("missing directory");

        assert_eq!(err.kind(), AppErrorKind::DirectoryNotFound);
    }

    #[tokio::test]
    async fn salvage_logs_tolerates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new().with_listing(
            JOB,
            WORKING_DIR_ROOT,
            &[("stderr", RemoteEntryKind::File, b"boom".as_slice())],
        );
        let staging = manager(Arc::new(remote), Arc::new(RecordingStorage::plain()));
        let handles = vec![
            RemoteJobHandle::from_url(JOB),
            RemoteJobHandle::from_url("https://hpc.test/jobs/missing"),
        ];

        let salvaged = staging.salvage_logs(&handles, dir.path(), &creds()).await;

        assert_eq!(
            salvaged,
            vec![dir.path().join(LOGS_FOLDER).join("stage_1").join("stderr")]
        );
    }

    #[tokio::test]
    async fn project_scope_is_transparent_without_encryption() {
        let storage = Arc::new(RecordingStorage::plain());
        let staging = manager(Arc::new(FakeRemote::new()), storage.clone());

        let value = staging
            .with_project_scope("demo", async { Ok(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn project_scope_releases_after_success_and_failure() {
        let storage = Arc::new(RecordingStorage::encrypted());
        let staging = manager(Arc::new(FakeRemote::new()), storage.clone());

        staging
            .with_project_scope("demo", async { Ok(()) })
            .await
            .unwrap();
        let err = staging
            .with_project_scope("demo", async {
                Err::<(), _>(AppError::staging("download failed"))
            })
            .await
            .expect_err("work error is returned");

        assert_eq!(err.kind(), AppErrorKind::Staging);
        assert_eq!(staging.project_locks.len(), 0);
        let expected = ["increment:demo", "sync:demo", "sync:demo", "inactive:demo"];
        let calls = storage.calls();
        assert_eq!(calls[..4], expected);
        assert_eq!(calls[4..], expected);
    }

    #[tokio::test]
    async fn project_scope_releases_when_acquire_fails() {
        let storage = Arc::new(RecordingStorage::encrypted().failing_increment());
        let staging = manager(Arc::new(FakeRemote::new()), storage.clone());
        let ran = std::sync::atomic::AtomicBool::new(false);

        let result = staging
            .with_project_scope("demo", async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.is_err());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(storage.calls(), vec!["sync:demo", "inactive:demo"]);
    }

    #[tokio::test]
    async fn project_scope_serializes_the_same_project() {
        let storage = Arc::new(RecordingStorage::encrypted());
        let staging = manager(Arc::new(FakeRemote::new()), storage.clone());

        let work = |label: &'static str| {
            let storage = storage.clone();
            async move {
                storage.record(format!("start:{label}"));
                tokio::time::sleep(Duration::from_millis(20)).await;
                storage.record(format!("end:{label}"));
                Ok(())
            }
        };
        let (a, b) = tokio::join!(
            staging.with_project_scope("demo", work("a")),
            staging.with_project_scope("demo", work("b")),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(staging.project_locks.len(), 0);
        let calls = storage.calls();
        let first_end = calls.iter().position(|c| c.starts_with("end:")).unwrap();
        let second_start = calls
            .iter()
            .rposition(|c| c.starts_with("start:"))
            .unwrap();
        assert!(first_end < second_start, "scopes interleaved: {calls:?}");
    }
}
