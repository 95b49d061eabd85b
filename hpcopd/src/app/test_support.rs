// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Scripted collaborators shared by the core's unit tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::Notify;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ClockPort, RemoteExecutionPort, SecureStoragePort};
use crate::app::types::{
    Credentials, JobPoll, JobSubmission, RemoteEntry, RemoteEntryKind, RemoteJobHandle,
    RemoteJobStatus,
};

#[derive(Default)]
pub struct FakeRemote {
    statuses: Mutex<HashMap<String, VecDeque<AppResult<RemoteJobStatus>>>>,
    listings: Mutex<HashMap<(String, String), BTreeMap<String, RemoteEntry>>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    failing_downloads: Mutex<HashSet<String>>,
    submit_results: Mutex<VecDeque<AppResult<RemoteJobHandle>>>,
    submitted: Mutex<Vec<JobSubmission>>,
    submit_gate: Option<Arc<Notify>>,
    hanging_polls: HashSet<String>,
    panicking_polls: HashSet<String>,
    polls: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
    abort_error: Option<AppError>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(self, job_url: &str, status: RemoteJobStatus) -> Self {
        self.push_poll(job_url, Ok(status));
        self
    }

    pub fn with_poll_error(self, job_url: &str, err: AppError) -> Self {
        self.push_poll(job_url, Err(err));
        self
    }

    pub fn with_listing(
        self,
        job_url: &str,
        subdirectory: &str,
        entries: &[(&str, RemoteEntryKind, &[u8])],
    ) -> Self {
        let mut listing = BTreeMap::new();
        for (path, kind, content) in entries {
            let url = format!("{job_url}/files/{subdirectory}/{path}");
            listing.insert(
                path.to_string(),
                RemoteEntry {
                    path: path.to_string(),
                    url: url.clone(),
                    kind: *kind,
                    size: Some(content.len() as u64),
                },
            );
            if *kind == RemoteEntryKind::File {
                lock(&self.contents).insert(url, content.to_vec());
            }
        }
        lock(&self.listings).insert((job_url.to_string(), subdirectory.to_string()), listing);
        self
    }

    pub fn with_failing_download(self, path: &str) -> Self {
        lock(&self.failing_downloads).insert(path.to_string());
        self
    }

    pub fn with_submit_result(self, result: AppResult<RemoteJobHandle>) -> Self {
        lock(&self.submit_results).push_back(result);
        self
    }

    /// Each submission records itself, then waits for one `notify_one` on `gate`.
    pub fn with_submit_gate(mut self, gate: Arc<Notify>) -> Self {
        self.submit_gate = Some(gate);
        self
    }

    /// Status queries for `job_url` never answer.
    pub fn with_hanging_poll(mut self, job_url: &str) -> Self {
        self.hanging_polls.insert(job_url.to_string());
        self
    }

    /// Status queries for `job_url` panic.
    pub fn with_panicking_poll(mut self, job_url: &str) -> Self {
        self.panicking_polls.insert(job_url.to_string());
        self
    }

    pub fn with_abort_error(mut self, err: AppError) -> Self {
        self.abort_error = Some(err);
        self
    }

    /// Replaces whatever is scripted for `job_url` with a fixed status.
    pub fn set_status(&self, job_url: &str, status: RemoteJobStatus) {
        lock(&self.statuses).insert(job_url.to_string(), VecDeque::from([Ok(status)]));
    }

    pub fn submitted(&self) -> Vec<JobSubmission> {
        lock(&self.submitted).clone()
    }

    pub fn polls(&self) -> Vec<String> {
        lock(&self.polls).clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        lock(&self.aborted).clone()
    }

    fn push_poll(&self, job_url: &str, result: AppResult<RemoteJobStatus>) {
        lock(&self.statuses)
            .entry(job_url.to_string())
            .or_default()
            .push_back(result);
    }
}

#[async_trait]
impl RemoteExecutionPort for FakeRemote {
    async fn submit(
        &self,
        submission: &JobSubmission,
        _credentials: &Credentials,
    ) -> AppResult<RemoteJobHandle> {
        let count = {
            let mut submitted = lock(&self.submitted);
            submitted.push(submission.clone());
            submitted.len()
        };
        if let Some(gate) = &self.submit_gate {
            gate.notified().await;
        }
        lock(&self.submit_results)
            .pop_front()
            .unwrap_or_else(|| Ok(RemoteJobHandle::from_url(format!("https://hpc.test/jobs/{count}"))))
    }

    async fn poll_status(
        &self,
        handle: &RemoteJobHandle,
        _credentials: &Credentials,
    ) -> AppResult<JobPoll> {
        lock(&self.polls).push(handle.job_url.clone());
        if self.hanging_polls.contains(&handle.job_url) {
            std::future::pending::<()>().await;
        }
        if self.panicking_polls.contains(&handle.job_url) {
            panic!("status decoder blew up on {}", handle.job_url);
        }
        let mut statuses = lock(&self.statuses);
        let Some(queue) = statuses.get_mut(&handle.job_url) else {
            return Err(AppError::not_found(format!("job {} not found", handle.job_url)));
        };
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(result) => result.map(JobPoll::from),
            None => Err(AppError::not_found(format!("job {} not found", handle.job_url))),
        }
    }

    async fn list_remote_files(
        &self,
        handle: &RemoteJobHandle,
        subdirectory: &str,
        _credentials: &Credentials,
    ) -> AppResult<BTreeMap<String, RemoteEntry>> {
        lock(&self.listings)
            .get(&(handle.job_url.clone(), subdirectory.to_string()))
            .cloned()
            .ok_or_else(|| AppError::directory_not_found(subdirectory))
    }

    async fn download(
        &self,
        entry: &RemoteEntry,
        local_path: &Path,
        _credentials: &Credentials,
    ) -> AppResult<()> {
        if lock(&self.failing_downloads).contains(&entry.path) {
            return Err(AppError::transient(format!("connection reset on {}", entry.url)));
        }
        let content = lock(&self.contents)
            .get(&entry.url)
            .cloned()
            .ok_or_else(|| AppError::not_found(entry.url.clone()))?;
        tokio::fs::write(local_path, content)
            .await
            .map_err(|err| AppError::local(err.to_string()))
    }

    async fn abort(&self, handle: &RemoteJobHandle, _credentials: &Credentials) -> AppResult<()> {
        lock(&self.aborted).push(handle.job_url.clone());
        match &self.abort_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Secure storage double that records every call as `action:project`.
pub struct RecordingStorage {
    encrypted: bool,
    root: PathBuf,
    fail_increment: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingStorage {
    pub fn plain() -> Self {
        Self::new(false, std::env::temp_dir().join("hpcopd-tests"))
    }

    pub fn encrypted() -> Self {
        Self::new(true, std::env::temp_dir().join("hpcopd-tests"))
    }

    pub fn new(encrypted: bool, root: PathBuf) -> Self {
        Self {
            encrypted,
            root,
            fail_increment: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_increment(mut self) -> Self {
        self.fail_increment = true;
        self
    }

    pub fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn label(folder: &Path) -> String {
        folder
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SecureStoragePort for RecordingStorage {
    fn encryption_enabled(&self) -> bool {
        self.encrypted
    }

    fn project_folder(&self, project: &str) -> AppResult<PathBuf> {
        Ok(self.root.join(project))
    }

    async fn increment_usage(&self, folder: &Path) -> AppResult<()> {
        if self.fail_increment {
            return Err(AppError::local("usage counter unavailable"));
        }
        self.record(format!("increment:{}", Self::label(folder)));
        Ok(())
    }

    async fn sync(&self, folder: &Path) -> AppResult<()> {
        self.record(format!("sync:{}", Self::label(folder)));
        Ok(())
    }

    async fn set_inactive(&self, project: &str) -> AppResult<()> {
        self.record(format!("inactive:{project}"));
        Ok(())
    }
}

pub struct FixedClock;

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        datetime!(2026-03-01 12:00 UTC)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("test fake lock")
}
