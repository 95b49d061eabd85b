// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{Credentials, JobPoll, JobSubmission, RemoteEntry, RemoteJobHandle};

#[async_trait]
/// Remote execution service boundary.
/// Every call is a network round trip bounded by the adapter's per-call timeout.
pub trait RemoteExecutionPort: Send + Sync {
    /// Posts the job description, then uploads the script and inputs (in that
    /// order) into the job's working directory. Uploads are not rolled back
    /// when a later one fails.
    async fn submit(
        &self,
        submission: &JobSubmission,
        credentials: &Credentials,
    ) -> AppResult<RemoteJobHandle>;

    /// Pure status query. Network trouble is `TransientPoll`, a vanished job is `NotFound`.
    async fn poll_status(
        &self,
        handle: &RemoteJobHandle,
        credentials: &Credentials,
    ) -> AppResult<JobPoll>;

    /// Lists `subdirectory` of the job's working directory, keyed by relative path.
    /// A missing path is `DirectoryNotFound`.
    async fn list_remote_files(
        &self,
        handle: &RemoteJobHandle,
        subdirectory: &str,
        credentials: &Credentials,
    ) -> AppResult<BTreeMap<String, RemoteEntry>>;

    /// Downloads one file entry, overwriting `local_path`.
    async fn download(
        &self,
        entry: &RemoteEntry,
        local_path: &Path,
        credentials: &Credentials,
    ) -> AppResult<()>;

    async fn abort(&self, handle: &RemoteJobHandle, credentials: &Credentials) -> AppResult<()>;
}
