// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    ClockPort, LocalFilesystemPort, OperationStorePort, RemoteExecutionPort, SecureStoragePort,
    TelemetryEvent, TelemetryPort, UsageStorePort,
};
use crate::app::services::quota::DiskBudget;
use crate::app::services::staging::{OUTPUT_FOLDER, StagingManager};
use crate::app::services::state_machine::{self, JobsOutcome, OperationEvent};
use crate::app::services::submissions::SubmissionRegistry;
use crate::app::types::{
    Credentials, JobSubmission, NewOperation, Operation, OperationFilter, OperationKind,
    OperationStatus, ProcessIdentifier, RemoteJobHandle, RemoteJobStatus, ResultArtifact,
};

const DEFAULT_MAX_PARALLEL_POLLS: usize = 4;
const DEFAULT_REMOTE_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Per-owner disk ceiling in bytes.
    pub disk_quota_bytes: i64,
    pub max_parallel_polls: usize,
    pub remote_call_timeout: Duration,
}

impl Settings {
    pub fn with_quota(disk_quota_bytes: i64) -> Self {
        Self {
            disk_quota_bytes,
            max_parallel_polls: DEFAULT_MAX_PARALLEL_POLLS,
            remote_call_timeout: DEFAULT_REMOTE_CALL_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct UseCases {
    pub(crate) operations: Arc<dyn OperationStorePort>,
    pub(crate) usage: Arc<dyn UsageStorePort>,
    pub(crate) remote: Arc<dyn RemoteExecutionPort>,
    pub(crate) local_fs: Arc<dyn LocalFilesystemPort>,
    pub(crate) storage: Arc<dyn SecureStoragePort>,
    pub(crate) clock: Arc<dyn ClockPort>,
    pub(crate) telemetry: Arc<dyn TelemetryPort>,
    pub(crate) staging: StagingManager,
    pub(crate) submissions: SubmissionRegistry,
    pub(crate) settings: Settings,
}

impl UseCases {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operations: Arc<dyn OperationStorePort>,
        usage: Arc<dyn UsageStorePort>,
        remote: Arc<dyn RemoteExecutionPort>,
        local_fs: Arc<dyn LocalFilesystemPort>,
        storage: Arc<dyn SecureStoragePort>,
        clock: Arc<dyn ClockPort>,
        telemetry: Arc<dyn TelemetryPort>,
        settings: Settings,
    ) -> Self {
        let staging = StagingManager::new(remote.clone(), local_fs.clone(), storage.clone());
        Self {
            operations,
            usage,
            remote,
            local_fs,
            storage,
            clock,
            telemetry,
            staging,
            submissions: SubmissionRegistry::new(),
            settings,
        }
    }

    /// Remaining disk allowance for `owner` in bytes; negative when over quota.
    pub async fn available_space(&self, owner: &str) -> AppResult<i64> {
        Ok(self.disk_budget(owner).await?.available())
    }

    async fn disk_budget(&self, owner: &str) -> AppResult<DiskBudget> {
        Ok(DiskBudget {
            per_user_limit: self.settings.disk_quota_bytes,
            pending_usage: self.usage.pending_disk_usage(owner).await?,
            generated_usage: self.usage.generated_disk_usage(owner).await?,
        })
    }

    /// Creates a PENDING operation and submits its jobs in stage order.
    ///
    /// A submission failure leaves the operation PENDING and is returned to
    /// the caller; resubmitting is the caller's decision. A stop request that
    /// arrives meanwhile interrupts the remaining submissions.
    pub async fn launch_operation(
        &self,
        input: LaunchOperationInput,
        credentials: &Credentials,
    ) -> AppResult<i64> {
        input.validate()?;
        let budget = self.disk_budget(&input.owner).await?;
        if !budget.admits(input.required_disk_bytes) {
            return Err(AppError::with_message(
                AppErrorKind::QuotaExceeded,
                codes::QUOTA_EXCEEDED,
                format!(
                    "not enough disk space for {}: {} bytes available, {} required",
                    input.owner,
                    budget.available(),
                    input.required_disk_bytes
                ),
            ));
        }

        let operation_id = self
            .operations
            .insert_operation(&NewOperation {
                owner: input.owner.clone(),
                project: input.project.clone(),
                algorithm: input.algorithm.clone(),
                payload_reference: input.payload_reference.clone(),
                kind: input.kind,
                estimated_disk_size: input.required_disk_bytes,
            })
            .await?;
        self.telemetry.event(
            "operation_launched",
            TelemetryEvent {
                operation_id: Some(operation_id),
                owner: Some(input.owner.clone()),
                project: Some(input.project.clone()),
                algorithm: Some(input.algorithm.clone()),
                status: Some(OperationStatus::Pending.to_string()),
                detail: None,
            },
        );

        let guard = self.submissions.register(operation_id);
        for (stage, job) in input.jobs.iter().enumerate() {
            if guard.is_cancelled() {
                return Err(cancelled(operation_id));
            }
            tracing::info!("submitting job {} for operation {operation_id}", stage + 1);
            // A submit in flight runs to completion: the remote job may already
            // exist, and only its identifier lets it be aborted below.
            let handle = self
                .remote
                .submit(job, credentials)
                .await
                .inspect_err(|err| {
                    tracing::error!("submission failed for operation {operation_id}: {err}");
                })?;
            self.operations
                .save_process_identifier(operation_id, &handle.job_url)
                .await?;
            tracing::info!("job url {} for operation {operation_id}", handle.job_url);

            if guard.is_cancelled() {
                self.abort_best_effort(&handle, credentials).await;
                return Err(cancelled(operation_id));
            }
        }
        Ok(operation_id)
    }

    /// Moves a non-terminal operation to CANCELED right away, then asks the
    /// remote service to abort its jobs. Returns `false` when the operation
    /// was already terminal.
    pub async fn stop_operation(
        &self,
        operation_id: i64,
        credentials: &Credentials,
    ) -> AppResult<bool> {
        let Some(mut operation) = self.operations.get_operation(operation_id).await? else {
            return Err(AppError::not_found(format!(
                "operation {operation_id} does not exist"
            )));
        };
        if operation.status.is_terminal() {
            return Ok(false);
        }
        if self.submissions.cancel(operation_id) {
            tracing::info!("interrupting in-flight submission for operation {operation_id}");
        }
        if self
            .transition(&mut operation, OperationEvent::StopRequested, None)
            .await?
            .is_none()
        {
            return Ok(false);
        }

        for identifier in self.operations.get_process_identifiers(operation_id).await? {
            self.abort_best_effort(&identifier.handle(), credentials)
                .await;
        }
        Ok(true)
    }

    /// One reconciliation pass over every operation awaiting remote completion.
    /// Operations are reconciled independently; a failure on one never stops
    /// the others.
    pub async fn check_operations(
        &self,
        filter: &OperationFilter,
        credentials: &Credentials,
    ) -> AppResult<PassSummary> {
        let operations = self.operations.list_due_operations(filter).await?;
        if operations.is_empty() {
            return Ok(PassSummary::default());
        }
        let parallelism = self.settings.max_parallel_polls.max(1);
        let outcomes: Vec<ReconcileOutcome> = futures::stream::iter(operations)
            .map(|operation| self.reconcile_isolated(operation, credentials))
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut summary = PassSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }
        tracing::debug!(?summary, "reconciliation pass complete");
        Ok(summary)
    }

    async fn reconcile_isolated(
        &self,
        operation: Operation,
        credentials: &Credentials,
    ) -> ReconcileOutcome {
        let operation_id = operation.id;
        tracing::info!("start processing operation {operation_id}");
        let result = AssertUnwindSafe(self.reconcile_operation(&operation, credentials))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(AppError::with_message(
                    AppErrorKind::Internal,
                    codes::INTERNAL_ERROR,
                    "reconciliation panicked",
                ))
            });

        match result {
            Ok(outcome) => outcome,
            Err(err) if err.is_retryable() => {
                tracing::warn!("operation {operation_id} deferred to next pass: {err}");
                ReconcileOutcome::Deferred
            }
            Err(err) => {
                tracing::error!("error while reconciling operation {operation_id}: {err}");
                match self.fail_operation(operation_id, &err).await {
                    Ok(true) => ReconcileOutcome::Failed,
                    Ok(false) => ReconcileOutcome::Unchanged,
                    Err(store_err) => {
                        tracing::warn!(
                            "could not record failure of operation {operation_id}: {store_err}"
                        );
                        ReconcileOutcome::Deferred
                    }
                }
            }
        }
    }

    async fn reconcile_operation(
        &self,
        operation: &Operation,
        credentials: &Credentials,
    ) -> AppResult<ReconcileOutcome> {
        let identifiers = self
            .operations
            .get_process_identifiers(operation.id)
            .await?;
        let expected = operation.kind.expected_jobs();
        if identifiers.len() < expected {
            tracing::info!(
                "for the moment {} of {expected} jobs started for operation {}",
                identifiers.len(),
                operation.id
            );
            return Ok(ReconcileOutcome::Incomplete);
        }
        let handles: Vec<RemoteJobHandle> =
            identifiers.iter().map(ProcessIdentifier::handle).collect();

        let mut statuses = Vec::with_capacity(handles.len());
        for handle in &handles {
            let status = self.poll_with_timeout(handle, credentials).await?;
            tracing::info!(
                operation_id = operation.id,
                job_url = %handle.job_url,
                status = %status,
                "remote job status"
            );
            statuses.push(status);
        }
        let Some(outcome) = JobsOutcome::from_statuses(&statuses) else {
            return Ok(ReconcileOutcome::Unchanged);
        };

        let mut operation = operation.clone();
        match outcome {
            JobsOutcome::Running { .. } => {
                let started = self
                    .transition(&mut operation, OperationEvent::Jobs(outcome), None)
                    .await?;
                Ok(match started {
                    Some(_) => ReconcileOutcome::Started,
                    None => ReconcileOutcome::Unchanged,
                })
            }
            JobsOutcome::Succeeded => {
                self.transition(&mut operation, OperationEvent::Jobs(outcome), None)
                    .await?;
                if operation.status != OperationStatus::Started {
                    return Ok(ReconcileOutcome::Unchanged);
                }
                match self.stage_results(&operation, &handles, credentials).await {
                    Ok(artifacts) => {
                        tracing::info!(
                            "staged {} result files for operation {}",
                            artifacts.len(),
                            operation.id
                        );
                        self.settle(&mut operation, OperationEvent::StagingCompleted, None)
                            .await
                    }
                    Err(err) => {
                        tracing::error!("staging failed for operation {}: {err}", operation.id);
                        self.salvage_logs(&operation, &handles, credentials).await;
                        self.settle(
                            &mut operation,
                            OperationEvent::StagingFailed,
                            Some(err.to_string()),
                        )
                        .await
                    }
                }
            }
            JobsOutcome::Failed => {
                self.salvage_logs(&operation, &handles, credentials).await;
                let detail = describe_failure(&handles, &statuses);
                self.settle(&mut operation, OperationEvent::Jobs(outcome), Some(detail))
                    .await
            }
        }
    }

    async fn poll_with_timeout(
        &self,
        handle: &RemoteJobHandle,
        credentials: &Credentials,
    ) -> AppResult<RemoteJobStatus> {
        let poll = tokio::time::timeout(
            self.settings.remote_call_timeout,
            self.remote.poll_status(handle, credentials),
        )
        .await
        .map_err(|_| {
            AppError::transient(format!("status query timed out for {}", handle.job_url))
        })??;
        Ok(poll.status)
    }

    async fn stage_results(
        &self,
        operation: &Operation,
        handles: &[RemoteJobHandle],
        credentials: &Credentials,
    ) -> AppResult<Vec<ResultArtifact>> {
        let Some(final_stage) = handles.last() else {
            return Err(AppError::staging("operation has no remote job"));
        };
        let destination = self.operation_folder(operation)?;
        let files = self
            .staging
            .with_project_scope(
                &operation.project,
                self.staging
                    .stage_outputs(final_stage, OUTPUT_FOLDER, &destination, credentials),
            )
            .await?;

        let mut artifacts = Vec::with_capacity(files.len());
        for path in files {
            let size = self
                .local_fs
                .file_size(&path)
                .await
                .map_err(|err| AppError::staging(err.message().to_string()))?;
            artifacts.push(ResultArtifact {
                operation_id: operation.id,
                path: path.to_string_lossy().to_string(),
                size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
            });
        }
        self.operations.record_result_artifacts(&artifacts).await?;
        Ok(artifacts)
    }

    async fn salvage_logs(
        &self,
        operation: &Operation,
        handles: &[RemoteJobHandle],
        credentials: &Credentials,
    ) {
        let destination = match self.operation_folder(operation) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!("no folder to salvage logs of operation {}: {err}", operation.id);
                return;
            }
        };
        let salvaged = self
            .staging
            .with_project_scope(&operation.project, async {
                Ok(self
                    .staging
                    .salvage_logs(handles, &destination, credentials)
                    .await)
            })
            .await;
        match salvaged {
            Ok(files) => tracing::info!(
                "salvaged {} log files for operation {}",
                files.len(),
                operation.id
            ),
            Err(err) => tracing::warn!("log salvage skipped for operation {}: {err}", operation.id),
        }
    }

    async fn fail_operation(&self, operation_id: i64, err: &AppError) -> AppResult<bool> {
        let Some(mut operation) = self.operations.get_operation(operation_id).await? else {
            return Ok(false);
        };
        Ok(self
            .transition(
                &mut operation,
                OperationEvent::ReconcileFailed,
                Some(err.to_string()),
            )
            .await?
            .is_some())
    }

    async fn settle(
        &self,
        operation: &mut Operation,
        event: OperationEvent,
        detail: Option<String>,
    ) -> AppResult<ReconcileOutcome> {
        Ok(match self.transition(operation, event, detail).await? {
            Some(OperationStatus::Finished) => ReconcileOutcome::Finished,
            Some(OperationStatus::Error) => ReconcileOutcome::Failed,
            _ => ReconcileOutcome::Unchanged,
        })
    }

    /// Applies `event` and persists the result. The store refuses to
    /// overwrite a terminal row, which keeps concurrent passes from applying
    /// a terminal transition twice.
    async fn transition(
        &self,
        operation: &mut Operation,
        event: OperationEvent,
        detail: Option<String>,
    ) -> AppResult<Option<OperationStatus>> {
        let now = self.clock.now_rfc3339();
        let Some(next) = state_machine::apply(operation, event, &now) else {
            return Ok(None);
        };
        if next == OperationStatus::Error {
            operation.error_message = detail.clone();
        }
        if !self.operations.save_operation(operation).await? {
            tracing::info!(
                "operation {} is already terminal in the store; dropping {next}",
                operation.id
            );
            if let Some(stored) = self.operations.get_operation(operation.id).await? {
                *operation = stored;
            }
            return Ok(None);
        }

        let name = match next {
            OperationStatus::Pending => "operation_pending",
            OperationStatus::Started => "operation_started",
            OperationStatus::Finished => "operation_finished",
            OperationStatus::Error => "operation_failed",
            OperationStatus::Canceled => "operation_canceled",
        };
        self.telemetry.event(
            name,
            TelemetryEvent {
                operation_id: Some(operation.id),
                owner: Some(operation.owner.clone()),
                project: Some(operation.project.clone()),
                algorithm: Some(operation.algorithm.clone()),
                status: Some(next.to_string()),
                detail,
            },
        );
        Ok(Some(next))
    }

    async fn abort_best_effort(&self, handle: &RemoteJobHandle, credentials: &Credentials) {
        if let Err(err) = self.remote.abort(handle, credentials).await {
            tracing::warn!("failed to abort remote job {}: {err}", handle.job_url);
        }
    }

    fn operation_folder(&self, operation: &Operation) -> AppResult<PathBuf> {
        Ok(self
            .storage
            .project_folder(&operation.project)?
            .join(operation.id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOperationInput {
    pub owner: String,
    pub project: String,
    pub algorithm: String,
    pub payload_reference: Option<String>,
    pub kind: OperationKind,
    pub required_disk_bytes: i64,
    /// One job per stage, in stage order.
    pub jobs: Vec<JobSubmission>,
}

impl LaunchOperationInput {
    fn validate(&self) -> AppResult<()> {
        if self.owner.trim().is_empty() {
            return Err(AppError::invalid_argument("owner must not be empty"));
        }
        if self.project.trim().is_empty() {
            return Err(AppError::invalid_argument("project must not be empty"));
        }
        if self.required_disk_bytes < 0 {
            return Err(AppError::invalid_argument(
                "required disk size must not be negative",
            ));
        }
        let expected = self.kind.expected_jobs();
        if self.jobs.len() != expected {
            return Err(AppError::invalid_argument(format!(
                "a {} operation needs {expected} job(s), got {}",
                self.kind.as_str(),
                self.jobs.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconcileOutcome {
    Unchanged,
    Started,
    Finished,
    Failed,
    /// Not all jobs of the operation are submitted yet.
    Incomplete,
    /// A retryable error; the operation is left for the next pass.
    Deferred,
}

/// Counts of what one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub checked: usize,
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
    pub unchanged: usize,
    pub incomplete: usize,
    pub deferred: usize,
}

impl PassSummary {
    fn record(&mut self, outcome: ReconcileOutcome) {
        self.checked += 1;
        match outcome {
            ReconcileOutcome::Unchanged => self.unchanged += 1,
            ReconcileOutcome::Started => self.started += 1,
            ReconcileOutcome::Finished => self.finished += 1,
            ReconcileOutcome::Failed => self.failed += 1,
            ReconcileOutcome::Incomplete => self.incomplete += 1,
            ReconcileOutcome::Deferred => self.deferred += 1,
        }
    }
}

fn cancelled(operation_id: i64) -> AppError {
    AppError::with_message(
        AppErrorKind::Cancelled,
        codes::CANCELED,
        format!("operation {operation_id} was stopped during submission"),
    )
}

fn describe_failure(handles: &[RemoteJobHandle], statuses: &[RemoteJobStatus]) -> String {
    let failed: Vec<&str> = handles
        .iter()
        .zip(statuses)
        .filter(|(_, status)| **status == RemoteJobStatus::Failed)
        .map(|(handle, _)| handle.job_url.as_str())
        .collect();
    format!("remote job failed: {}", failed.join(", "))
}
