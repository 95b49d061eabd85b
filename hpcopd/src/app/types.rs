// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Local status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Started,
    Finished,
    Error,
    Canceled,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Started => "STARTED",
            OperationStatus::Finished => "FINISHED",
            OperationStatus::Error => "ERROR",
            OperationStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Finished | OperationStatus::Error | OperationStatus::Canceled
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "STARTED" => Ok(Self::Started),
            "FINISHED" => Ok(Self::Finished),
            "ERROR" => Ok(Self::Error),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(format!("unknown operation status: {other}")),
        }
    }
}

/// Shape of the remote work behind an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A single remote job.
    Simulation,
    /// Two dependent remote jobs, stage A feeding stage B.
    Pipeline,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Simulation => "simulation",
            OperationKind::Pipeline => "pipeline",
        }
    }

    pub fn expected_jobs(self) -> usize {
        match self {
            OperationKind::Simulation => 1,
            OperationKind::Pipeline => 2,
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulation" => Ok(Self::Simulation),
            "pipeline" => Ok(Self::Pipeline),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// Payload for creating an operation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
    pub owner: String,
    pub project: String,
    pub algorithm: String,
    /// Handle of the payload the job computes on, e.g. a simulator configuration id.
    pub payload_reference: Option<String>,
    pub kind: OperationKind,
    /// Declared disk requirement in bytes, counted against the owner's quota while in flight.
    pub estimated_disk_size: i64,
}

/// Stored operation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: i64,
    pub owner: String,
    pub project: String,
    pub algorithm: String,
    pub payload_reference: Option<String>,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub estimated_disk_size: i64,
    pub created_at: String,         // RFC3339
    pub started_at: Option<String>, // RFC3339
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

/// Ordered link between an operation and one of its remote jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentifier {
    pub id: i64,
    pub operation_id: i64,
    pub job_url: String,
}

impl ProcessIdentifier {
    pub fn handle(&self) -> RemoteJobHandle {
        RemoteJobHandle::from_url(self.job_url.clone())
    }
}

/// Reference to a job accepted by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobHandle {
    pub job_url: String,
    /// Working directory resource; resolved from the job when absent.
    pub working_dir: Option<String>,
}

impl RemoteJobHandle {
    pub fn from_url(job_url: impl Into<String>) -> Self {
        Self {
            job_url: job_url.into(),
            working_dir: None,
        }
    }
}

/// Remote-side job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteJobStatus {
    Stagingin,
    Ready,
    Queued,
    Running,
    Stagingout,
    Successful,
    Failed,
    /// Reported while the service cannot tell the state, and used for any
    /// status this build does not know. Treated as still running.
    Undefined,
}

impl RemoteJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteJobStatus::Stagingin => "STAGINGIN",
            RemoteJobStatus::Ready => "READY",
            RemoteJobStatus::Queued => "QUEUED",
            RemoteJobStatus::Running => "RUNNING",
            RemoteJobStatus::Stagingout => "STAGINGOUT",
            RemoteJobStatus::Successful => "SUCCESSFUL",
            RemoteJobStatus::Failed => "FAILED",
            RemoteJobStatus::Undefined => "UNDEFINED",
        }
    }

    /// Only SUCCESSFUL and FAILED end a job.
    pub fn is_running(self) -> bool {
        !matches!(self, RemoteJobStatus::Successful | RemoteJobStatus::Failed)
    }

    /// The job has left the queue and holds compute resources.
    pub fn is_executing(self) -> bool {
        matches!(self, RemoteJobStatus::Ready | RemoteJobStatus::Running)
    }
}

impl fmt::Display for RemoteJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STAGINGIN" => Ok(Self::Stagingin),
            "READY" => Ok(Self::Ready),
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "UNDEFINED" => Ok(Self::Undefined),
            "STAGINGOUT" => Ok(Self::Stagingout),
            "SUCCESSFUL" => Ok(Self::Successful),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown remote job status: {other}")),
        }
    }
}

/// Result of a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPoll {
    pub status: RemoteJobStatus,
    pub is_running: bool,
}

impl From<RemoteJobStatus> for JobPoll {
    fn from(status: RemoteJobStatus) -> Self {
        Self {
            status,
            is_running: status.is_running(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEntryKind {
    File,
    Directory,
}

/// One entry of a remote working-directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path relative to the working directory, without a leading slash.
    pub path: String,
    /// Resource URL used to download the entry.
    pub url: String,
    pub kind: RemoteEntryKind,
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn is_file(&self) -> bool {
        self.kind == RemoteEntryKind::File
    }
}

/// Opaque access token for the remote service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Everything the gateway needs to submit one remote job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSubmission {
    pub script: Option<PathBuf>,
    pub inputs: Vec<PathBuf>,
    /// Job description posted to the remote service.
    pub job_config: serde_json::Value,
    /// Destination subfolder for inputs; `None` uses the default data folder.
    pub inputs_subfolder: Option<String>,
}

/// Restricts which in-flight operations a reconciliation pass looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationFilter {
    pub algorithms: Option<Vec<String>>,
    pub owner: Option<String>,
}

/// A staged result file registered against its operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultArtifact {
    pub operation_id: i64,
    pub path: String,
    pub size_bytes: i64,
}
