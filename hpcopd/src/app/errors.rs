// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const SUBMISSION_FAILED: &str = "submission_failed";
    pub const TRANSIENT_POLL_FAILURE: &str = "transient_poll_failure";
    pub const NOT_FOUND: &str = "not_found";
    pub const DIRECTORY_NOT_FOUND: &str = "directory_not_found";
    pub const STAGING_FAILED: &str = "staging_failed";
    pub const QUOTA_EXCEEDED: &str = "quota_exceeded";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const CONFLICT: &str = "conflict";
    pub const CANCELED: &str = "canceled";
    pub const STORE_ERROR: &str = "store_error";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    /// The remote service rejected the job description or an upload failed.
    Submission,
    /// Network or timeout failure while querying remote state.
    TransientPoll,
    /// The remote job no longer exists.
    NotFound,
    /// A remote working-directory path does not exist.
    DirectoryNotFound,
    /// Downloading or copying results failed.
    Staging,
    /// Not enough disk allowance left for the owner.
    QuotaExceeded,
    InvalidArgument,
    Conflict,
    Cancelled,
    Store,
    Internal,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Errors that say nothing about the operation itself and are retried on
    /// the next pass instead of failing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, AppErrorKind::TransientPoll | AppErrorKind::Store)
    }

    pub fn submission(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Submission, codes::SUBMISSION_FAILED, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::TransientPoll,
            codes::TRANSIENT_POLL_FAILURE,
            message,
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, message)
    }

    pub fn directory_not_found(path: &str) -> Self {
        Self::with_message(
            AppErrorKind::DirectoryNotFound,
            codes::DIRECTORY_NOT_FOUND,
            format!("folder {path} is not present on HPC storage"),
        )
    }

    pub fn staging(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Staging, codes::STAGING_FAILED, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::InvalidArgument,
            codes::INVALID_ARGUMENT,
            message,
        )
    }

    pub fn local(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Internal, codes::LOCAL_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_when_present() {
        let err = AppError::staging("download failed").with_context("a.txt");
        assert_eq!(err.to_string(), "download failed (a.txt)");
        assert_eq!(err.code(), codes::STAGING_FAILED);
    }

    #[test]
    fn only_transient_and_store_errors_are_retryable() {
        assert!(AppError::transient("timeout").is_retryable());
        assert!(AppError::new(AppErrorKind::Store, codes::STORE_ERROR).is_retryable());
        assert!(!AppError::not_found("gone").is_retryable());
        assert!(!AppError::directory_not_found("/output").is_retryable());
        assert!(!AppError::staging("io").is_retryable());
    }
}
