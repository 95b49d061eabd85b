// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use thiserror::Error;

use crate::app::errors::{AppError, AppErrorKind, codes};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered {status}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("no Location header in job creation response from {url}")]
    MissingLocation { url: String },
    #[error("site {site} is not listed in the registry")]
    UnknownSite { site: String },
    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("timed out waiting for {url}")]
    Timeout { url: String },
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which gateway call produced an error; decides how it is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCall {
    Submit,
    Poll,
    List,
    Download,
    Abort,
}

impl GatewayError {
    fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    fn is_gone(&self) -> bool {
        matches!(self.status(), Some(404 | 410))
    }

    /// Translates a gateway failure into the core's error taxonomy. `target`
    /// names the directory for listings and the resource otherwise.
    pub fn into_app(self, call: RemoteCall, target: &str) -> AppError {
        let message = self.to_string();
        match (call, &self) {
            (RemoteCall::Submit, _) => AppError::submission(message),
            (RemoteCall::List, _) if self.is_gone() => AppError::directory_not_found(target),
            (_, _) if self.is_gone() => AppError::not_found(format!("{target}: {message}")),
            (RemoteCall::Download, GatewayError::Io { .. }) => AppError::local(message),
            (_, GatewayError::Malformed { .. }) => AppError::with_message(
                AppErrorKind::Internal,
                codes::REMOTE_ERROR,
                message,
            ),
            _ => AppError::transient(message).with_context(target.to_string()),
        }
    }
}
