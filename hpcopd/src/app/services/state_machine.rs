// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Local operation lifecycle.
//!
//! ```text
//! create -> PENDING -> STARTED -> FINISHED
//!              |          |
//!              +----------+--> ERROR | CANCELED
//! ```
//!
//! Terminal states are sticky: every event applied to a terminal operation is
//! a no-op, so replaying a transition is always safe.

use crate::app::types::{Operation, OperationStatus, RemoteJobStatus};

/// Aggregate view of all remote jobs of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobsOutcome {
    /// At least one job is still running.
    Running { any_ready: bool },
    /// Every job reported SUCCESSFUL.
    Succeeded,
    /// Every job is terminal and at least one reported FAILED.
    Failed,
}

impl JobsOutcome {
    /// `None` when there is nothing to aggregate.
    pub fn from_statuses(statuses: &[RemoteJobStatus]) -> Option<Self> {
        if statuses.is_empty() {
            return None;
        }
        if statuses.iter().any(|status| status.is_running()) {
            let any_ready = statuses.iter().any(|status| status.is_executing());
            return Some(Self::Running { any_ready });
        }
        if statuses
            .iter()
            .all(|status| *status == RemoteJobStatus::Successful)
        {
            Some(Self::Succeeded)
        } else {
            Some(Self::Failed)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationEvent {
    Jobs(JobsOutcome),
    StagingCompleted,
    StagingFailed,
    /// The remote side became unusable for this operation (job or directory vanished,
    /// unexpected failure while reconciling).
    ReconcileFailed,
    /// Explicit stop request; never produced by polling.
    StopRequested,
}

/// Target status for `event`, or `None` when the event causes no transition.
pub fn next_status(current: OperationStatus, event: OperationEvent) -> Option<OperationStatus> {
    use OperationStatus::{Canceled, Error, Finished, Pending, Started};

    match (current, event) {
        (Finished | Error | Canceled, _) => None,
        (Pending, OperationEvent::Jobs(JobsOutcome::Running { any_ready: true })) => Some(Started),
        (Pending | Started, OperationEvent::Jobs(JobsOutcome::Running { .. })) => None,
        // Results are only staged for started operations.
        (Pending, OperationEvent::Jobs(JobsOutcome::Succeeded)) => Some(Started),
        (Started, OperationEvent::Jobs(JobsOutcome::Succeeded)) => None,
        (Started, OperationEvent::StagingCompleted) => Some(Finished),
        (Pending, OperationEvent::StagingCompleted) => None,
        (
            Pending | Started,
            OperationEvent::Jobs(JobsOutcome::Failed)
            | OperationEvent::StagingFailed
            | OperationEvent::ReconcileFailed,
        ) => Some(Error),
        (Pending | Started, OperationEvent::StopRequested) => Some(Canceled),
    }
}

/// Applies `event` in place, stamping `now` on the matching timestamp.
/// Returns the new status when a transition happened.
pub fn apply(operation: &mut Operation, event: OperationEvent, now: &str) -> Option<OperationStatus> {
    let next = next_status(operation.status, event)?;
    operation.status = next;
    if next == OperationStatus::Started {
        operation.started_at = Some(now.to_string());
    } else {
        operation.completed_at = Some(now.to_string());
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::OperationKind;

    const ALL_EVENTS: [OperationEvent; 8] = [
        OperationEvent::Jobs(JobsOutcome::Running { any_ready: true }),
        OperationEvent::Jobs(JobsOutcome::Running { any_ready: false }),
        OperationEvent::Jobs(JobsOutcome::Succeeded),
        OperationEvent::Jobs(JobsOutcome::Failed),
        OperationEvent::StagingCompleted,
        OperationEvent::StagingFailed,
        OperationEvent::ReconcileFailed,
        OperationEvent::StopRequested,
    ];

    fn operation(status: OperationStatus) -> Operation {
        Operation {
            id: 1,
            owner: "alice".into(),
            project: "demo".into(),
            algorithm: "SimulatorAdapter".into(),
            payload_reference: None,
            kind: OperationKind::Simulation,
            status,
            estimated_disk_size: 0,
            created_at: "2026-01-01T00:00:00Z".into(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    #[test]
    fn terminal_statuses_ignore_every_event() {
        for status in [
            OperationStatus::Finished,
            OperationStatus::Error,
            OperationStatus::Canceled,
        ] {
            for event in ALL_EVENTS {
                assert_eq!(next_status(status, event), None, "{status} / {event:?}");
            }
        }
    }

    #[test]
    fn pending_starts_only_when_a_job_is_ready() {
        assert_eq!(
            next_status(
                OperationStatus::Pending,
                OperationEvent::Jobs(JobsOutcome::Running { any_ready: true })
            ),
            Some(OperationStatus::Started)
        );
        assert_eq!(
            next_status(
                OperationStatus::Pending,
                OperationEvent::Jobs(JobsOutcome::Running { any_ready: false })
            ),
            None
        );
        assert_eq!(
            next_status(
                OperationStatus::Started,
                OperationEvent::Jobs(JobsOutcome::Running { any_ready: true })
            ),
            None
        );
    }

    #[test]
    fn finish_requires_started_and_completed_staging() {
        assert_eq!(
            next_status(OperationStatus::Started, OperationEvent::StagingCompleted),
            Some(OperationStatus::Finished)
        );
        assert_eq!(
            next_status(OperationStatus::Pending, OperationEvent::StagingCompleted),
            None
        );
    }

    #[test]
    fn stop_cancels_non_terminal_operations() {
        assert_eq!(
            next_status(OperationStatus::Pending, OperationEvent::StopRequested),
            Some(OperationStatus::Canceled)
        );
        assert_eq!(
            next_status(OperationStatus::Started, OperationEvent::StopRequested),
            Some(OperationStatus::Canceled)
        );
    }

    #[test]
    fn apply_twice_is_a_no_op_the_second_time() {
        let mut op = operation(OperationStatus::Started);
        let first = apply(&mut op, OperationEvent::StagingFailed, "2026-01-02T00:00:00Z");
        assert_eq!(first, Some(OperationStatus::Error));
        let snapshot = op.clone();
        let second = apply(&mut op, OperationEvent::StagingFailed, "2026-01-03T00:00:00Z");
        assert_eq!(second, None);
        assert_eq!(op, snapshot);
    }

    #[test]
    fn apply_stamps_started_and_completed_timestamps() {
        let mut op = operation(OperationStatus::Pending);
        apply(
            &mut op,
            OperationEvent::Jobs(JobsOutcome::Running { any_ready: true }),
            "t1",
        );
        assert_eq!(op.started_at.as_deref(), Some("t1"));
        assert!(op.completed_at.is_none());
        apply(&mut op, OperationEvent::StagingCompleted, "t2");
        assert_eq!(op.status, OperationStatus::Finished);
        assert_eq!(op.completed_at.as_deref(), Some("t2"));
    }

    #[test]
    fn outcome_waits_while_any_job_runs() {
        let outcome = JobsOutcome::from_statuses(&[
            RemoteJobStatus::Failed,
            RemoteJobStatus::Queued,
        ]);
        assert_eq!(outcome, Some(JobsOutcome::Running { any_ready: false }));
        let outcome = JobsOutcome::from_statuses(&[
            RemoteJobStatus::Successful,
            RemoteJobStatus::Ready,
        ]);
        assert_eq!(outcome, Some(JobsOutcome::Running { any_ready: true }));
    }

    #[test]
    fn executing_and_undefined_jobs_keep_the_operation_running() {
        assert_eq!(
            JobsOutcome::from_statuses(&[RemoteJobStatus::Running]),
            Some(JobsOutcome::Running { any_ready: true })
        );
        assert_eq!(
            JobsOutcome::from_statuses(&[RemoteJobStatus::Successful, RemoteJobStatus::Undefined]),
            Some(JobsOutcome::Running { any_ready: false })
        );
    }

    #[test]
    fn outcome_succeeds_only_when_every_job_succeeded() {
        assert_eq!(
            JobsOutcome::from_statuses(&[RemoteJobStatus::Successful, RemoteJobStatus::Successful]),
            Some(JobsOutcome::Succeeded)
        );
        assert_eq!(
            JobsOutcome::from_statuses(&[RemoteJobStatus::Successful, RemoteJobStatus::Failed]),
            Some(JobsOutcome::Failed)
        );
        assert_eq!(
            JobsOutcome::from_statuses(&[RemoteJobStatus::Failed, RemoteJobStatus::Successful]),
            Some(JobsOutcome::Failed)
        );
        assert_eq!(JobsOutcome::from_statuses(&[]), None);
    }
}
