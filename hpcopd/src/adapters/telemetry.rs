// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::{TelemetryEvent, TelemetryPort};

/// Emits lifecycle events as structured log lines under `hpcopd::telemetry`.
#[derive(Clone, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryPort for TracingTelemetry {
    fn event(&self, name: &'static str, fields: TelemetryEvent) {
        let TelemetryEvent {
            operation_id,
            owner,
            project,
            algorithm,
            status,
            detail,
        } = fields;

        tracing::info!(
            target: "hpcopd::telemetry",
            event = name,
            operation_id = operation_id,
            owner = owner.as_deref(),
            project = project.as_deref(),
            algorithm = algorithm.as_deref(),
            status = status.as_deref(),
            detail = detail.as_deref(),
        );
    }
}
