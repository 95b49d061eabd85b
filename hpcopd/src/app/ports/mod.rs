// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod local_fs;
pub mod operation_store;
pub mod remote_exec;
pub mod secure_storage;
pub mod telemetry;
pub mod usage_store;

pub use clock::ClockPort;
pub use local_fs::LocalFilesystemPort;
pub use operation_store::OperationStorePort;
pub use remote_exec::RemoteExecutionPort;
pub use secure_storage::SecureStoragePort;
#[allow(unused_imports)]
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetryPort};
pub use usage_store::UsageStorePort;
