// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{
    NewOperation, Operation, OperationFilter, ProcessIdentifier, ResultArtifact,
};

#[async_trait]
/// Persistence boundary for operations, their process identifiers and results.
/// Every call is atomic on its own; nothing spans calls.
pub trait OperationStorePort: Send + Sync {
    async fn insert_operation(&self, operation: &NewOperation) -> AppResult<i64>;
    async fn get_operation(&self, id: i64) -> AppResult<Option<Operation>>;
    /// Persists status and timestamps. Returns `false` when the stored row is
    /// already terminal, in which case nothing is written.
    async fn save_operation(&self, operation: &Operation) -> AppResult<bool>;
    /// Identifiers in insertion order, which is pipeline stage order.
    async fn get_process_identifiers(&self, operation_id: i64)
    -> AppResult<Vec<ProcessIdentifier>>;
    async fn save_process_identifier(&self, operation_id: i64, job_url: &str) -> AppResult<i64>;
    /// PENDING/STARTED operations with at least one process identifier.
    async fn list_due_operations(&self, filter: &OperationFilter) -> AppResult<Vec<Operation>>;
    async fn record_result_artifacts(&self, artifacts: &[ResultArtifact]) -> AppResult<()>;
    async fn list_result_artifacts(&self, operation_id: i64) -> AppResult<Vec<ResultArtifact>>;
}
