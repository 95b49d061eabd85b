// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::db::{OperationStore, OperationStoreError};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{OperationStorePort, UsageStorePort};
use crate::app::types::{
    NewOperation, Operation, OperationFilter, ProcessIdentifier, ResultArtifact,
};

#[derive(Clone)]
pub struct SqliteStoreAdapter {
    store: Arc<OperationStore>,
}

impl SqliteStoreAdapter {
    pub fn new(store: OperationStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// Persistence errors stop at this adapter; the core only sees `AppError`.
/// Database failures map to the retryable store kind so a pass leaves the
/// affected operation for the next one.
fn map_store_error(err: OperationStoreError) -> AppError {
    match err {
        OperationStoreError::EmptyOwner
        | OperationStoreError::EmptyProject
        | OperationStoreError::EmptyJobUrl => AppError::with_message(
            AppErrorKind::InvalidArgument,
            codes::INVALID_ARGUMENT,
            err.to_string(),
        ),
        OperationStoreError::OperationNotFound(_) => {
            AppError::not_found(err.to_string())
        }
        OperationStoreError::InvalidColumn { .. } => AppError::with_message(
            AppErrorKind::Internal,
            codes::INTERNAL_ERROR,
            err.to_string(),
        ),
        OperationStoreError::Sqlx(_) => {
            AppError::with_message(AppErrorKind::Store, codes::STORE_ERROR, err.to_string())
        }
    }
}

#[async_trait]
impl OperationStorePort for SqliteStoreAdapter {
    async fn insert_operation(&self, operation: &NewOperation) -> AppResult<i64> {
        self.store
            .insert_operation(operation)
            .await
            .map_err(map_store_error)
    }

    async fn get_operation(&self, id: i64) -> AppResult<Option<Operation>> {
        self.store.get_operation(id).await.map_err(map_store_error)
    }

    async fn save_operation(&self, operation: &Operation) -> AppResult<bool> {
        self.store
            .save_operation(operation)
            .await
            .map_err(map_store_error)
    }

    async fn get_process_identifiers(
        &self,
        operation_id: i64,
    ) -> AppResult<Vec<ProcessIdentifier>> {
        self.store
            .list_process_identifiers(operation_id)
            .await
            .map_err(map_store_error)
    }

    async fn save_process_identifier(&self, operation_id: i64, job_url: &str) -> AppResult<i64> {
        self.store
            .insert_process_identifier(operation_id, job_url)
            .await
            .map_err(map_store_error)
    }

    async fn list_due_operations(&self, filter: &OperationFilter) -> AppResult<Vec<Operation>> {
        self.store
            .list_due_operations(filter)
            .await
            .map_err(map_store_error)
    }

    async fn record_result_artifacts(&self, artifacts: &[ResultArtifact]) -> AppResult<()> {
        self.store
            .upsert_result_artifacts(artifacts)
            .await
            .map_err(map_store_error)
    }

    async fn list_result_artifacts(&self, operation_id: i64) -> AppResult<Vec<ResultArtifact>> {
        self.store
            .list_result_artifacts(operation_id)
            .await
            .map_err(map_store_error)
    }
}

#[async_trait]
impl UsageStorePort for SqliteStoreAdapter {
    async fn pending_disk_usage(&self, owner: &str) -> AppResult<i64> {
        self.store
            .pending_disk_usage(owner)
            .await
            .map_err(map_store_error)
    }

    async fn generated_disk_usage(&self, owner: &str) -> AppResult<i64> {
        self.store
            .generated_disk_usage(owner)
            .await
            .map_err(map_store_error)
    }
}
