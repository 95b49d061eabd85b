// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use sqlx::{
    QueryBuilder, Row, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use std::{path::Path, str::FromStr, time::Duration};
use thiserror::Error;

use crate::app::types::{
    NewOperation, Operation, OperationFilter, OperationKind, OperationStatus, ProcessIdentifier,
    ResultArtifact,
};

#[derive(Debug, Error)]
pub enum OperationStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("empty owner")]
    EmptyOwner,
    #[error("empty project")]
    EmptyProject,
    #[error("empty job url")]
    EmptyJobUrl,
    #[error("operation not found: {0}")]
    OperationNotFound(i64),
    #[error("invalid value in column {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, OperationStoreError>;

const ACTIVE_STATUSES: &str = "('PENDING', 'STARTED')";

/// Async store for operations, their remote job identifiers and the result
/// files staged for them.
#[derive(Clone)]
pub struct OperationStore {
    pool: SqlitePool,
}

impl OperationStore {
    /// Open (or create) a file-backed SQLite DB.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let url = format!("sqlite://{}", path_ref.to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Open an in-memory store (handy for tests).
    #[allow(dead_code)]
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        // Improve concurrency for file DBs.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;

        self.ensure_operations_table().await?;
        self.ensure_process_identifiers_table().await?;
        self.ensure_result_artifacts_table().await?;
        Ok(())
    }

    async fn ensure_operations_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              owner TEXT NOT NULL,
              project TEXT NOT NULL,
              algorithm TEXT NOT NULL,
              payload_reference TEXT,
              kind TEXT NOT NULL DEFAULT 'simulation',
              status TEXT NOT NULL DEFAULT 'PENDING',
              estimated_disk_size INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
              started_at TEXT,
              completed_at TEXT,
              error_message TEXT,
              CHECK (status IN ('PENDING', 'STARTED', 'FINISHED', 'ERROR', 'CANCELED'))
            );
            CREATE INDEX IF NOT EXISTS idx_operations_status ON operations(status);
            CREATE INDEX IF NOT EXISTS idx_operations_owner ON operations(owner);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_process_identifiers_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operation_process_identifiers (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              operation_id INTEGER NOT NULL REFERENCES operations(id) ON DELETE CASCADE,
              job_url TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_process_identifiers_operation
              ON operation_process_identifiers(operation_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_result_artifacts_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS result_artifacts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              operation_id INTEGER NOT NULL REFERENCES operations(id) ON DELETE CASCADE,
              path TEXT NOT NULL,
              size_bytes INTEGER NOT NULL,
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_result_artifacts_path
              ON result_artifacts(operation_id, path);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a new operation in PENDING and return its id.
    pub async fn insert_operation(&self, operation: &NewOperation) -> Result<i64> {
        if operation.owner.trim().is_empty() {
            return Err(OperationStoreError::EmptyOwner);
        }
        if operation.project.trim().is_empty() {
            return Err(OperationStoreError::EmptyProject);
        }
        let rec = sqlx::query(
            r#"
            insert into operations(
                owner, project, algorithm, payload_reference, kind, status, estimated_disk_size
            )
            values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            returning id;
            "#,
        )
        .bind(&operation.owner)
        .bind(&operation.project)
        .bind(&operation.algorithm)
        .bind(&operation.payload_reference)
        .bind(operation.kind.as_str())
        .bind(OperationStatus::Pending.as_str())
        .bind(operation.estimated_disk_size)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.try_get::<i64, _>("id")?)
    }

    pub async fn get_operation(&self, id: i64) -> Result<Option<Operation>> {
        let row = sqlx::query("select * from operations where id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_operation).transpose()
    }

    /// Write status, timestamps and error message of `operation`.
    ///
    /// The update only applies while the stored row is PENDING or STARTED, so
    /// a terminal row is never rewritten. Returns whether a row was updated.
    pub async fn save_operation(&self, operation: &Operation) -> Result<bool> {
        let res = sqlx::query(&format!(
            r#"
            update operations
            set status = ?1,
                started_at = ?2,
                completed_at = ?3,
                error_message = ?4
            where id = ?5 and status in {ACTIVE_STATUSES}
            "#
        ))
        .bind(operation.status.as_str())
        .bind(&operation.started_at)
        .bind(&operation.completed_at)
        .bind(&operation.error_message)
        .bind(operation.id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_operation(operation.id).await? {
            Some(_) => Ok(false),
            None => Err(OperationStoreError::OperationNotFound(operation.id)),
        }
    }

    pub async fn insert_process_identifier(&self, operation_id: i64, job_url: &str) -> Result<i64> {
        if job_url.trim().is_empty() {
            return Err(OperationStoreError::EmptyJobUrl);
        }
        let rec = sqlx::query(
            r#"
            insert into operation_process_identifiers(operation_id, job_url)
            values (?1, ?2)
            returning id;
            "#,
        )
        .bind(operation_id)
        .bind(job_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                OperationStoreError::OperationNotFound(operation_id)
            }
            _ => OperationStoreError::Sqlx(err),
        })?;
        Ok(rec.try_get::<i64, _>("id")?)
    }

    /// Identifiers of `operation_id` in submission order.
    pub async fn list_process_identifiers(
        &self,
        operation_id: i64,
    ) -> Result<Vec<ProcessIdentifier>> {
        let rows = sqlx::query(
            r#"
            select id, operation_id, job_url
            from operation_process_identifiers
            where operation_id = ?
            order by id
            "#,
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_identifier).collect()
    }

    /// Non-terminal operations that have at least one process identifier,
    /// oldest first.
    pub async fn list_due_operations(&self, filter: &OperationFilter) -> Result<Vec<Operation>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            r#"
            select o.* from operations o
            where o.status in {ACTIVE_STATUSES}
              and exists (
                select 1 from operation_process_identifiers p where p.operation_id = o.id
              )
            "#
        ));
        if let Some(owner) = &filter.owner {
            query.push(" and o.owner = ").push_bind(owner);
        }
        if let Some(algorithms) = &filter.algorithms {
            if algorithms.is_empty() {
                return Ok(Vec::new());
            }
            query.push(" and o.algorithm in (");
            let mut list = query.separated(", ");
            for algorithm in algorithms {
                list.push_bind(algorithm);
            }
            list.push_unseparated(")");
        }
        query.push(" order by o.id");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_operation).collect()
    }

    /// Record staged files; re-staging the same path updates its size.
    pub async fn upsert_result_artifacts(&self, artifacts: &[ResultArtifact]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for artifact in artifacts {
            sqlx::query(
                r#"
                insert into result_artifacts(operation_id, path, size_bytes)
                values (?1, ?2, ?3)
                on conflict(operation_id, path) do update set size_bytes = excluded.size_bytes
                "#,
            )
            .bind(artifact.operation_id)
            .bind(&artifact.path)
            .bind(artifact.size_bytes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_result_artifacts(&self, operation_id: i64) -> Result<Vec<ResultArtifact>> {
        let rows = sqlx::query(
            r#"
            select operation_id, path, size_bytes
            from result_artifacts
            where operation_id = ?
            order by path
            "#,
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(ResultArtifact {
                    operation_id: row.try_get("operation_id")?,
                    path: row.try_get("path")?,
                    size_bytes: row.try_get("size_bytes")?,
                })
            })
            .collect()
    }

    /// Sum of declared sizes of the owner's PENDING and STARTED operations.
    pub async fn pending_disk_usage(&self, owner: &str) -> Result<i64> {
        let row = sqlx::query(&format!(
            r#"
            select coalesce(sum(estimated_disk_size), 0) as total
            from operations
            where owner = ? and status in {ACTIVE_STATUSES}
            "#
        ))
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }

    /// Sum of staged result sizes across the owner's operations.
    pub async fn generated_disk_usage(&self, owner: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            select coalesce(sum(r.size_bytes), 0) as total
            from result_artifacts r
            join operations o on o.id = r.operation_id
            where o.owner = ?
            "#,
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }
}

// -- helpers

fn row_to_operation(row: SqliteRow) -> Result<Operation> {
    let status: String = row.try_get("status")?;
    let kind: String = row.try_get("kind")?;
    Ok(Operation {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        project: row.try_get("project")?,
        algorithm: row.try_get("algorithm")?,
        payload_reference: row.try_get("payload_reference")?,
        kind: OperationKind::from_str(&kind).map_err(|_| OperationStoreError::InvalidColumn {
            column: "kind",
            value: kind.clone(),
        })?,
        status: OperationStatus::from_str(&status).map_err(|_| {
            OperationStoreError::InvalidColumn {
                column: "status",
                value: status.clone(),
            }
        })?,
        estimated_disk_size: row.try_get("estimated_disk_size")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

fn row_to_identifier(row: SqliteRow) -> Result<ProcessIdentifier> {
    Ok(ProcessIdentifier {
        id: row.try_get("id")?,
        operation_id: row.try_get("operation_id")?,
        job_url: row.try_get("job_url")?,
    })
}
