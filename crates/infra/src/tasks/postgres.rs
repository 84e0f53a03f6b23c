//! Postgres-backed task entry store.
//!
//! Entries are stored as one JSONB document per row, next to the columns the
//! store filters on. Duplicate-active detection is enforced by a partial unique
//! index over `(course_id, task_key)` for queued / in-progress rows.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | TaskStoreError |
//! |------------|----------------------|----------------|
//! | Database (unique violation, active key index) | `23505` | `AlreadyRunning` |
//! | Database (unique violation, primary key) | `23505` | `AlreadyExists` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |
//!
//! ## Runtime
//!
//! [`TaskStore`] is synchronous. The store captures a tokio runtime handle at
//! construction and blocks on it, so it must be called from plain threads (task
//! workers, `spawn_blocking`), never from inside an async task.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{Span, instrument};

use coursetasks_core::{CourseId, DomainResult, ProblemUrl, TaskId};
use coursetasks_tasks::{MutationKind, TaskEntry};

use super::store::{TaskStore, TaskStoreError};

const ACTIVE_KEY_INDEX: &str = "course_tasks_active_key";

/// Postgres task store.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Create the `course_tasks` table and its indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), TaskStoreError> {
        for statement in [
            r#"
            CREATE TABLE IF NOT EXISTS course_tasks (
                id UUID PRIMARY KEY,
                course_id TEXT NOT NULL,
                problem_url TEXT NOT NULL,
                kind TEXT NOT NULL,
                task_key TEXT NOT NULL,
                state TEXT NOT NULL,
                entry JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS course_tasks_active_key
                ON course_tasks (course_id, task_key)
                WHERE state IN ('queued', 'in_progress')
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS course_tasks_problem
                ON course_tasks (course_id, problem_url, created_at)
            "#,
        ] {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, entry), fields(task_id = %entry.id, task_key = %entry.task_key), err)]
    async fn insert(&self, entry: TaskEntry) -> Result<TaskId, TaskStoreError> {
        let document = to_document(&entry)?;

        let result = sqlx::query(
            r#"
            INSERT INTO course_tasks (
                id, course_id, problem_url, kind, task_key, state, entry, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.course_id.as_str())
        .bind(entry.input.problem_url.as_str())
        .bind(entry.kind.as_str())
        .bind(&entry.task_key)
        .bind(entry.state.as_str())
        .bind(&document)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(entry.id),
            Err(e) if violated_constraint(&e) == Some(ACTIVE_KEY_INDEX) => {
                let task_id = self
                    .active_task_for_key(&entry.course_id, &entry.task_key)
                    .await?
                    .unwrap_or(entry.id);
                Err(TaskStoreError::AlreadyRunning {
                    task_id,
                    task_key: entry.task_key,
                })
            }
            Err(e) if is_unique_violation(&e) => Err(TaskStoreError::AlreadyExists(entry.id)),
            Err(e) => Err(map_sqlx_error("insert_task", e)),
        }
    }

    async fn active_task_for_key(
        &self,
        course_id: &CourseId,
        task_key: &str,
    ) -> Result<Option<TaskId>, TaskStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id FROM course_tasks
            WHERE course_id = $1 AND task_key = $2 AND state IN ('queued', 'in_progress')
            "#,
        )
        .bind(course_id.as_str())
        .bind(task_key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_task_for_key", e))?;

        row.map(|row| {
            row.try_get::<uuid::Uuid, _>("id")
                .map(TaskId::from_uuid)
                .map_err(|e| TaskStoreError::Storage(format!("failed to read task id: {e}")))
        })
        .transpose()
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn load(&self, task_id: TaskId) -> Result<Option<TaskEntry>, TaskStoreError> {
        let row = sqlx::query("SELECT entry FROM course_tasks WHERE id = $1")
            .bind(task_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_task", e))?;

        row.map(|row| from_row(&row)).transpose()
    }

    #[instrument(skip(self, apply), fields(task_id = %task_id, state), err)]
    async fn modify_locked(
        &self,
        task_id: TaskId,
        apply: &mut dyn FnMut(&mut TaskEntry) -> DomainResult<()>,
    ) -> Result<TaskEntry, TaskStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query("SELECT entry FROM course_tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_task", e))?
            .ok_or(TaskStoreError::NotFound(task_id))?;

        let mut entry = from_row(&row)?;
        if let Err(e) = apply(&mut entry) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(TaskStoreError::Transition(e));
        }

        sqlx::query(
            r#"
            UPDATE course_tasks
            SET state = $2, entry = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(entry.state.as_str())
        .bind(to_document(&entry)?)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_task", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("state", entry.state.as_str());
        Ok(entry)
    }

    async fn select_active(&self, course_id: &CourseId) -> Result<Vec<TaskEntry>, TaskStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT entry FROM course_tasks
            WHERE course_id = $1 AND state IN ('queued', 'in_progress')
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(course_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active", e))?;

        rows.iter().map(from_row).collect()
    }

    async fn select_history(
        &self,
        course_id: &CourseId,
        problem_url: &ProblemUrl,
        kind: Option<MutationKind>,
    ) -> Result<Vec<TaskEntry>, TaskStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT entry FROM course_tasks
            WHERE course_id = $1
                AND problem_url = $2
                AND ($3::text IS NULL OR kind = $3)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(course_id.as_str())
        .bind(problem_url.as_str())
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        rows.iter().map(from_row).collect()
    }
}

impl TaskStore for PostgresTaskStore {
    fn create(&self, entry: TaskEntry) -> Result<TaskId, TaskStoreError> {
        self.runtime.block_on(self.insert(entry))
    }

    fn get(&self, task_id: TaskId) -> Result<Option<TaskEntry>, TaskStoreError> {
        self.runtime.block_on(self.load(task_id))
    }

    fn modify(
        &self,
        task_id: TaskId,
        apply: &mut dyn FnMut(&mut TaskEntry) -> DomainResult<()>,
    ) -> Result<TaskEntry, TaskStoreError> {
        self.runtime.block_on(self.modify_locked(task_id, apply))
    }

    fn list_active(&self, course_id: &CourseId) -> Result<Vec<TaskEntry>, TaskStoreError> {
        self.runtime.block_on(self.select_active(course_id))
    }

    fn history(
        &self,
        course_id: &CourseId,
        problem_url: &ProblemUrl,
        kind: Option<MutationKind>,
    ) -> Result<Vec<TaskEntry>, TaskStoreError> {
        self.runtime
            .block_on(self.select_history(course_id, problem_url, kind))
    }
}

fn to_document(entry: &TaskEntry) -> Result<serde_json::Value, TaskStoreError> {
    serde_json::to_value(entry)
        .map_err(|e| TaskStoreError::Storage(format!("failed to serialize task entry: {e}")))
}

fn from_row(row: &sqlx::postgres::PgRow) -> Result<TaskEntry, TaskStoreError> {
    let document: serde_json::Value = row
        .try_get("entry")
        .map_err(|e| TaskStoreError::Storage(format!("failed to read task row: {e}")))?;
    serde_json::from_value(document)
        .map_err(|e| TaskStoreError::Storage(format!("failed to deserialize task entry: {e}")))
}

/// Name of the constraint behind a database error, if any.
fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> TaskStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            TaskStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            TaskStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => TaskStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
