//! Postgres-backed module state store over `courseware_studentmodule`.
//!
//! Like [`crate::tasks::PostgresTaskStore`], the synchronous trait methods block
//! on a captured runtime handle and must not be called from async tasks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use coursetasks_core::{CourseId, ProblemUrl, StudentId};

use super::store::{ModuleStateQuery, ModuleStateRecord, ModuleStateStore, ModuleStoreError};

#[derive(Debug, Clone)]
pub struct PostgresModuleStateStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresModuleStateStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Create the `courseware_studentmodule` table if missing.
    pub async fn ensure_schema(&self) -> Result<(), ModuleStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS courseware_studentmodule (
                course_id TEXT NOT NULL,
                module_state_key TEXT NOT NULL,
                student TEXT NOT NULL,
                state TEXT,
                modified TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (course_id, module_state_key, student)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, query), fields(course_id = %query.course_id, problem_url = %query.problem_url), err)]
    async fn count_rows(&self, query: &ModuleStateQuery) -> Result<u64, ModuleStoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM courseware_studentmodule
            WHERE course_id = $1
                AND module_state_key = $2
                AND ($3::text IS NULL OR student = $3)
            "#,
        )
        .bind(query.course_id.as_str())
        .bind(query.problem_url.as_str())
        .bind(query.student.as_ref().map(StudentId::as_str))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_rows", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| ModuleStoreError::Storage(format!("failed to read count: {e}")))?;
        Ok(total as u64)
    }

    #[instrument(skip(self, query), fields(course_id = %query.course_id, problem_url = %query.problem_url), err)]
    async fn page_rows(
        &self,
        query: &ModuleStateQuery,
        after: Option<&StudentId>,
        limit: usize,
    ) -> Result<Vec<ModuleStateRecord>, ModuleStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT course_id, module_state_key, student, state, modified
            FROM courseware_studentmodule
            WHERE course_id = $1
                AND module_state_key = $2
                AND ($3::text IS NULL OR student = $3)
                AND ($4::text IS NULL OR student > $4)
            ORDER BY student ASC
            LIMIT $5
            "#,
        )
        .bind(query.course_id.as_str())
        .bind(query.problem_url.as_str())
        .bind(query.student.as_ref().map(StudentId::as_str))
        .bind(after.map(StudentId::as_str))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("page_rows", e))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn get_row(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<Option<ModuleStateRecord>, ModuleStoreError> {
        let row = sqlx::query(
            r#"
            SELECT course_id, module_state_key, student, state, modified
            FROM courseware_studentmodule
            WHERE course_id = $1 AND module_state_key = $2 AND student = $3
            "#,
        )
        .bind(course_id.as_str())
        .bind(problem_url.as_str())
        .bind(student.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_row", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self, state), fields(student = %student, problem_url = %problem_url), err)]
    async fn update_state(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
        state: &str,
    ) -> Result<(), ModuleStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE courseware_studentmodule
            SET state = $4, modified = NOW()
            WHERE course_id = $1 AND module_state_key = $2 AND student = $3
            "#,
        )
        .bind(course_id.as_str())
        .bind(problem_url.as_str())
        .bind(student.as_str())
        .bind(state)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_state", e))?;

        if result.rows_affected() == 0 {
            return Err(ModuleStoreError::NotFound {
                student: student.clone(),
                problem_url: problem_url.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(student = %student, problem_url = %problem_url), err)]
    async fn delete_row(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<bool, ModuleStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM courseware_studentmodule
            WHERE course_id = $1 AND module_state_key = $2 AND student = $3
            "#,
        )
        .bind(course_id.as_str())
        .bind(problem_url.as_str())
        .bind(student.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_row", e))?;

        Ok(result.rows_affected() > 0)
    }
}

impl ModuleStateStore for PostgresModuleStateStore {
    fn count(&self, query: &ModuleStateQuery) -> Result<u64, ModuleStoreError> {
        self.runtime.block_on(self.count_rows(query))
    }

    fn page(
        &self,
        query: &ModuleStateQuery,
        after: Option<&StudentId>,
        limit: usize,
    ) -> Result<Vec<ModuleStateRecord>, ModuleStoreError> {
        self.runtime.block_on(self.page_rows(query, after, limit))
    }

    fn get(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<Option<ModuleStateRecord>, ModuleStoreError> {
        self.runtime
            .block_on(self.get_row(course_id, student, problem_url))
    }

    fn save_state(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
        state: &str,
    ) -> Result<(), ModuleStoreError> {
        self.runtime
            .block_on(self.update_state(course_id, student, problem_url, state))
    }

    fn delete(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<bool, ModuleStoreError> {
        self.runtime
            .block_on(self.delete_row(course_id, student, problem_url))
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<ModuleStateRecord, ModuleStoreError> {
    let read = |e: sqlx::Error| ModuleStoreError::Storage(format!("failed to read module row: {e}"));
    let invalid = |e: coursetasks_core::DomainError| {
        ModuleStoreError::Storage(format!("invalid module row: {e}"))
    };

    let course_id: String = row.try_get("course_id").map_err(read)?;
    let problem_url: String = row.try_get("module_state_key").map_err(read)?;
    let student: String = row.try_get("student").map_err(read)?;
    let state: Option<String> = row.try_get("state").map_err(read)?;
    let modified_at: DateTime<Utc> = row.try_get("modified").map_err(read)?;

    Ok(ModuleStateRecord {
        course_id: CourseId::new(course_id).map_err(invalid)?,
        problem_url: ProblemUrl::new(problem_url).map_err(invalid)?,
        student: StudentId::new(student).map_err(invalid)?,
        state,
        modified_at,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ModuleStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            ModuleStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            ModuleStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => ModuleStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
