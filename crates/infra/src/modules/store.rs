//! Per-student module state rows.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursetasks_core::{CourseId, ProblemUrl, StudentId};

/// One student's state for one problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStateRecord {
    pub course_id: CourseId,
    pub student: StudentId,
    pub problem_url: ProblemUrl,
    /// Serialized state blob (JSON text); `None` when nothing was ever saved.
    pub state: Option<String>,
    pub modified_at: DateTime<Utc>,
}

/// Which rows to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStateQuery {
    pub course_id: CourseId,
    pub problem_url: ProblemUrl,
    /// Narrow to one student's row.
    pub student: Option<StudentId>,
}

impl ModuleStateQuery {
    pub fn matches(&self, record: &ModuleStateRecord) -> bool {
        record.course_id == self.course_id
            && record.problem_url == self.problem_url
            && self.student.as_ref().is_none_or(|s| &record.student == s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ModuleStoreError {
    #[error("module state not found for student '{student}' on {problem_url}")]
    NotFound {
        student: StudentId,
        problem_url: ProblemUrl,
    },
    #[error("module store error: {0}")]
    Storage(String),
}

/// Module state persistence.
pub trait ModuleStateStore: Send + Sync {
    /// Number of rows the query matches.
    fn count(&self, query: &ModuleStateQuery) -> Result<u64, ModuleStoreError>;

    /// Up to `limit` rows ordered by student id, strictly after `after`.
    fn page(
        &self,
        query: &ModuleStateQuery,
        after: Option<&StudentId>,
        limit: usize,
    ) -> Result<Vec<ModuleStateRecord>, ModuleStoreError>;

    fn get(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<Option<ModuleStateRecord>, ModuleStoreError>;

    /// Overwrite the state blob of an existing row.
    fn save_state(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
        state: &str,
    ) -> Result<(), ModuleStoreError>;

    /// Remove a row. Returns whether a row was removed.
    fn delete(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<bool, ModuleStoreError>;
}

impl<S> ModuleStateStore for Arc<S>
where
    S: ModuleStateStore + ?Sized,
{
    fn count(&self, query: &ModuleStateQuery) -> Result<u64, ModuleStoreError> {
        (**self).count(query)
    }

    fn page(
        &self,
        query: &ModuleStateQuery,
        after: Option<&StudentId>,
        limit: usize,
    ) -> Result<Vec<ModuleStateRecord>, ModuleStoreError> {
        (**self).page(query, after, limit)
    }

    fn get(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<Option<ModuleStateRecord>, ModuleStoreError> {
        (**self).get(course_id, student, problem_url)
    }

    fn save_state(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
        state: &str,
    ) -> Result<(), ModuleStoreError> {
        (**self).save_state(course_id, student, problem_url, state)
    }

    fn delete(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<bool, ModuleStoreError> {
        (**self).delete(course_id, student, problem_url)
    }
}

type RowKey = (CourseId, ProblemUrl, StudentId);

/// In-memory module state for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryModuleStateStore {
    rows: RwLock<BTreeMap<RowKey, ModuleStateRecord>>,
}

impl InMemoryModuleStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace a row.
    pub fn put(
        &self,
        course_id: CourseId,
        student: StudentId,
        problem_url: ProblemUrl,
        state: Option<String>,
    ) -> Result<(), ModuleStoreError> {
        let record = ModuleStateRecord {
            course_id: course_id.clone(),
            student: student.clone(),
            problem_url: problem_url.clone(),
            state,
            modified_at: Utc::now(),
        };
        self.rows
            .write()
            .map_err(|_| Self::poisoned())?
            .insert((course_id, problem_url, student), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> ModuleStoreError {
        ModuleStoreError::Storage("module store lock poisoned".to_string())
    }

    fn key(course_id: &CourseId, student: &StudentId, problem_url: &ProblemUrl) -> RowKey {
        (course_id.clone(), problem_url.clone(), student.clone())
    }
}

impl ModuleStateStore for InMemoryModuleStateStore {
    fn count(&self, query: &ModuleStateQuery) -> Result<u64, ModuleStoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows.values().filter(|r| query.matches(r)).count() as u64)
    }

    fn page(
        &self,
        query: &ModuleStateQuery,
        after: Option<&StudentId>,
        limit: usize,
    ) -> Result<Vec<ModuleStateRecord>, ModuleStoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        // Keys sort by (course, problem, student), so matching rows come out in student order.
        Ok(rows
            .values()
            .filter(|r| query.matches(r))
            .filter(|r| after.is_none_or(|a| &r.student > a))
            .take(limit)
            .cloned()
            .collect())
    }

    fn get(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<Option<ModuleStateRecord>, ModuleStoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows.get(&Self::key(course_id, student, problem_url)).cloned())
    }

    fn save_state(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
        state: &str,
    ) -> Result<(), ModuleStoreError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let row = rows
            .get_mut(&Self::key(course_id, student, problem_url))
            .ok_or_else(|| ModuleStoreError::NotFound {
                student: student.clone(),
                problem_url: problem_url.clone(),
            })?;
        row.state = Some(state.to_string());
        row.modified_at = Utc::now();
        Ok(())
    }

    fn delete(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<bool, ModuleStoreError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        Ok(rows.remove(&Self::key(course_id, student, problem_url)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course() -> CourseId {
        CourseId::new("edx/1.23x/test_course").unwrap()
    }

    fn problem(name: &str) -> ProblemUrl {
        ProblemUrl::new(format!("i4x://edx/1.23x/problem/{name}")).unwrap()
    }

    fn student(name: &str) -> StudentId {
        StudentId::new(name).unwrap()
    }

    fn query(name: &str, who: Option<&str>) -> ModuleStateQuery {
        ModuleStateQuery {
            course_id: course(),
            problem_url: problem(name),
            student: who.map(student),
        }
    }

    fn seeded() -> InMemoryModuleStateStore {
        let store = InMemoryModuleStateStore::new();
        for name in ["robot3", "robot1", "robot2"] {
            store
                .put(course(), student(name), problem("H1P1"), Some("{}".to_string()))
                .unwrap();
        }
        store
            .put(course(), student("robot1"), problem("H1P2"), None)
            .unwrap();
        store
    }

    #[test]
    fn pages_in_student_order() {
        let store = seeded();
        let q = query("H1P1", None);
        assert_eq!(store.count(&q).unwrap(), 3);

        let first = store.page(&q, None, 2).unwrap();
        let names: Vec<_> = first.iter().map(|r| r.student.as_str()).collect();
        assert_eq!(names, vec!["robot1", "robot2"]);

        let rest = store.page(&q, Some(&first[1].student), 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].student.as_str(), "robot3");
        assert!(store.page(&q, Some(&rest[0].student), 2).unwrap().is_empty());
    }

    #[test]
    fn single_student_query() {
        let store = seeded();
        assert_eq!(store.count(&query("H1P1", Some("robot2"))).unwrap(), 1);
        assert_eq!(store.count(&query("H1P1", Some("nobody"))).unwrap(), 0);
        assert_eq!(store.count(&query("H1P2", Some("robot1"))).unwrap(), 1);
    }

    #[test]
    fn save_requires_existing_row() {
        let store = seeded();
        store
            .save_state(&course(), &student("robot1"), &problem("H1P1"), r#"{"attempts":0}"#)
            .unwrap();
        let row = store
            .get(&course(), &student("robot1"), &problem("H1P1"))
            .unwrap()
            .unwrap();
        assert_eq!(row.state.as_deref(), Some(r#"{"attempts":0}"#));

        let err = store
            .save_state(&course(), &student("nobody"), &problem("H1P1"), "{}")
            .unwrap_err();
        assert!(matches!(err, ModuleStoreError::NotFound { .. }));
    }

    #[test]
    fn delete_reports_whether_a_row_existed() {
        let store = seeded();
        assert!(store.delete(&course(), &student("robot1"), &problem("H1P1")).unwrap());
        assert!(!store.delete(&course(), &student("robot1"), &problem("H1P1")).unwrap());
        assert_eq!(store.len(), 3);
    }
}
