//! Course content and account lookups consulted before a task is queued.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use coursetasks_core::{CourseId, ProblemUrl, StudentId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Knows which problems exist and how students are identified.
pub trait CourseDirectory: Send + Sync {
    /// Whether `problem_url` names content in `course_id`.
    fn problem_exists(&self, course_id: &CourseId, problem_url: &ProblemUrl) -> Result<bool, DirectoryError>;

    /// Resolve a username or email to the id module state is keyed by.
    ///
    /// `None` means the identifier is unknown to the directory.
    fn resolve_student(&self, identifier: &str) -> Result<Option<StudentId>, DirectoryError>;
}

impl<T> CourseDirectory for Arc<T>
where
    T: CourseDirectory + ?Sized,
{
    fn problem_exists(&self, course_id: &CourseId, problem_url: &ProblemUrl) -> Result<bool, DirectoryError> {
        (**self).problem_exists(course_id, problem_url)
    }

    fn resolve_student(&self, identifier: &str) -> Result<Option<StudentId>, DirectoryError> {
        (**self).resolve_student(identifier)
    }
}

/// Accepts every problem and treats every identifier as a username.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenDirectory;

impl CourseDirectory for OpenDirectory {
    fn problem_exists(&self, _course_id: &CourseId, _problem_url: &ProblemUrl) -> Result<bool, DirectoryError> {
        Ok(true)
    }

    fn resolve_student(&self, identifier: &str) -> Result<Option<StudentId>, DirectoryError> {
        Ok(StudentId::new(identifier).ok())
    }
}

/// In-memory catalog of problems and student accounts (dev/test).
#[derive(Debug, Default)]
pub struct InMemoryCourseDirectory {
    problems: RwLock<HashSet<(CourseId, ProblemUrl)>>,
    // username or email -> username
    students: RwLock<HashMap<String, StudentId>>,
}

impl InMemoryCourseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn add_problem(&self, course_id: CourseId, problem_url: ProblemUrl) -> Result<(), DirectoryError> {
        self.problems
            .write()
            .map_err(|_| Self::poisoned())?
            .insert((course_id, problem_url));
        Ok(())
    }

    pub fn add_student(&self, username: StudentId, email: impl Into<String>) -> Result<(), DirectoryError> {
        let mut students = self.students.write().map_err(|_| Self::poisoned())?;
        students.insert(email.into(), username.clone());
        students.insert(username.as_str().to_string(), username);
        Ok(())
    }

    fn poisoned() -> DirectoryError {
        DirectoryError::Unavailable("directory lock poisoned".to_string())
    }
}

impl CourseDirectory for InMemoryCourseDirectory {
    fn problem_exists(&self, course_id: &CourseId, problem_url: &ProblemUrl) -> Result<bool, DirectoryError> {
        let problems = self.problems.read().map_err(|_| Self::poisoned())?;
        Ok(problems.contains(&(course_id.clone(), problem_url.clone())))
    }

    fn resolve_student(&self, identifier: &str) -> Result<Option<StudentId>, DirectoryError> {
        let students = self.students.read().map_err(|_| Self::poisoned())?;
        Ok(students.get(identifier).cloned())
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

    #[test]
    fn open_directory_accepts_everything() {
        assert!(OpenDirectory.problem_exists(&course(), &problem("Anything")).unwrap());
        assert_eq!(
            OpenDirectory.resolve_student("robot1").unwrap(),
            Some(StudentId::new("robot1").unwrap())
        );
        assert_eq!(OpenDirectory.resolve_student("").unwrap(), None);
    }

    #[test]
    fn students_resolve_by_username_or_email() {
        let directory = InMemoryCourseDirectory::new();
        let robot = StudentId::new("robot3").unwrap();
        directory.add_student(robot.clone(), "robot+test+3@edx.org").unwrap();

        assert_eq!(directory.resolve_student("robot3").unwrap(), Some(robot.clone()));
        assert_eq!(directory.resolve_student("robot+test+3@edx.org").unwrap(), Some(robot));
        assert_eq!(directory.resolve_student("nobody@edx.org").unwrap(), None);
    }

    #[test]
    fn only_registered_problems_exist() {
        let directory = InMemoryCourseDirectory::new();
        directory.add_problem(course(), problem("H1P1")).unwrap();

        assert!(directory.problem_exists(&course(), &problem("H1P1")).unwrap());
        assert!(!directory.problem_exists(&course(), &problem("NonexistentProblem")).unwrap());
        let other = CourseId::new("edx/1.23x/other_course").unwrap();
        assert!(!directory.problem_exists(&other, &problem("H1P1")).unwrap());
    }
}
