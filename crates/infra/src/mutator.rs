//! Per-record mutation strategies.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::debug;

use coursetasks_core::StudentId;
use coursetasks_tasks::{FailureRecord, MutationKind, truncate_chars};

use crate::modules::{
    InstanceError, ModuleHandle, ModuleInstantiator, ModuleStateRecord, ModuleStateStore,
    ModuleStoreError,
};

/// Why one candidate could not be mutated.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MutationError {
    #[error("failed to load module instance: {0}")]
    Instantiation(InstanceError),
    #[error("module rejected the mutation: {0}")]
    Mutation(InstanceError),
    #[error("failed to persist module state: {0}")]
    Persistence(ModuleStoreError),
    #[error("panicked: {0}")]
    Panicked(String),
}

impl MutationError {
    /// Short category recorded with the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            MutationError::Instantiation(_) => "instantiation",
            MutationError::Mutation(_) => "mutation",
            MutationError::Persistence(_) => "persistence",
            MutationError::Panicked(_) => "panic",
        }
    }
}

/// A failed candidate.
#[derive(Debug, Clone, thiserror::Error)]
#[error("student '{student}': {cause}")]
pub struct MutationFailure {
    pub student: StudentId,
    pub cause: MutationError,
}

impl MutationFailure {
    pub fn to_record(&self, max_message_len: usize) -> FailureRecord {
        FailureRecord {
            student: self.student.clone(),
            kind: self.cause.kind().to_string(),
            cause: truncate_chars(&self.cause.to_string(), max_message_len),
        }
    }
}

/// Applies one mutation kind to one record at a time.
pub struct Mutator<'a, M: ?Sized, I: ?Sized> {
    modules: &'a M,
    instantiator: &'a I,
}

impl<'a, M, I> Mutator<'a, M, I>
where
    M: ModuleStateStore + ?Sized,
    I: ModuleInstantiator + ?Sized,
{
    pub fn new(modules: &'a M, instantiator: &'a I) -> Self {
        Self { modules, instantiator }
    }

    /// Mutate one record. Failures of any kind, panics included, come back as
    /// a [`MutationFailure`] for this student only.
    pub fn mutate(&self, kind: MutationKind, record: &ModuleStateRecord) -> Result<(), MutationFailure> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.apply(kind, record)))
            .unwrap_or_else(|payload| Err(MutationError::Panicked(panic_message(payload.as_ref()))));

        result.map_err(|cause| MutationFailure {
            student: record.student.clone(),
            cause,
        })
    }

    fn apply(&self, kind: MutationKind, record: &ModuleStateRecord) -> Result<(), MutationError> {
        match kind {
            MutationKind::Rescore => self.update_instance(record, |module| module.rescore()),
            MutationKind::ResetAttempts => self.update_instance(record, |module| module.reset_attempts()),
            MutationKind::DeleteState => {
                let removed = self
                    .modules
                    .delete(&record.course_id, &record.student, &record.problem_url)
                    .map_err(MutationError::Persistence)?;
                if !removed {
                    debug!(student = %record.student, "module state already gone");
                }
                Ok(())
            }
        }
    }

    fn update_instance(
        &self,
        record: &ModuleStateRecord,
        op: impl FnOnce(&mut dyn ModuleHandle) -> Result<(), InstanceError>,
    ) -> Result<(), MutationError> {
        let mut module = self
            .instantiator
            .load_instance(&record.course_id, &record.student, &record.problem_url)
            .map_err(MutationError::Instantiation)?;

        op(module.as_mut()).map_err(MutationError::Mutation)?;
        let state = module.state().map_err(MutationError::Mutation)?;

        self.modules
            .save_state(&record.course_id, &record.student, &record.problem_url, &state)
            .map_err(MutationError::Persistence)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{InMemoryModuleStateStore, JsonStateInstantiator};
    use chrono::Utc;
    use coursetasks_core::{CourseId, ProblemUrl};
    use std::sync::Arc;

    fn record(student: &str, state: Option<&str>) -> ModuleStateRecord {
        ModuleStateRecord {
            course_id: CourseId::new("edx/1.23x/test_course").unwrap(),
            student: StudentId::new(student).unwrap(),
            problem_url: ProblemUrl::new("i4x://edx/1.23x/problem/H1P1").unwrap(),
            state: state.map(str::to_string),
            modified_at: Utc::now(),
        }
    }

    fn seeded(records: &[ModuleStateRecord]) -> Arc<InMemoryModuleStateStore> {
        let store = InMemoryModuleStateStore::arc();
        for r in records {
            store
                .put(r.course_id.clone(), r.student.clone(), r.problem_url.clone(), r.state.clone())
                .unwrap();
        }
        store
    }

    struct Panicking;

    impl ModuleInstantiator for Panicking {
        fn load_instance(
            &self,
            _course_id: &CourseId,
            student: &StudentId,
            _problem_url: &ProblemUrl,
        ) -> Result<Box<dyn ModuleHandle>, InstanceError> {
            panic!("grader crashed for {student}");
        }
    }

    #[test]
    fn reset_persists_new_state() {
        let r = record("robot1", Some(r#"{"attempts": 4}"#));
        let store = seeded(std::slice::from_ref(&r));
        let instantiator = JsonStateInstantiator::new(store.clone());

        Mutator::new(&store, &instantiator)
            .mutate(MutationKind::ResetAttempts, &r)
            .unwrap();

        let saved = store.get(&r.course_id, &r.student, &r.problem_url).unwrap().unwrap();
        assert_eq!(saved.state.as_deref(), Some(r#"{"attempts":0}"#));
    }

    #[test]
    fn delete_tolerates_missing_rows() {
        let r = record("robot1", None);
        let store = seeded(std::slice::from_ref(&r));
        let instantiator = JsonStateInstantiator::new(store.clone());
        let mutator = Mutator::new(&store, &instantiator);

        mutator.mutate(MutationKind::DeleteState, &r).unwrap();
        assert!(store.is_empty());
        mutator.mutate(MutationKind::DeleteState, &r).unwrap();
    }

    #[test]
    fn unsupported_rescore_is_a_mutation_failure() {
        let r = record("robot1", Some(r#"{"done": true}"#));
        let store = seeded(std::slice::from_ref(&r));
        let instantiator = JsonStateInstantiator::new(store.clone());

        let failure = Mutator::new(&store, &instantiator)
            .mutate(MutationKind::Rescore, &r)
            .unwrap_err();
        assert_eq!(failure.cause.kind(), "mutation");
        assert_eq!(failure.student.as_str(), "robot1");
    }

    #[test]
    fn vanished_row_is_an_instantiation_failure() {
        let r = record("robot1", None);
        let store = InMemoryModuleStateStore::arc();
        let instantiator = JsonStateInstantiator::new(store.clone());

        let failure = Mutator::new(&store, &instantiator)
            .mutate(MutationKind::ResetAttempts, &r)
            .unwrap_err();
        assert_eq!(failure.cause.kind(), "instantiation");
    }

    #[test]
    fn panics_are_contained() {
        let r = record("robot7", None);
        let store = seeded(std::slice::from_ref(&r));

        let failure = Mutator::new(&store, &Panicking)
            .mutate(MutationKind::Rescore, &r)
            .unwrap_err();
        assert!(matches!(&failure.cause, MutationError::Panicked(msg) if msg.contains("robot7")));

        let recorded = failure.to_record(10);
        assert_eq!(recorded.kind, "panic");
        assert_eq!(recorded.cause.chars().count(), 10);
    }
}
