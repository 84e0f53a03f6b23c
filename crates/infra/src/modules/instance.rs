//! Loaded module instances: the collaborator a mutation is applied to.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use coursetasks_core::{CourseId, ProblemUrl, StudentId};
use coursetasks_tasks::MutationKind;

use super::store::{ModuleStateStore, ModuleStoreError};

/// A module instance loaded for one student.
pub trait ModuleHandle: Send {
    /// Recompute the score from the already-submitted answers.
    fn rescore(&mut self) -> Result<(), InstanceError>;

    /// Zero the attempt counter.
    fn reset_attempts(&mut self) -> Result<(), InstanceError>;

    /// Serialized state to persist after a mutation.
    fn state(&self) -> Result<String, InstanceError>;
}

/// Builds module instances from stored state.
pub trait ModuleInstantiator: Send + Sync {
    fn load_instance(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<Box<dyn ModuleHandle>, InstanceError>;

    /// Whether instances of this problem can perform `kind` at all.
    fn supports(&self, _kind: MutationKind, _problem_url: &ProblemUrl) -> bool {
        true
    }
}

impl<T> ModuleInstantiator for Arc<T>
where
    T: ModuleInstantiator + ?Sized,
{
    fn load_instance(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<Box<dyn ModuleHandle>, InstanceError> {
        (**self).load_instance(course_id, student, problem_url)
    }

    fn supports(&self, kind: MutationKind, problem_url: &ProblemUrl) -> bool {
        (**self).supports(kind, problem_url)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum InstanceError {
    #[error("no module state for student '{student}' on {problem_url}")]
    NotFound {
        student: StudentId,
        problem_url: ProblemUrl,
    },
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("corrupt module state: {0}")]
    CorruptState(String),
    #[error("module operation failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Store(#[from] ModuleStoreError),
}

/// Rescoring hook applied to a parsed state object.
pub type Rescorer = Arc<dyn Fn(&mut Map<String, Value>) -> Result<(), String> + Send + Sync>;

/// Rescorer for states that record graded answers in a `correct_map` object.
///
/// Sets `score` to the number of answers whose `correctness` is `"correct"` and
/// `max_score` to the number of graded answers.
pub fn correct_map_rescorer() -> Rescorer {
    Arc::new(|state: &mut Map<String, Value>| {
        let graded = state
            .get("correct_map")
            .and_then(Value::as_object)
            .ok_or_else(|| "state has no correct_map".to_string())?;
        let correct = graded
            .values()
            .filter(|answer| answer.get("correctness").and_then(Value::as_str) == Some("correct"))
            .count();
        let total = graded.len();
        state.insert("score".to_string(), Value::from(correct));
        state.insert("max_score".to_string(), Value::from(total));
        Ok(())
    })
}

/// Instantiator for modules whose state is a JSON object.
///
/// Resetting zeroes an `attempts` field when present. Rescoring needs a
/// [`Rescorer`]; without one, rescoring is unsupported.
pub struct JsonStateInstantiator<S> {
    store: S,
    rescorer: Option<Rescorer>,
}

impl<S: ModuleStateStore> JsonStateInstantiator<S> {
    pub fn new(store: S) -> Self {
        Self { store, rescorer: None }
    }

    pub fn with_rescorer<F>(mut self, rescorer: F) -> Self
    where
        F: Fn(&mut Map<String, Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.rescorer = Some(Arc::new(rescorer));
        self
    }
}

impl<S> fmt::Debug for JsonStateInstantiator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonStateInstantiator")
            .field("rescorer", &self.rescorer.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: ModuleStateStore> ModuleInstantiator for JsonStateInstantiator<S> {
    fn load_instance(
        &self,
        course_id: &CourseId,
        student: &StudentId,
        problem_url: &ProblemUrl,
    ) -> Result<Box<dyn ModuleHandle>, InstanceError> {
        let record = self
            .store
            .get(course_id, student, problem_url)?
            .ok_or_else(|| InstanceError::NotFound {
                student: student.clone(),
                problem_url: problem_url.clone(),
            })?;

        let state = match record.state.as_deref().map(str::trim) {
            None | Some("") | Some("null") => Map::new(),
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(InstanceError::CorruptState("state is not a JSON object".to_string())),
                Err(e) => return Err(InstanceError::CorruptState(e.to_string())),
            },
        };

        Ok(Box::new(JsonModule {
            state,
            rescorer: self.rescorer.clone(),
        }))
    }

    fn supports(&self, kind: MutationKind, _problem_url: &ProblemUrl) -> bool {
        kind != MutationKind::Rescore || self.rescorer.is_some()
    }
}

struct JsonModule {
    state: Map<String, Value>,
    rescorer: Option<Rescorer>,
}

impl ModuleHandle for JsonModule {
    fn rescore(&mut self) -> Result<(), InstanceError> {
        let rescorer = self
            .rescorer
            .as_ref()
            .ok_or_else(|| InstanceError::Unsupported("problem does not support rescoring".to_string()))?;
        rescorer(&mut self.state).map_err(InstanceError::Failed)
    }

    fn reset_attempts(&mut self) -> Result<(), InstanceError> {
        if let Some(attempts) = self.state.get_mut("attempts") {
            *attempts = Value::from(0);
        }
        Ok(())
    }

    fn state(&self) -> Result<String, InstanceError> {
        serde_json::to_string(&self.state).map_err(|e| InstanceError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::store::InMemoryModuleStateStore;
    use serde_json::json;

    fn refs() -> (CourseId, StudentId, ProblemUrl) {
        (
            CourseId::new("edx/1.23x/test_course").unwrap(),
            StudentId::new("robot1").unwrap(),
            ProblemUrl::new("i4x://edx/1.23x/problem/H1P1").unwrap(),
        )
    }

    fn store_with(state: Option<&str>) -> Arc<InMemoryModuleStateStore> {
        let (course, student, problem) = refs();
        let store = InMemoryModuleStateStore::arc();
        store
            .put(course, student, problem, state.map(str::to_string))
            .unwrap();
        store
    }

    #[test]
    fn reset_zeroes_attempts() {
        let (course, student, problem) = refs();
        let instantiator = JsonStateInstantiator::new(store_with(Some(r#"{"attempts": 3, "done": true}"#)));

        let mut module = instantiator.load_instance(&course, &student, &problem).unwrap();
        module.reset_attempts().unwrap();
        let state: Value = serde_json::from_str(&module.state().unwrap()).unwrap();
        assert_eq!(state, json!({"attempts": 0, "done": true}));
    }

    #[test]
    fn reset_without_attempts_leaves_state_alone() {
        let (course, student, problem) = refs();
        let instantiator = JsonStateInstantiator::new(store_with(None));

        let mut module = instantiator.load_instance(&course, &student, &problem).unwrap();
        module.reset_attempts().unwrap();
        assert_eq!(module.state().unwrap(), "{}");
    }

    #[test]
    fn rescore_requires_a_rescorer() {
        let (course, student, problem) = refs();
        let plain = JsonStateInstantiator::new(store_with(Some(r#"{"done": true}"#)));
        assert!(!plain.supports(MutationKind::Rescore, &problem));
        assert!(plain.supports(MutationKind::DeleteState, &problem));

        let mut module = plain.load_instance(&course, &student, &problem).unwrap();
        assert!(matches!(module.rescore(), Err(InstanceError::Unsupported(_))));

        let scoring = JsonStateInstantiator::new(store_with(Some(r#"{"done": true}"#)))
            .with_rescorer(|state| {
                state.insert("score".to_string(), json!(1));
                Ok(())
            });
        let mut module = scoring.load_instance(&course, &student, &problem).unwrap();
        module.rescore().unwrap();
        assert!(module.state().unwrap().contains(r#""score":1"#));
    }

    #[test]
    fn correct_map_rescorer_counts_correct_answers() {
        let rescore = correct_map_rescorer();
        let mut state = json!({
            "done": true,
            "correct_map": {
                "p1_2_1": {"correctness": "correct"},
                "p1_3_1": {"correctness": "incorrect"},
                "p1_4_1": {"correctness": "correct"},
            },
        });
        rescore(state.as_object_mut().unwrap()).unwrap();
        assert_eq!(state["score"], json!(2));
        assert_eq!(state["max_score"], json!(3));

        let mut bare = Map::new();
        assert!(rescore(&mut bare).is_err());
    }

    #[test]
    fn load_errors() {
        let (course, student, problem) = refs();
        let corrupt = JsonStateInstantiator::new(store_with(Some("[1, 2]")));
        assert!(matches!(
            corrupt.load_instance(&course, &student, &problem).err(),
            Some(InstanceError::CorruptState(_))
        ));

        let missing = JsonStateInstantiator::new(InMemoryModuleStateStore::arc());
        assert!(matches!(
            missing.load_instance(&course, &student, &problem).err(),
            Some(InstanceError::NotFound { .. })
        ));
    }
}
