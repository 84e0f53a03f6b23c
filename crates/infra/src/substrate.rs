//! Where task bodies run.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use tracing::{debug, error, info};

use coursetasks_core::TaskId;
use coursetasks_tasks::MutationKind;

use crate::config::ExecutorConfig;

/// A unit of work handed to a substrate.
pub struct TaskSubmission {
    pub task_id: TaskId,
    pub kind: MutationKind,
    pub body: Box<dyn FnOnce() + Send + 'static>,
}

impl fmt::Debug for TaskSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSubmission")
            .field("task_id", &self.task_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SubstrateError {
    #[error("substrate is shut down")]
    Closed,
    #[error("failed to start worker: {0}")]
    Spawn(String),
}

/// Accepts task bodies for asynchronous execution.
pub trait TaskSubstrate: Send + Sync {
    fn submit(&self, submission: TaskSubmission) -> Result<(), SubstrateError>;
}

impl<S> TaskSubstrate for Arc<S>
where
    S: TaskSubstrate + ?Sized,
{
    fn submit(&self, submission: TaskSubmission) -> Result<(), SubstrateError> {
        (**self).submit(submission)
    }
}

/// Runs each body on the submitting thread before `submit` returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineSubstrate;

impl TaskSubstrate for InlineSubstrate {
    fn submit(&self, submission: TaskSubmission) -> Result<(), SubstrateError> {
        run_body(submission);
        Ok(())
    }
}

/// Fixed set of named worker threads fed through one channel.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<mpsc::Sender<TaskSubmission>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn spawn(config: &ExecutorConfig) -> Result<Self, SubstrateError> {
        let (tx, rx) = mpsc::channel::<TaskSubmission>();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(config.workers);
        for n in 0..config.workers.max(1) {
            let rx = Arc::clone(&rx);
            let name = format!("{}-{n}", config.worker_name);
            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&name, &rx))
                .map_err(|e| SubstrateError::Spawn(e.to_string()))?;
            workers.push(join);
        }

        info!(pool = %config.worker_name, workers = workers.len(), "worker pool started");
        Ok(Self {
            name: config.worker_name.clone(),
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Stop accepting work, let queued bodies finish, and join the workers.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        if workers.is_empty() {
            return;
        }
        for join in workers {
            let _ = join.join();
        }
        info!(pool = %self.name, "worker pool stopped");
    }
}

impl TaskSubstrate for WorkerPool {
    fn submit(&self, submission: TaskSubmission) -> Result<(), SubstrateError> {
        let sender = self.sender.lock().map_err(|_| SubstrateError::Closed)?;
        let sender = sender.as_ref().ok_or(SubstrateError::Closed)?;
        sender.send(submission).map_err(|_| SubstrateError::Closed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(name: &str, rx: &Mutex<mpsc::Receiver<TaskSubmission>>) {
    debug!(worker = name, "worker started");
    loop {
        let next = match rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        match next {
            Ok(submission) => run_body(submission),
            Err(_) => break,
        }
    }
    debug!(worker = name, "worker stopped");
}

fn run_body(submission: TaskSubmission) {
    let TaskSubmission { task_id, kind, body } = submission;
    if panic::catch_unwind(AssertUnwindSafe(body)).is_err() {
        error!(task_id = %task_id, kind = %kind, "task body panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn submission(body: impl FnOnce() + Send + 'static) -> TaskSubmission {
        TaskSubmission {
            task_id: TaskId::new(),
            kind: MutationKind::Rescore,
            body: Box::new(body),
        }
    }

    #[test]
    fn inline_runs_before_returning() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        InlineSubstrate
            .submit(submission(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_runs_everything_and_survives_panics() {
        let pool = WorkerPool::spawn(&ExecutorConfig::default().with_workers(3)).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit(submission(|| panic!("bad task"))).unwrap();
        for _ in 0..20 {
            let counter = ran.clone();
            pool.submit(submission(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 20);
        assert!(matches!(pool.submit(submission(|| {})), Err(SubstrateError::Closed)));
    }
}
