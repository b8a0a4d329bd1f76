//! The abstract worker-farm contract consumed by the cluster lab, and an
//! in-process farm used for tests and local simulation.

use std::collections::VecDeque;
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex};

use crucible_core::{Params, ResultRecord};

use crate::experiment::{Experiment, Runner};

/// The state of a drained job.
#[derive(Debug, Clone)]
pub enum JobStatus {
    /// The task ran to completion and produced these records.
    Completed(Vec<ResultRecord>),
    /// The task's engine failed outright; the text describes the failure.
    Failed(String),
    /// The task was cancelled on the farm before completing.
    Cancelled,
}

/// One entry returned by [`WorkerFarm::pull_ready`].
#[derive(Debug, Clone)]
pub struct JobUpdate {
    /// The job the update is for.
    pub job_id: String,
    /// What became of it.
    pub status: JobStatus,
}

/// Errors a farm can raise, split by whether a retry can help.
#[derive(Debug, Clone)]
pub enum FarmError {
    /// A transient condition (connection dropped, controller restart); the
    /// caller retries with backoff.
    Transient(String),
    /// A permanent condition (unserialisable payload, protocol error).
    Fatal(String),
}

impl Display for FarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FarmError::Transient(msg) => write!(f, "transient farm error: {msg}"),
            FarmError::Fatal(msg) => write!(f, "farm error: {msg}"),
        }
    }
}

impl std::error::Error for FarmError {}

/// The abstract contract a remote worker farm must satisfy.
///
/// A farm ships experiment payloads and parameters to remote engines,
/// reports drained completions, and cancels best-effort. Implementations
/// serialise the payload however their transport requires; a payload that
/// cannot be shipped fails the submission with [`FarmError::Fatal`].
pub trait WorkerFarm: Send {
    /// Number of engines available to run tasks.
    fn engine_count(&mut self) -> Result<usize, FarmError>;

    /// Ships one task, returning the farm-issued job id.
    fn submit(&mut self, experiment: Box<dyn Experiment>, params: &Params)
        -> Result<String, FarmError>;

    /// Drains every job that has reached a final state since the last pull.
    fn pull_ready(&mut self) -> Result<Vec<JobUpdate>, FarmError>;

    /// Cancels a job best-effort, returning whether the farm knew it.
    fn cancel(&mut self, job_id: &str) -> Result<bool, FarmError>;

    /// Ensures the named modules are importable on every engine before
    /// submissions. Farms without an import mechanism may ignore this.
    fn imports(&mut self, modules: &[String]) -> Result<(), FarmError> {
        let _ = modules;
        Ok(())
    }
}

struct LocalJob {
    job_id: String,
    experiment: Box<dyn Experiment>,
    params: Params,
}

struct FarmState {
    engines: usize,
    connected: bool,
    next_job: u64,
    queue: VecDeque<LocalJob>,
    drain_limit: Option<usize>,
}

/// An in-process farm executing submitted tasks on demand.
///
/// Tasks queue at submission and run when [`WorkerFarm::pull_ready`] drains
/// them, which models the asynchronous submit-now/collect-later contract
/// without a remote cluster. The handle is cheaply cloneable, so a test can
/// keep one clone to toggle connectivity while a lab owns another; queued
/// work survives a simulated disconnection.
#[derive(Clone)]
pub struct LocalFarm {
    state: Arc<Mutex<FarmState>>,
}

impl Default for LocalFarm {
    fn default() -> Self {
        Self::new(1)
    }
}

impl LocalFarm {
    /// Creates a farm presenting the given number of engines.
    pub fn new(engines: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(FarmState {
                engines: engines.max(1),
                connected: true,
                next_job: 0,
                queue: VecDeque::new(),
                drain_limit: None,
            })),
        }
    }

    /// Simulates dropping or restoring the connection to the farm. While
    /// disconnected every operation fails transiently.
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Caps how many tasks one `pull_ready` call executes, so completion can
    /// be observed arriving gradually. `None` drains everything.
    pub fn set_drain_limit(&self, limit: Option<usize>) {
        self.lock().drain_limit = limit;
    }

    /// Number of tasks queued and not yet drained.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FarmState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WorkerFarm for LocalFarm {
    fn engine_count(&mut self) -> Result<usize, FarmError> {
        let state = self.lock();
        if !state.connected {
            return Err(FarmError::Transient("farm connection dropped".to_string()));
        }
        Ok(state.engines)
    }

    fn submit(
        &mut self,
        experiment: Box<dyn Experiment>,
        params: &Params,
    ) -> Result<String, FarmError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(FarmError::Transient("farm connection dropped".to_string()));
        }
        state.next_job += 1;
        let job_id = format!("job-{:08x}", state.next_job);
        state.queue.push_back(LocalJob {
            job_id: job_id.clone(),
            experiment,
            params: params.clone(),
        });
        Ok(job_id)
    }

    fn pull_ready(&mut self) -> Result<Vec<JobUpdate>, FarmError> {
        let jobs = {
            let mut state = self.lock();
            if !state.connected {
                return Err(FarmError::Transient("farm connection dropped".to_string()));
            }
            let take = state.drain_limit.unwrap_or(state.queue.len()).min(state.queue.len());
            state.queue.drain(..take).collect::<Vec<_>>()
        };
        let mut updates = Vec::with_capacity(jobs.len());
        for job in jobs {
            let mut runner = Runner::new(job.experiment);
            runner.set(job.params);
            let records = runner.run();
            updates.push(JobUpdate {
                job_id: job.job_id,
                status: JobStatus::Completed(records),
            });
        }
        Ok(updates)
    }

    fn cancel(&mut self, job_id: &str) -> Result<bool, FarmError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(FarmError::Transient("farm connection dropped".to_string()));
        }
        let before = state.queue.len();
        state.queue.retain(|job| job.job_id != job_id);
        Ok(state.queue.len() != before)
    }
}
