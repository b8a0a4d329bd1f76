//! A lab dispatching asynchronously to a remote worker farm.

use std::time::{Duration, Instant};

use chrono::Utc;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crucible_core::{
    metadata_keys, CrucibleError, ErrorInfo, Params, ResultRecord, Results, Value,
};
use crucible_store::Notebook;

use crate::experiment::Experiment;
use crate::farm::{FarmError, JobStatus, WorkerFarm};
use crate::lab::{AsLab, Lab};

/// Bounded reconnection policy for transient farm errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt before surfacing `Dispatch`.
    pub attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// A lab submitting experiments to a remote worker farm and returning
/// immediately, for disconnected operation.
///
/// `run_experiment` registers one pending record per submitted point and
/// returns; a later `update_results` drains completions back into real
/// records. Completions always land in their submit-time result set, found
/// through the notebook's global job-id lookup, so updates may safely
/// interleave work from several tags.
pub struct ClusterLab {
    lab: Lab,
    farm: Box<dyn WorkerFarm>,
    retry: RetryPolicy,
    wait_interval: Duration,
}

impl std::fmt::Debug for ClusterLab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterLab")
            .field("lab", &self.lab)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ClusterLab {
    /// Creates a cluster lab over the given notebook and farm.
    pub fn new(notebook: Notebook, farm: Box<dyn WorkerFarm>) -> Self {
        Self {
            lab: Lab::new(notebook),
            farm,
            retry: RetryPolicy::default(),
            wait_interval: Duration::from_secs(1),
        }
    }

    /// Overrides the reconnection policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the polling interval used by [`ClusterLab::wait`].
    pub fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    /// The notebook collecting this lab's results.
    pub fn notebook(&self) -> &Notebook {
        self.lab.notebook()
    }

    /// Mutable access to the notebook.
    pub fn notebook_mut(&mut self) -> &mut Notebook {
        self.lab.notebook_mut()
    }

    /// Consumes the lab, returning the notebook and the farm handle.
    pub fn into_parts(self) -> (Notebook, Box<dyn WorkerFarm>) {
        (self.lab.into_notebook(), self.farm)
    }

    /// Number of engines available on the farm.
    pub fn engine_count(&mut self) -> Result<usize, CrucibleError> {
        with_retries(self.farm.as_mut(), &self.retry, |farm| farm.engine_count())
    }

    /// Ensures the named modules are importable on every engine.
    pub fn imports(&mut self, modules: &[String]) -> Result<(), CrucibleError> {
        with_retries(self.farm.as_mut(), &self.retry, |farm| farm.imports(modules))
    }

    /// Submits one task per design point and returns immediately, having
    /// registered one pending record per submission in the current set.
    /// Submission order is shuffled so partial result sets sample the space
    /// representatively. Returns the number of submitted tasks.
    pub fn run_experiment<E>(&mut self, experiment: &E) -> Result<usize, CrucibleError>
    where
        E: Experiment + Clone + 'static,
    {
        let mut points = self.lab.experiments()?;
        if points.is_empty() {
            return Ok(0);
        }
        points.shuffle(&mut rand::thread_rng());

        let mut submitted = 0usize;
        let mut failure = None;
        for point in points {
            let job_id = match with_retries(self.farm.as_mut(), &self.retry, |farm| {
                farm.submit(Box::new(experiment.clone()), &point)
            }) {
                Ok(job_id) => job_id,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };
            if let Err(err) = self.lab.notebook_mut().add_pending_with_id(point, &job_id) {
                failure = Some(err);
                break;
            }
            submitted += 1;
        }
        // pending records registered so far must survive even a failed batch
        let commit = self.lab.notebook_mut().commit();
        if let Some(err) = failure {
            return Err(err);
        }
        commit?;
        info!(submitted, "submitted experiment batch to farm");
        Ok(submitted)
    }

    /// Polls the farm, converting every drained job into a real record in its
    /// submit-time set, and commits when anything resolved. Returns the
    /// number of jobs resolved by this call.
    pub fn update_results(&mut self) -> Result<usize, CrucibleError> {
        if self.lab.notebook().number_of_pending() == 0 {
            return Ok(0);
        }
        let updates = with_retries(self.farm.as_mut(), &self.retry, |farm| farm.pull_ready())?;
        let mut resolved = 0usize;
        for update in updates {
            let notebook = self.lab.notebook_mut();
            let Some(tag) = notebook.tag_of_pending(&update.job_id).map(str::to_string) else {
                // a job this notebook knows nothing about; not ours to record
                continue;
            };
            match update.status {
                JobStatus::Completed(records) => {
                    notebook.resolve_pending(&update.job_id, records)?;
                }
                JobStatus::Failed(message) => {
                    let params = notebook
                        .result_set(&tag)
                        .expect("tag resolved above")
                        .pending_parameters(&update.job_id)?;
                    let record = engine_failure_record(params, &message);
                    notebook.resolve_pending(&update.job_id, [record])?;
                }
                JobStatus::Cancelled => {
                    notebook.cancel_pending(&update.job_id)?;
                }
            }
            resolved += 1;
        }
        if resolved > 0 {
            self.lab.notebook_mut().commit()?;
        }
        Ok(resolved)
    }

    /// Updates results, then reports the resolved fraction of the selected
    /// set.
    pub fn ready_fraction(&mut self) -> Result<f64, CrucibleError> {
        self.update_results()?;
        Ok(self.lab.notebook().current().ready_fraction())
    }

    /// Updates results, then reports whether the selected set has no pending
    /// records left.
    pub fn ready(&mut self) -> Result<bool, CrucibleError> {
        self.update_results()?;
        Ok(self.lab.notebook().current().ready())
    }

    /// Polls until the selected set is ready or the timeout expires, with a
    /// bounded polling interval. `None` waits indefinitely. Returns whether
    /// the set became ready.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<bool, CrucibleError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.ready()? {
                return Ok(true);
            }
            let sleep_for = match deadline {
                None => self.wait_interval,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.wait_interval.min(deadline - now)
                }
            };
            std::thread::sleep(sleep_for);
        }
    }

    /// Cancels a pending result: best-effort cancellation on the farm, and
    /// always records the synthetic cancelled record locally. Idempotent on
    /// already-resolved jobs, returning `false`.
    pub fn cancel_pending(&mut self, job_id: &str) -> Result<bool, CrucibleError> {
        if let Err(err) = with_retries(self.farm.as_mut(), &self.retry, |farm| farm.cancel(job_id)) {
            warn!(job_id, error = %err, "best-effort farm cancellation failed");
        }
        let cancelled = self.lab.notebook_mut().cancel_pending(job_id)?;
        if cancelled {
            self.lab.notebook_mut().commit()?;
        }
        Ok(cancelled)
    }
}

impl AsLab for ClusterLab {
    fn as_lab(&self) -> &Lab {
        &self.lab
    }

    fn as_lab_mut(&mut self) -> &mut Lab {
        &mut self.lab
    }
}

/// Retries a farm operation with exponential backoff on transient errors,
/// surfacing `Dispatch` once the budget is exhausted.
fn with_retries<T>(
    farm: &mut dyn WorkerFarm,
    retry: &RetryPolicy,
    mut op: impl FnMut(&mut dyn WorkerFarm) -> Result<T, FarmError>,
) -> Result<T, CrucibleError> {
    let mut delay = retry.base_delay;
    let mut last = String::new();
    for attempt in 0..=retry.attempts {
        match op(farm) {
            Ok(value) => return Ok(value),
            Err(FarmError::Fatal(message)) => {
                return Err(CrucibleError::Dispatch(ErrorInfo::new(
                    "farm-fatal",
                    message,
                )));
            }
            Err(FarmError::Transient(message)) => {
                last = message;
                if attempt < retry.attempts {
                    warn!(attempt, error = %last, "transient farm error, retrying");
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
    Err(CrucibleError::Dispatch(
        ErrorInfo::new(
            "farm-retries",
            format!("farm unreachable after {} attempts", retry.attempts + 1),
        )
        .caused_by(last),
    ))
}

/// The failed record recorded for a task whose engine crashed mid-run.
fn engine_failure_record(parameters: Params, message: &str) -> ResultRecord {
    let mut record = ResultRecord::new(parameters, Results::new(), Default::default());
    let meta = &mut record.metadata;
    meta.insert(metadata_keys::STATUS.to_string(), Value::Bool(false));
    meta.insert(
        metadata_keys::EXCEPTION.to_string(),
        Value::Text(message.to_string()),
    );
    meta.insert(
        metadata_keys::TRACEBACK.to_string(),
        Value::Text(format!("remote task failed: {message}")),
    );
    meta.insert(
        metadata_keys::END_TIME.to_string(),
        Value::Text(Utc::now().to_rfc3339()),
    );
    record
}
