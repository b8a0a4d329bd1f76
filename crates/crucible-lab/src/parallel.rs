//! A lab dispatching over a local worker pool.

use rayon::prelude::*;

use crucible_core::{CrucibleError, ErrorInfo, ResultRecord};
use crucible_store::Notebook;

use crate::experiment::{Experiment, Runner};
use crate::lab::{AsLab, Lab};

/// A lab that runs experiments in parallel on the local host.
///
/// Synchronous from the caller's perspective: `run_experiment` blocks until
/// every point has completed. Each task runs on its own clone of the
/// experiment, so workers communicate with the lab exclusively through the
/// parameter point in and the produced records out; mutations to a worker's
/// experiment state are invisible to the caller. Records arrive in completion
/// order, which the result set does not depend on.
pub struct ParallelLab {
    lab: Lab,
    cores: usize,
}

impl std::fmt::Debug for ParallelLab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelLab")
            .field("lab", &self.lab)
            .field("cores", &self.cores)
            .finish()
    }
}

impl ParallelLab {
    /// Creates a parallel lab using `max(1, cores - 1)` workers.
    pub fn new(notebook: Notebook) -> Self {
        Self::with_cores(notebook, default_cores())
    }

    /// Creates a parallel lab with an explicit worker count, capped at the
    /// host's core count.
    pub fn with_cores(notebook: Notebook, cores: usize) -> Self {
        Self {
            lab: Lab::new(notebook),
            cores: cores.clamp(1, host_cores()),
        }
    }

    /// The number of workers experiments will run on.
    pub fn cores(&self) -> usize {
        self.cores
    }

    /// The notebook collecting this lab's results.
    pub fn notebook(&self) -> &Notebook {
        self.lab.notebook()
    }

    /// Mutable access to the notebook.
    pub fn notebook_mut(&mut self) -> &mut Notebook {
        self.lab.notebook_mut()
    }

    /// Runs the experiment at every point of the design on the worker pool,
    /// blocking until all points complete. Failures in individual runs become
    /// failed records and do not halt the pool.
    pub fn run_experiment<E>(&mut self, experiment: &E) -> Result<(), CrucibleError>
    where
        E: Experiment + Clone + Sync,
    {
        let points = self.lab.experiments()?;
        if points.is_empty() {
            return self.lab.notebook_mut().commit();
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cores)
            .build()
            .map_err(|err| {
                CrucibleError::Dispatch(
                    ErrorInfo::new("worker-pool", "failed to build the worker pool").caused_by(err),
                )
            })?;

        let results: Vec<Vec<ResultRecord>> = pool.install(|| {
            points
                .into_par_iter()
                .map(|point| {
                    let mut runner = Runner::new(experiment.clone());
                    runner.set(point);
                    runner.run()
                })
                .collect()
        });

        for records in results {
            self.lab.notebook_mut().add_results(records)?;
        }
        self.lab.notebook_mut().commit()
    }
}

impl AsLab for ParallelLab {
    fn as_lab(&self) -> &Lab {
        &self.lab
    }

    fn as_lab_mut(&mut self) -> &mut Lab {
        &mut self.lab
    }
}

fn host_cores() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
}

fn default_cores() -> usize {
    host_cores().saturating_sub(1).max(1)
}
