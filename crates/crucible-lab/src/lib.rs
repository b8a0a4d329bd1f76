//! Experiments, designs, and dispatchers for the crucible experiment manager.
//!
//! An [`Experiment`] is run at every point of a parameter space enumerated by
//! a [`Design`], under one of three labs sharing a single contract: [`Lab`]
//! runs sequentially, [`ParallelLab`] over a local worker pool, and
//! [`ClusterLab`] asynchronously against a remote [`WorkerFarm`].

mod cluster;
mod combinator;
mod design;
mod experiment;
mod farm;
mod lab;
mod parallel;

pub use cluster::{ClusterLab, RetryPolicy};
pub use combinator::{
    Repeat, Summary, MAX_SUFFIX, MEAN_SUFFIX, MEDIAN_SUFFIX, MIN_SUFFIX,
    UNDERLYING_RESULTS, UNDERLYING_SUCCESSFUL_RESULTS, VARIANCE_SUFFIX,
};
pub use design::{linspace, Design, FactorialDesign, ParameterRanges, PointwiseDesign};
pub use experiment::{Experiment, Runner, Yield};
pub use farm::{FarmError, JobStatus, JobUpdate, LocalFarm, WorkerFarm};
pub use lab::{AsLab, CreateOptions, Lab};
pub use parallel::ParallelLab;
