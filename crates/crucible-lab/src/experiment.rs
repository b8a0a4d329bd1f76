//! The experiment capability trait and the driver that runs it.
//!
//! An experiment exposes five lifecycle capabilities. `configure` and
//! `deconfigure` bracket parameter-change boundaries (expensive per-point
//! setup); `set_up` and `tear_down` bracket each individual run. Only
//! `perform` must be provided. The [`Runner`] composes the capabilities into
//! the run protocol, times each phase, and converts payload failures of any
//! kind into failed records rather than errors.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use chrono::Utc;

use crucible_core::{metadata_keys, Metadata, Params, ResultRecord, Results, Value};

/// What a single invocation of [`Experiment::perform`] produced: either one
/// results mapping, or a bundle of already-packaged records (the shape nested
/// combinators return).
#[derive(Debug, Clone)]
pub enum Yield {
    /// A single results mapping, packaged with this run's parameters and
    /// metadata.
    Single(Results),
    /// An ordered repetition bundle of complete records, passed through
    /// unchanged.
    Bundle(Vec<ResultRecord>),
}

impl From<Results> for Yield {
    fn from(results: Results) -> Self {
        Yield::Single(results)
    }
}

/// A computational experiment run at one point of a parameter space.
///
/// Parameter mutations made by `set_up` or `perform` propagate into the
/// produced record's parameters but are not visible to subsequent runs: every
/// run restarts from the parameters given to [`Runner::set`].
pub trait Experiment: Send {
    /// Configures the experiment for a new parameter point. Default does
    /// nothing.
    fn configure(&mut self, params: &Params) -> anyhow::Result<()> {
        let _ = params;
        Ok(())
    }

    /// Releases per-point state before new parameters arrive. Default does
    /// nothing.
    fn deconfigure(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Prepares an individual run. Default does nothing.
    fn set_up(&mut self, params: &mut Params) -> anyhow::Result<()> {
        let _ = params;
        Ok(())
    }

    /// Cleans up after an individual run. Default does nothing.
    fn tear_down(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// The body of the experiment.
    fn perform(&mut self, params: &mut Params) -> anyhow::Result<Yield>;

    /// Identifier of the experiment kind, recorded in every record's
    /// metadata.
    fn class_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<E: Experiment + ?Sized> Experiment for Box<E> {
    fn configure(&mut self, params: &Params) -> anyhow::Result<()> {
        (**self).configure(params)
    }

    fn deconfigure(&mut self) -> anyhow::Result<()> {
        (**self).deconfigure()
    }

    fn set_up(&mut self, params: &mut Params) -> anyhow::Result<()> {
        (**self).set_up(params)
    }

    fn tear_down(&mut self) -> anyhow::Result<()> {
        (**self).tear_down()
    }

    fn perform(&mut self, params: &mut Params) -> anyhow::Result<Yield> {
        (**self).perform(params)
    }

    fn class_name(&self) -> &'static str {
        (**self).class_name()
    }
}

#[derive(Debug, Clone)]
struct Failure {
    exception: String,
    traceback: String,
}

/// Drives an [`Experiment`] through its lifecycle and packages records.
#[derive(Debug, Clone)]
pub struct Runner<E: Experiment> {
    experiment: E,
    parameters: Option<Params>,
    configured: bool,
    config_failure: Option<Failure>,
    last: Vec<ResultRecord>,
}

impl<E: Experiment> Runner<E> {
    /// Wraps an experiment in a fresh driver.
    pub fn new(experiment: E) -> Self {
        Self {
            experiment,
            parameters: None,
            configured: false,
            config_failure: None,
            last: Vec::new(),
        }
    }

    /// The wrapped experiment.
    pub fn experiment(&self) -> &E {
        &self.experiment
    }

    /// Mutable access to the wrapped experiment.
    pub fn experiment_mut(&mut self) -> &mut E {
        &mut self.experiment
    }

    /// Replaces the experiment's parameters: deconfigures first if parameters
    /// were set before, then configures for the new point. A configuration
    /// failure is remembered and surfaces as a failed record on the next run.
    pub fn set(&mut self, params: Params) -> &mut Self {
        self.config_failure = None;
        if self.configured {
            self.configured = false;
            if let Err(failure) = guard(|| self.experiment.deconfigure()) {
                self.config_failure = Some(failure);
            }
        }
        self.parameters = Some(params.clone());
        if self.config_failure.is_none() {
            match guard(|| self.experiment.configure(&params)) {
                Ok(()) => self.configured = true,
                Err(failure) => self.config_failure = Some(failure),
            }
        }
        self
    }

    /// Runs the experiment at the parameters given to [`Runner::set`]:
    /// `set_up`, `perform`, `tear_down`, with wall-clock timing around each
    /// phase. Payload failures (errors or panics) in any phase yield a failed
    /// record; `run` itself never fails. Returns the record, or the records
    /// of a repetition bundle.
    pub fn run(&mut self) -> Vec<ResultRecord> {
        let design_params = self.parameters.clone();
        let mut params = design_params.clone().unwrap_or_default();
        let start_wall = Utc::now();
        let started = Instant::now();

        if design_params.is_none() {
            let failure = Failure {
                exception: "run() called before set()".to_string(),
                traceback: "no parameters have been set for this experiment".to_string(),
            };
            return self.finish_failed(params, failure, start_wall, 0.0, 0.0, 0.0, started);
        }
        if let Some(failure) = self.config_failure.clone() {
            return self.finish_failed(params, failure, start_wall, 0.0, 0.0, 0.0, started);
        }

        // set-up phase
        let setup_started = Instant::now();
        let setup = guard(|| self.experiment.set_up(&mut params));
        let setup_time = setup_started.elapsed().as_secs_f64();
        if let Err(failure) = setup {
            return self.finish_failed(params, failure, start_wall, setup_time, 0.0, 0.0, started);
        }

        // experiment body
        let body_started = Instant::now();
        let outcome = guard(|| self.experiment.perform(&mut params));
        let experiment_time = body_started.elapsed().as_secs_f64();
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(failure) => {
                // the run got as far as set-up, so still attempt tear-down
                let _ = guard(|| self.experiment.tear_down());
                return self.finish_failed(
                    params,
                    failure,
                    start_wall,
                    setup_time,
                    experiment_time,
                    0.0,
                    started,
                );
            }
        };

        // tear-down phase
        let teardown_started = Instant::now();
        let teardown = guard(|| self.experiment.tear_down());
        let teardown_time = teardown_started.elapsed().as_secs_f64();
        if let Err(failure) = teardown {
            return self.finish_failed(
                params,
                failure,
                start_wall,
                setup_time,
                experiment_time,
                teardown_time,
                started,
            );
        }

        let records = match outcome {
            Yield::Single(results) => {
                let mut metadata = self.base_metadata(start_wall, started);
                metadata.insert(metadata_keys::STATUS.to_string(), Value::Bool(true));
                metadata.insert(metadata_keys::EXCEPTION.to_string(), Value::Text(String::new()));
                metadata.insert(metadata_keys::TRACEBACK.to_string(), Value::Text(String::new()));
                metadata.insert(
                    metadata_keys::SETUP_TIME.to_string(),
                    Value::Float(setup_time),
                );
                metadata.insert(
                    metadata_keys::EXPERIMENT_TIME.to_string(),
                    Value::Float(experiment_time),
                );
                metadata.insert(
                    metadata_keys::TEARDOWN_TIME.to_string(),
                    Value::Float(teardown_time),
                );
                vec![ResultRecord::new(params, results, metadata)]
            }
            Yield::Bundle(records) => records,
        };
        self.last = records.clone();
        records
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_failed(
        &mut self,
        params: Params,
        failure: Failure,
        start_wall: chrono::DateTime<Utc>,
        setup_time: f64,
        experiment_time: f64,
        teardown_time: f64,
        started: Instant,
    ) -> Vec<ResultRecord> {
        let mut metadata = self.base_metadata(start_wall, started);
        metadata.insert(metadata_keys::STATUS.to_string(), Value::Bool(false));
        metadata.insert(
            metadata_keys::EXCEPTION.to_string(),
            Value::Text(failure.exception),
        );
        metadata.insert(
            metadata_keys::TRACEBACK.to_string(),
            Value::Text(failure.traceback),
        );
        metadata.insert(metadata_keys::SETUP_TIME.to_string(), Value::Float(setup_time));
        metadata.insert(
            metadata_keys::EXPERIMENT_TIME.to_string(),
            Value::Float(experiment_time),
        );
        metadata.insert(
            metadata_keys::TEARDOWN_TIME.to_string(),
            Value::Float(teardown_time),
        );
        let record = ResultRecord::new(params, Results::new(), metadata);
        self.last = vec![record.clone()];
        vec![record]
    }

    fn base_metadata(&self, start_wall: chrono::DateTime<Utc>, started: Instant) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(
            metadata_keys::START_TIME.to_string(),
            Value::Text(start_wall.to_rfc3339()),
        );
        metadata.insert(
            metadata_keys::END_TIME.to_string(),
            Value::Text(Utc::now().to_rfc3339()),
        );
        metadata.insert(
            metadata_keys::ELAPSED_TIME.to_string(),
            Value::Float(started.elapsed().as_secs_f64()),
        );
        metadata.insert(
            metadata_keys::EXPERIMENT_CLASS.to_string(),
            Value::Text(self.experiment.class_name().to_string()),
        );
        metadata
    }

    /// The parameters set by the last call to [`Runner::set`].
    pub fn parameters(&self) -> Option<&Params> {
        self.parameters.as_ref()
    }

    /// All records produced by the last run.
    pub fn last_records(&self) -> &[ResultRecord] {
        &self.last
    }

    /// The first record of the last run, if any.
    pub fn last_record(&self) -> Option<&ResultRecord> {
        self.last.first()
    }

    /// The results of the last run's first record.
    pub fn last_results(&self) -> Option<&Results> {
        self.last_record().map(|record| &record.results)
    }

    /// The metadata of the last run's first record.
    pub fn last_metadata(&self) -> Option<&Metadata> {
        self.last_record().map(|record| &record.metadata)
    }

    /// True when the last run completed successfully.
    pub fn success(&self) -> bool {
        self.last_record().map(ResultRecord::success).unwrap_or(false)
    }
}

/// Runs a payload closure, capturing both `Err` returns and panics as
/// failures with the error text and a rendered trace. Tracebacks are text
/// because records cross process and host boundaries.
fn guard<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, Failure> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Failure {
            exception: err.to_string(),
            traceback: format!("{err:?}"),
        }),
        Err(panic) => {
            let message = panic_message(&panic);
            Err(Failure {
                traceback: format!("panic: {message}"),
                exception: message,
            })
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "experiment panicked".to_string()
    }
}
