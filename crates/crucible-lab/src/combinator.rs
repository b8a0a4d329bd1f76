//! Experiment combinators: experiments that wrap another experiment and
//! structure its runs.

use crucible_core::{metadata_keys, Params, ResultRecord, Results, Value};

use crate::experiment::{Experiment, Runner, Yield};

/// Suffix for the mean of a summarised result field.
pub const MEAN_SUFFIX: &str = "_mean";
/// Suffix for the median of a summarised result field.
pub const MEDIAN_SUFFIX: &str = "_median";
/// Suffix for the population variance of a summarised result field.
pub const VARIANCE_SUFFIX: &str = "_variance";
/// Suffix for the minimum of a summarised result field.
pub const MIN_SUFFIX: &str = "_min";
/// Suffix for the maximum of a summarised result field.
pub const MAX_SUFFIX: &str = "_max";
/// Result field counting the records the summary ran over.
pub const UNDERLYING_RESULTS: &str = "underlying_results";
/// Result field counting the successful records the summary ran over.
pub const UNDERLYING_SUCCESSFUL_RESULTS: &str = "underlying_successful_results";

/// Runs an inner experiment N times at the same parameter point and returns
/// the ordered bundle of all produced records.
///
/// Nested bundles (an inner experiment that itself returns a list) are
/// flattened, so an inner experiment producing M records yields M·N records
/// with a flat `repetition_index`.
#[derive(Debug, Clone)]
pub struct Repeat<E: Experiment> {
    inner: Runner<E>,
    repetitions: usize,
}

impl<E: Experiment> Repeat<E> {
    /// Creates a repeated version of the given experiment.
    pub fn new(experiment: E, repetitions: usize) -> Self {
        Self {
            inner: Runner::new(experiment),
            repetitions,
        }
    }

    /// The number of repetitions performed per run.
    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    /// The wrapped experiment.
    pub fn experiment(&self) -> &E {
        self.inner.experiment()
    }
}

impl<E: Experiment> Experiment for Repeat<E> {
    fn configure(&mut self, params: &Params) -> anyhow::Result<()> {
        self.inner.set(params.clone());
        Ok(())
    }

    fn perform(&mut self, _params: &mut Params) -> anyhow::Result<Yield> {
        let mut records = Vec::with_capacity(self.repetitions);
        for _ in 0..self.repetitions {
            records.extend(self.inner.run());
        }
        for (index, record) in records.iter_mut().enumerate() {
            record.metadata.insert(
                metadata_keys::REPETITIONS.to_string(),
                Value::Int(self.repetitions as i64),
            );
            record.metadata.insert(
                metadata_keys::REPETITION_INDEX.to_string(),
                Value::Int(index as i64),
            );
        }
        Ok(Yield::Bundle(records))
    }
}

/// Runs an inner experiment (usually a [`Repeat`]) once and replaces its
/// records with summary statistics over the numeric result fields.
///
/// For every summarised field `v` the summary emits `v_mean`, `v_median`,
/// `v_variance` (population), `v_min`, and `v_max`, plus the counts
/// `underlying_results` and `underlying_successful_results`. Failed
/// sub-records are excluded unless `keep_on_failure` is set.
#[derive(Debug, Clone)]
pub struct Summary<E: Experiment> {
    inner: Runner<E>,
    fields: Option<Vec<String>>,
    keep_on_failure: bool,
}

impl<E: Experiment> Summary<E> {
    /// Creates a summary over all numeric result fields of the inner
    /// experiment.
    pub fn new(experiment: E) -> Self {
        Self {
            inner: Runner::new(experiment),
            fields: None,
            keep_on_failure: false,
        }
    }

    /// Restricts the summary to the named result fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Includes failed sub-records in the summary statistics.
    pub fn keep_on_failure(mut self) -> Self {
        self.keep_on_failure = true;
        self
    }
}

impl<E: Experiment> Experiment for Summary<E> {
    fn configure(&mut self, params: &Params) -> anyhow::Result<()> {
        self.inner.set(params.clone());
        Ok(())
    }

    fn perform(&mut self, _params: &mut Params) -> anyhow::Result<Yield> {
        let records = self.inner.run();
        let total = records.len();
        let successful = records.iter().filter(|r| r.success()).count();
        let kept: Vec<&ResultRecord> = records
            .iter()
            .filter(|record| self.keep_on_failure || record.success())
            .collect();

        let names: Vec<String> = match &self.fields {
            Some(fields) => fields.clone(),
            None => {
                let mut names: Vec<String> = Vec::new();
                for record in &kept {
                    for name in record.results.keys() {
                        if !names.contains(name) {
                            names.push(name.clone());
                        }
                    }
                }
                names
            }
        };

        let mut summary = Results::new();
        for name in names {
            let values: Vec<f64> = kept
                .iter()
                .filter_map(|record| record.results.get(&name).and_then(Value::as_f64))
                .collect();
            if values.is_empty() {
                continue;
            }
            summary.insert(format!("{name}{MEAN_SUFFIX}"), Value::Float(mean(&values)));
            summary.insert(format!("{name}{MEDIAN_SUFFIX}"), Value::Float(median(&values)));
            summary.insert(
                format!("{name}{VARIANCE_SUFFIX}"),
                Value::Float(variance(&values)),
            );
            summary.insert(
                format!("{name}{MIN_SUFFIX}"),
                Value::Float(values.iter().copied().fold(f64::INFINITY, f64::min)),
            );
            summary.insert(
                format!("{name}{MAX_SUFFIX}"),
                Value::Float(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            );
        }
        summary.insert(UNDERLYING_RESULTS.to_string(), Value::Int(total as i64));
        summary.insert(
            UNDERLYING_SUCCESSFUL_RESULTS.to_string(),
            Value::Int(successful as i64),
        );
        Ok(Yield::Single(summary))
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

fn variance(values: &[f64]) -> f64 {
    let mu = mean(values);
    values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64
}
