//! Result and pending records: the (parameters, results, metadata) triples
//! produced by experiment runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A point in the parameter space: parameter name to value.
pub type Params = BTreeMap<String, Value>;

/// Experimental results: result name to value.
pub type Results = BTreeMap<String, Value>;

/// Run metadata: metadata key to value. The standard keys live in
/// [`metadata_keys`].
pub type Metadata = BTreeMap<String, Value>;

/// The fixed metadata keys every run driver records, plus the keys added by
/// combinators and pending-result resolution.
pub mod metadata_keys {
    /// True when the run completed successfully.
    pub const STATUS: &str = "status";
    /// Error message for a failed run, empty on success.
    pub const EXCEPTION: &str = "exception";
    /// Rendered stack for a failed run, always text.
    pub const TRACEBACK: &str = "traceback";
    /// ISO-8601 UTC timestamp at which the run started.
    pub const START_TIME: &str = "start_time";
    /// ISO-8601 UTC timestamp at which the run ended.
    pub const END_TIME: &str = "end_time";
    /// Total wall-clock duration of the run in seconds.
    pub const ELAPSED_TIME: &str = "elapsed_time";
    /// Seconds spent in the set-up phase.
    pub const SETUP_TIME: &str = "setup_time";
    /// Seconds spent in the experiment body.
    pub const EXPERIMENT_TIME: &str = "experiment_time";
    /// Seconds spent in the tear-down phase.
    pub const TEARDOWN_TIME: &str = "teardown_time";
    /// Identifier of the experiment kind that produced the record.
    pub const EXPERIMENT_CLASS: &str = "experiment_class";
    /// Number of repetitions a repeating combinator performed.
    pub const REPETITIONS: &str = "repetitions";
    /// Index of a record within a repetition bundle.
    pub const REPETITION_INDEX: &str = "repetition_index";
    /// Job identifier a record resolves, set when it arrives asynchronously.
    pub const JOB_ID: &str = "job_id";
}

/// Collects name/value pairs into a parameter, result, or metadata mapping.
pub fn fields<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> BTreeMap<String, Value>
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// One experiment outcome: parameters, results, and run metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultRecord {
    /// The parameter point the experiment ran at.
    pub parameters: Params,
    /// The results generated at that point.
    pub results: Results,
    /// Timing, status, and provenance metadata for the run.
    pub metadata: Metadata,
}

impl ResultRecord {
    /// Creates a record from its three components.
    pub fn new(parameters: Params, results: Results, metadata: Metadata) -> Self {
        Self {
            parameters,
            results,
            metadata,
        }
    }

    /// True when the record describes a successful run.
    pub fn success(&self) -> bool {
        self.metadata
            .get(metadata_keys::STATUS)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The job identifier carried in the metadata, if any.
    pub fn job_id(&self) -> Option<&str> {
        self.metadata
            .get(metadata_keys::JOB_ID)
            .and_then(Value::as_text)
    }
}

/// Work dispatched but not yet resolved: a parameter point and the job
/// identifier issued at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    /// The parameter point the job was submitted for.
    pub parameters: Params,
    /// Token unique within the owning notebook.
    pub job_id: String,
}

impl PendingRecord {
    /// Creates a pending record.
    pub fn new(parameters: Params, job_id: impl Into<String>) -> Self {
        Self {
            parameters,
            job_id: job_id.into(),
        }
    }
}
