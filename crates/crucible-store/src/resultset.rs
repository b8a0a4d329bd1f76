//! Typed, append-only result sets.
//!
//! A result set holds the records of one homogeneous experiment family
//! together with the pending records of work that has been dispatched but not
//! yet resolved. Field kinds are inferred from the first record and promoted
//! on schema drift; once a set is finished it is locked for good.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, warn};

use crucible_core::{
    metadata_keys, CrucibleError, ErrorInfo, Kind, Params, PendingRecord, ResultRecord, Schema,
    SchemaChange, Value,
};

/// Exception text recorded on a synthesized cancellation record.
pub const CANCELLED_EXCEPTION: &str = "Cancelled";

const STANDARD_METADATA: &[(&str, Kind)] = &[
    (metadata_keys::STATUS, Kind::Bool),
    (metadata_keys::EXCEPTION, Kind::Text),
    (metadata_keys::TRACEBACK, Kind::Text),
    (metadata_keys::START_TIME, Kind::Text),
    (metadata_keys::END_TIME, Kind::Text),
    (metadata_keys::ELAPSED_TIME, Kind::Float),
    (metadata_keys::SETUP_TIME, Kind::Float),
    (metadata_keys::EXPERIMENT_TIME, Kind::Float),
    (metadata_keys::TEARDOWN_TIME, Kind::Float),
    (metadata_keys::EXPERIMENT_CLASS, Kind::Text),
];

/// A typed, append-only collection of result records plus the pending records
/// awaiting asynchronous resolution.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    description: String,
    attributes: BTreeMap<String, String>,
    records: Vec<ResultRecord>,
    pending: Vec<PendingRecord>,
    schema: Schema,
    pending_schema: Schema,
    parameter_names: Vec<String>,
    result_names: Vec<String>,
    metadata_names: Vec<String>,
    width_overrides: BTreeMap<String, u8>,
    locked: bool,
    dirty: bool,
    type_changed: bool,
}

impl ResultSet {
    /// Creates an empty result set with the given description. An empty
    /// description is replaced by a datestamp.
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        let description = if description.is_empty() {
            format!("Results collected on {}", Utc::now().to_rfc3339())
        } else {
            description
        };
        Self {
            description,
            ..Self::default()
        }
    }

    /// Rebuilds a result set from persisted parts, replaying schema inference
    /// over the stored records and applying the lock flag last.
    ///
    /// Used by persistence backends when loading a notebook.
    pub fn from_parts(
        description: String,
        locked: bool,
        attributes: BTreeMap<String, String>,
        records: Vec<ResultRecord>,
        pending: Vec<PendingRecord>,
    ) -> Self {
        let mut set = ResultSet::new(description);
        set.attributes = attributes;
        for record in records {
            set.infer_record(&record);
            set.records.push(record);
        }
        for entry in pending {
            set.infer_pending(&entry.parameters);
            set.pending.push(entry);
        }
        set.locked = locked;
        set.dirty = false;
        set.type_changed = false;
        set
    }

    // ---------- metadata ----------

    /// The free text description of the result set.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Replaces the description.
    pub fn set_description(&mut self, description: impl Into<String>) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        self.description = description.into();
        self.dirty = true;
        Ok(())
    }

    /// Parameter names observed so far, sorted.
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    /// Result names observed so far, sorted.
    pub fn result_names(&self) -> &[String] {
        &self.result_names
    }

    /// Metadata names observed so far, sorted.
    pub fn metadata_names(&self) -> &[String] {
        &self.metadata_names
    }

    /// The inferred schema over parameters, results, and metadata.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The inferred schema over parameters only, used for pending records.
    pub fn pending_schema(&self) -> &Schema {
        &self.pending_schema
    }

    // ---------- locking ----------

    /// True when the set has been finished and locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Cancels every pending record and locks the set against any further
    /// change. Locking is absorbing: calling this again is a no-op.
    pub fn finish(&mut self) -> Vec<ResultRecord> {
        if self.locked {
            return Vec::new();
        }
        let jobs: Vec<String> = self.pending.iter().map(|p| p.job_id.clone()).collect();
        let mut cancelled = Vec::with_capacity(jobs.len());
        for job_id in jobs {
            match self.cancel_pending(&job_id) {
                Ok(record) => cancelled.push(record),
                Err(err) => warn!(job_id = %job_id, error = %err, "failed to cancel pending record"),
            }
        }
        self.locked = true;
        self.dirty = true;
        cancelled
    }

    fn assert_unlocked(&self) -> Result<(), CrucibleError> {
        if self.locked {
            warn!("write attempted against a locked result set");
            return Err(CrucibleError::ResultSetLocked(ErrorInfo::new(
                "resultset-locked",
                "result set is locked against further changes",
            )));
        }
        Ok(())
    }

    // ---------- attributes ----------

    /// Sets a free-form attribute.
    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        self.attributes.insert(key.into(), value.into());
        self.dirty = true;
        Ok(())
    }

    /// Retrieves an attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Deletes an attribute if present.
    pub fn delete_attribute(&mut self, key: &str) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        self.attributes.remove(key);
        self.dirty = true;
        Ok(())
    }

    /// All attributes.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    // ---------- dirtiness ----------

    /// True when the set holds changes not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the set as persisted.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// True when the schema changed since the last persist, which tells a
    /// columnar backend to rebuild its typed storage.
    pub fn is_type_changed(&self) -> bool {
        self.type_changed
    }

    /// Clears the schema-change flag.
    pub fn clear_type_changed(&mut self) {
        self.type_changed = false;
    }

    // ---------- columnar width overrides ----------

    /// Overrides the stored numeric width (in bytes) for a field in the
    /// columnar backend. The default fits the observed values.
    pub fn set_column_width(&mut self, field: impl Into<String>, bytes: u8) {
        self.width_overrides.insert(field.into(), bytes);
        self.dirty = true;
    }

    /// The per-field width overrides.
    pub fn width_overrides(&self) -> &BTreeMap<String, u8> {
        &self.width_overrides
    }

    /// Replaces the width overrides wholesale; used when loading.
    pub fn restore_width_overrides(&mut self, overrides: BTreeMap<String, u8>) {
        self.width_overrides = overrides;
    }

    // ---------- adding results ----------

    /// Appends a single record, inferring and promoting the schema. If the
    /// record's metadata carries a job id matching a pending record, the
    /// pending record is removed.
    pub fn add_record(&mut self, record: ResultRecord) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        self.infer_record(&record);
        if let Some(job_id) = record.job_id().map(str::to_string) {
            self.pending.retain(|p| p.job_id != job_id);
        }
        self.records.push(record);
        self.dirty = true;
        Ok(())
    }

    /// Appends a list of records in order.
    pub fn add_records(
        &mut self,
        records: impl IntoIterator<Item = ResultRecord>,
    ) -> Result<(), CrucibleError> {
        for record in records {
            self.add_record(record)?;
        }
        Ok(())
    }

    fn infer_record(&mut self, record: &ResultRecord) {
        let mut changed = false;
        if self.metadata_names.is_empty() {
            for (name, kind) in STANDARD_METADATA {
                self.observe(Section::Metadata, name, *kind, &mut changed);
            }
        }
        for (name, value) in &record.parameters {
            self.observe(Section::Parameters, name, value.kind(), &mut changed);
            let mut pending_changed = false;
            observe_schema(&mut self.pending_schema, name, value.kind(), &mut pending_changed);
            changed |= pending_changed;
        }
        if record.success() {
            for (name, value) in &record.results {
                self.observe(Section::Results, name, value.kind(), &mut changed);
            }
        }
        for (name, value) in &record.metadata {
            self.observe(Section::Metadata, name, value.kind(), &mut changed);
        }
        if changed {
            self.type_changed = true;
        }
    }

    fn infer_pending(&mut self, params: &Params) {
        let mut changed = false;
        for (name, value) in params {
            self.observe(Section::Parameters, name, value.kind(), &mut changed);
            let mut pending_changed = false;
            observe_schema(&mut self.pending_schema, name, value.kind(), &mut pending_changed);
            changed |= pending_changed;
        }
        if changed {
            self.type_changed = true;
        }
    }

    fn observe(&mut self, section: Section, name: &str, kind: Kind, changed: &mut bool) {
        observe_schema(&mut self.schema, name, kind, changed);
        let names = match section {
            Section::Parameters => &mut self.parameter_names,
            Section::Results => &mut self.result_names,
            Section::Metadata => &mut self.metadata_names,
        };
        if let Err(at) = names.binary_search_by(|existing| existing.as_str().cmp(name)) {
            names.insert(at, name.to_string());
        }
    }

    // ---------- pending results ----------

    /// Registers a pending record for the given parameter point under the
    /// given job id. Job ids must be unique; the parameters must cover every
    /// parameter name the set already knows about.
    pub fn add_pending(
        &mut self,
        params: Params,
        job_id: impl Into<String>,
    ) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        let job_id = job_id.into();
        if self.pending.iter().any(|p| p.job_id == job_id) {
            return Err(CrucibleError::PendingResult(
                ErrorInfo::new("pending-duplicate", "job id already pending").for_job(job_id),
            ));
        }
        self.infer_pending(&params);
        let missing: Vec<&str> = self
            .parameter_names
            .iter()
            .filter(|name| !params.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(CrucibleError::ResultsStructure(
                ErrorInfo::new("pending-missing-parameters", "pending record misses parameters")
                    .at_field(missing.join(", "))
                    .for_job(job_id),
            ));
        }
        self.pending.push(PendingRecord::new(params, job_id));
        self.dirty = true;
        Ok(())
    }

    /// Resolves a pending record with the records that completed it. Each
    /// record is stamped with the job id and appended.
    pub fn resolve_pending(
        &mut self,
        job_id: &str,
        records: impl IntoIterator<Item = ResultRecord>,
    ) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        if !self.has_pending(job_id) {
            return Err(unknown_job(job_id));
        }
        let mut resolved = 0usize;
        for mut record in records {
            record.metadata.insert(
                metadata_keys::JOB_ID.to_string(),
                Value::Text(job_id.to_string()),
            );
            self.add_record(record)?;
            resolved += 1;
        }
        if resolved == 0 {
            // an empty resolution still discharges the pending entry
            self.pending.retain(|p| p.job_id != job_id);
            self.dirty = true;
        }
        Ok(())
    }

    /// Cancels a pending record, synthesizing a failed record that preserves
    /// the audit trail, and returns the synthesized record.
    pub fn cancel_pending(&mut self, job_id: &str) -> Result<ResultRecord, CrucibleError> {
        self.assert_unlocked()?;
        let at = self
            .pending
            .iter()
            .position(|p| p.job_id == job_id)
            .ok_or_else(|| unknown_job(job_id))?;
        let entry = self.pending.remove(at);
        let record = cancellation_record(entry.parameters, job_id);
        self.add_record(record.clone())?;
        info!(job_id = %job_id, "cancelled pending record");
        Ok(record)
    }

    /// Job ids of all pending records, in submission order.
    pub fn pending_job_ids(&self) -> Vec<String> {
        self.pending.iter().map(|p| p.job_id.clone()).collect()
    }

    /// The pending records themselves.
    pub fn pending_records(&self) -> &[PendingRecord] {
        &self.pending
    }

    /// True when the given job id is pending here.
    pub fn has_pending(&self, job_id: &str) -> bool {
        self.pending.iter().any(|p| p.job_id == job_id)
    }

    /// The parameters a pending job was submitted for.
    pub fn pending_parameters(&self, job_id: &str) -> Result<Params, CrucibleError> {
        self.pending
            .iter()
            .find(|p| p.job_id == job_id)
            .map(|p| p.parameters.clone())
            .ok_or_else(|| unknown_job(job_id))
    }

    /// Number of pending records.
    pub fn number_of_pending(&self) -> usize {
        self.pending.len()
    }

    /// True when no pending records remain.
    pub fn ready(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fraction of submitted work that has resolved: `|real| / (|real| +
    /// |pending|)`, defined as 1 when both are zero.
    pub fn ready_fraction(&self) -> f64 {
        let total = self.records.len() + self.pending.len();
        if total == 0 {
            1.0
        } else {
            self.records.len() as f64 / total as f64
        }
    }

    // ---------- retrieving results ----------

    /// All records, normalized to the promoted schema: values are coerced to
    /// the inferred field kinds, missing fields are zero-filled, and the
    /// results of failed runs are zeroed.
    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.iter().map(|r| self.normalize(r)).collect()
    }

    /// Records whose parameters match the given subset.
    pub fn records_for(&self, params: &Params) -> Vec<ResultRecord> {
        self.records()
            .into_iter()
            .filter(|record| {
                params.iter().all(|(name, value)| {
                    let probe = self
                        .schema
                        .kind_of(name)
                        .map(|kind| value.coerce(kind))
                        .unwrap_or_else(|| value.clone());
                    record.parameters.get(name) == Some(&probe)
                })
            })
            .collect()
    }

    /// The distinct observed values for a parameter, in first-observation
    /// order.
    pub fn parameter_range(&self, name: &str) -> Vec<Value> {
        let mut values: Vec<Value> = Vec::new();
        for record in self.records() {
            if let Some(value) = record.parameters.get(name) {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        values
    }

    /// The distinct observed parameter points, in first-observation order.
    pub fn parameter_combinations(&self) -> Vec<Params> {
        let mut combinations: Vec<Params> = Vec::new();
        for record in self.records() {
            if !combinations.contains(&record.parameters) {
                combinations.push(record.parameters.clone());
            }
        }
        combinations
    }

    /// Number of records, including repetitions at the same point.
    pub fn number_of_results(&self) -> usize {
        self.records.len()
    }

    /// True when the set holds neither records nor pending records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.pending.is_empty()
    }

    fn normalize(&self, record: &ResultRecord) -> ResultRecord {
        let success = record.success();
        let mut normalized = ResultRecord::default();
        for name in &self.parameter_names {
            normalized
                .parameters
                .insert(name.clone(), self.field_value(&record.parameters, name));
        }
        for name in &self.result_names {
            let value = if success {
                self.field_value(&record.results, name)
            } else {
                self.zero_for(name)
            };
            normalized.results.insert(name.clone(), value);
        }
        for name in &self.metadata_names {
            normalized
                .metadata
                .insert(name.clone(), self.field_value(&record.metadata, name));
        }
        normalized
    }

    fn field_value(&self, fields: &BTreeMap<String, Value>, name: &str) -> Value {
        let kind = self.schema.kind_of(name).unwrap_or(Kind::Text);
        match fields.get(name) {
            Some(value) => value.coerce(kind),
            None => kind.zero(),
        }
    }

    fn zero_for(&self, name: &str) -> Value {
        self.schema.kind_of(name).unwrap_or(Kind::Text).zero()
    }
}

#[derive(Debug, Clone, Copy)]
enum Section {
    Parameters,
    Results,
    Metadata,
}

fn observe_schema(schema: &mut Schema, name: &str, kind: Kind, changed: &mut bool) {
    match schema.observe(name, kind) {
        SchemaChange::Unchanged => {}
        SchemaChange::Added | SchemaChange::Promoted => *changed = true,
    }
}

fn unknown_job(job_id: &str) -> CrucibleError {
    CrucibleError::PendingResult(
        ErrorInfo::new("pending-unknown", "unrecognised pending result job identifier")
            .for_job(job_id),
    )
}

/// Builds the synthetic failed record for a cancelled pending result. The
/// cancellation error is rendered into the traceback so the audit trail shows
/// why no results exist for the point.
pub fn cancellation_record(parameters: Params, job_id: &str) -> ResultRecord {
    let cause = CrucibleError::Cancelled(
        ErrorInfo::new("pending-cancelled", "pending result cancelled before completion")
            .for_job(job_id),
    );
    let mut record = ResultRecord {
        parameters,
        ..ResultRecord::default()
    };
    let now = Utc::now().to_rfc3339();
    let meta = &mut record.metadata;
    meta.insert(metadata_keys::STATUS.to_string(), Value::Bool(false));
    meta.insert(
        metadata_keys::EXCEPTION.to_string(),
        Value::Text(CANCELLED_EXCEPTION.to_string()),
    );
    meta.insert(
        metadata_keys::TRACEBACK.to_string(),
        Value::Text(cause.to_string()),
    );
    meta.insert(metadata_keys::END_TIME.to_string(), Value::Text(now));
    meta.insert(
        metadata_keys::JOB_ID.to_string(),
        Value::Text(job_id.to_string()),
    );
    record
}
