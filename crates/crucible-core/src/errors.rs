//! Structured error types shared across crucible crates.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`CrucibleError`] variant, naming the
/// notebook objects involved.
///
/// Crucible errors almost always concern a result-set tag, a pending job id,
/// a schema field, or a notebook file, so those carry typed slots rather than
/// a free-form bag; `source` holds the rendered text of an underlying error
/// (records and errors both cross process boundaries, so no live error
/// objects).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// The result-set tag involved, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tag: Option<String>,
    /// The pending-result job id involved, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub job_id: Option<String>,
    /// The schema field or parameter name involved, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<String>,
    /// The notebook file involved, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    /// Rendered text of the underlying error, if one triggered this.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            tag: None,
            job_id: None,
            field: None,
            path: None,
            source: None,
        }
    }

    /// Names the result set the error occurred in.
    pub fn in_set(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Names the pending job the error concerns.
    pub fn for_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Names the schema field or parameter the error concerns.
    pub fn at_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Names the notebook file the error concerns.
    pub fn at_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Records the underlying error as rendered text.
    pub fn caused_by(mut self, err: impl ToString) -> Self {
        self.source = Some(err.to_string());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.code)?;
        if let Some(tag) = &self.tag {
            write!(f, ", result set '{tag}'")?;
        }
        if let Some(job_id) = &self.job_id {
            write!(f, ", job {job_id}")?;
        }
        if let Some(field) = &self.field {
            write!(f, ", field '{field}'")?;
        }
        if let Some(path) = &self.path {
            write!(f, ", path {path}")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

/// Canonical error type for the crucible engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum CrucibleError {
    /// A pending record was cancelled without completing.
    #[error("cancelled: {0}")]
    Cancelled(ErrorInfo),
    /// A write was attempted against a locked result set.
    #[error("result set locked: {0}")]
    ResultSetLocked(ErrorInfo),
    /// A write was attempted against a locked notebook.
    #[error("notebook locked: {0}")]
    NotebookLocked(ErrorInfo),
    /// An unknown pending-result job identifier was used.
    #[error("pending result error: {0}")]
    PendingResult(ErrorInfo),
    /// A record's shape is incompatible with the set's schema beyond promotion.
    #[error("results structure error: {0}")]
    ResultsStructure(ErrorInfo),
    /// An on-disk notebook carries an unsupported format version.
    #[error("notebook version error: {0}")]
    NotebookVersion(ErrorInfo),
    /// Structural notebook misuse (duplicate or unknown tags, illegal deletion).
    #[error("notebook error: {0}")]
    Notebook(ErrorInfo),
    /// A design cannot produce a valid enumeration of parameter points.
    #[error("design error: {0}")]
    Design(ErrorInfo),
    /// Asynchronous submission or retrieval failed beyond the retry budget.
    #[error("dispatch error: {0}")]
    Dispatch(ErrorInfo),
    /// Serialization, storage, and I/O errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl CrucibleError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            CrucibleError::Cancelled(info)
            | CrucibleError::ResultSetLocked(info)
            | CrucibleError::NotebookLocked(info)
            | CrucibleError::PendingResult(info)
            | CrucibleError::ResultsStructure(info)
            | CrucibleError::NotebookVersion(info)
            | CrucibleError::Notebook(info)
            | CrucibleError::Design(info)
            | CrucibleError::Dispatch(info)
            | CrucibleError::Serde(info) => info,
        }
    }
}
