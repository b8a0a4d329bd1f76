//! Portable JSON persistence for notebooks.
//!
//! Writes the version-2 layout: one top-level object holding the notebook
//! attributes and a tagged map of result sets, each with its records and
//! pending records. Legacy version-1 files (a single flat `results` list with
//! no result-set grouping) are accepted on read and migrated into the default
//! set; the writer always emits version 2.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crucible_core::{CrucibleError, ErrorInfo, Params, PendingRecord, ResultRecord};

use crate::notebook::{Notebook, Store, FORMAT_VERSION};
use crate::resultset::ResultSet;
use crate::COMMIT_LOCK;

fn io_error(code: &str, path: &Path, err: impl ToString) -> CrucibleError {
    CrucibleError::Serde(
        ErrorInfo::new(code, "JSON notebook I/O failure")
            .at_path(path.display().to_string())
            .caused_by(err),
    )
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: u32,
    #[serde(default)]
    description: String,
    current_tag: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    locked: bool,
    result_sets: IndexMap<String, SetDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SetDocument {
    #[serde(default)]
    description: String,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    results: Vec<ResultRecord>,
    #[serde(default)]
    pending: IndexMap<String, Params>,
}

#[derive(Debug, Deserialize)]
struct LegacyDocument {
    #[serde(default)]
    description: String,
    #[serde(default)]
    results: Vec<ResultRecord>,
    // version-1 writers stored pending results in several shapes; only the
    // job-id to parameters map survives migration
    #[serde(default)]
    pending: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    #[serde(default)]
    version: Option<u64>,
}

pub(crate) fn load(path: &Path) -> Result<Notebook, CrucibleError> {
    let bytes = fs::read(path).map_err(|err| io_error("json-read", path, err))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        let mut notebook = Notebook::new(path.display().to_string(), "");
        notebook.set_store(Store::Json(path.to_path_buf()));
        return Ok(notebook);
    }
    let probe: VersionProbe = serde_json::from_slice(&bytes)
        .map_err(|err| io_error("json-parse", path, err))?;
    match probe.version {
        Some(2) => load_v2(path, &bytes),
        None | Some(1) => load_legacy(path, &bytes),
        Some(other) => Err(CrucibleError::NotebookVersion(
            ErrorInfo::new(
                "json-version",
                format!("unsupported notebook format version {other}"),
            )
            .at_path(path.display().to_string()),
        )),
    }
}

fn load_v2(path: &Path, bytes: &[u8]) -> Result<Notebook, CrucibleError> {
    let doc: Document =
        serde_json::from_slice(bytes).map_err(|err| io_error("json-parse", path, err))?;
    let mut sets = IndexMap::new();
    for (tag, set_doc) in doc.result_sets {
        sets.insert(tag, build_set(set_doc));
    }
    Ok(Notebook::from_loaded(
        Store::Json(path.to_path_buf()),
        path.display().to_string(),
        doc.description,
        doc.attributes,
        sets,
        doc.current_tag,
        doc.locked,
    ))
}

fn load_legacy(path: &Path, bytes: &[u8]) -> Result<Notebook, CrucibleError> {
    let doc: LegacyDocument =
        serde_json::from_slice(bytes).map_err(|err| io_error("json-parse", path, err))?;
    let mut pending = IndexMap::new();
    if let serde_json::Value::Object(jobs) = doc.pending {
        for (job_id, params) in jobs {
            if let Ok(params) = serde_json::from_value::<Params>(params) {
                pending.insert(job_id, params);
            }
        }
    }
    let set = build_set(SetDocument {
        description: "migrated version-1 results".to_string(),
        locked: false,
        attributes: BTreeMap::new(),
        results: doc.results,
        pending,
    });
    let mut sets = IndexMap::new();
    sets.insert(crate::notebook::DEFAULT_TAG.to_string(), set);
    Ok(Notebook::from_loaded(
        Store::Json(path.to_path_buf()),
        path.display().to_string(),
        doc.description,
        BTreeMap::new(),
        sets,
        crate::notebook::DEFAULT_TAG.to_string(),
        false,
    ))
}

fn build_set(doc: SetDocument) -> ResultSet {
    let pending = doc
        .pending
        .into_iter()
        .map(|(job_id, params)| PendingRecord::new(params, job_id))
        .collect();
    ResultSet::from_parts(doc.description, doc.locked, doc.attributes, doc.results, pending)
}

pub(crate) fn save(notebook: &Notebook, path: &Path) -> Result<(), CrucibleError> {
    let _guard = COMMIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut result_sets = IndexMap::new();
    for (tag, set) in notebook.result_sets() {
        let pending = set
            .pending_records()
            .iter()
            .map(|entry| (entry.job_id.clone(), entry.parameters.clone()))
            .collect();
        result_sets.insert(
            tag.to_string(),
            SetDocument {
                description: set.description().to_string(),
                locked: set.is_locked(),
                attributes: set.attributes().clone(),
                results: set.records(),
                pending,
            },
        );
    }
    let doc = Document {
        version: FORMAT_VERSION,
        description: notebook.description().to_string(),
        current_tag: notebook.current_tag().to_string(),
        attributes: notebook.attributes().clone(),
        locked: notebook.is_locked(),
        result_sets,
    };
    let bytes = serde_json::to_vec_pretty(&doc).map_err(|err| io_error("json-encode", path, err))?;

    // write-then-rename so an interrupted commit leaves the previous state
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    let mut file = fs::File::create(&tmp).map_err(|err| io_error("json-create", &tmp, err))?;
    file.write_all(&bytes)
        .map_err(|err| io_error("json-write", &tmp, err))?;
    file.sync_all().map_err(|err| io_error("json-sync", &tmp, err))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|err| io_error("json-rename", path, err))?;
    Ok(())
}
