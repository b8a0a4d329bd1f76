//! Notebooks: transactional containers of named result sets.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::error;
use uuid::Uuid;

use crucible_core::{CrucibleError, ErrorInfo, Params, ResultRecord};

use crate::resultset::ResultSet;
use crate::{columnar, json};

/// The tag of the result set every notebook starts with.
pub const DEFAULT_TAG: &str = "default";

/// On-disk format version written by the persistence backends.
pub const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone)]
pub(crate) enum Store {
    Json(PathBuf),
    Columnar(PathBuf),
}

/// A named collection of result sets with a current selection and optional
/// persistence.
///
/// A notebook always contains at least the default set, and exactly one tag
/// is current at any time. Results are appended to the current set; pending
/// results are resolved by job id across all sets, so completions land in
/// their submit-time set regardless of the current selection.
#[derive(Debug)]
pub struct Notebook {
    name: String,
    description: String,
    attributes: BTreeMap<String, String>,
    sets: IndexMap<String, ResultSet>,
    current: String,
    locked: bool,
    dirty: bool,
    store: Option<Store>,
}

impl Notebook {
    /// Creates an in-memory notebook holding an empty default set.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let mut sets = IndexMap::new();
        sets.insert(
            DEFAULT_TAG.to_string(),
            ResultSet::new("default result set"),
        );
        Self {
            name: name.into(),
            description: description.into(),
            attributes: BTreeMap::new(),
            sets,
            current: DEFAULT_TAG.to_string(),
            locked: false,
            dirty: false,
            store: None,
        }
    }

    /// Opens a JSON-backed notebook, loading the file when it exists and
    /// creating it fresh otherwise. With `create` set, an existing file is
    /// discarded.
    pub fn json(path: impl AsRef<Path>, create: bool) -> Result<Self, CrucibleError> {
        let path = path.as_ref();
        if !create && path.exists() {
            json::load(path)
        } else {
            let mut notebook = Self::new(path.display().to_string(), "");
            notebook.store = Some(Store::Json(path.to_path_buf()));
            notebook.dirty = true;
            Ok(notebook)
        }
    }

    /// Opens a columnar (SQLite container) notebook, loading when the file
    /// exists and creating otherwise. With `create` set, an existing file is
    /// discarded.
    pub fn columnar(path: impl AsRef<Path>, create: bool) -> Result<Self, CrucibleError> {
        let path = path.as_ref();
        if !create && path.exists() {
            columnar::load(path)
        } else {
            if create && path.exists() {
                std::fs::remove_file(path).map_err(|err| {
                    CrucibleError::Serde(
                        ErrorInfo::new("notebook-create", "failed to remove existing notebook")
                            .at_path(path.display().to_string())
                            .caused_by(err),
                    )
                })?;
            }
            let mut notebook = Self::new(path.display().to_string(), "");
            notebook.store = Some(Store::Columnar(path.to_path_buf()));
            notebook.dirty = true;
            Ok(notebook)
        }
    }

    /// Rebuilds a notebook from persisted parts; used by the backends.
    pub(crate) fn from_loaded(
        store: Store,
        name: String,
        description: String,
        attributes: BTreeMap<String, String>,
        mut sets: IndexMap<String, ResultSet>,
        current: String,
        locked: bool,
    ) -> Self {
        if !sets.contains_key(DEFAULT_TAG) {
            sets.insert(
                DEFAULT_TAG.to_string(),
                ResultSet::new("default result set"),
            );
        }
        let current = if sets.contains_key(&current) {
            current
        } else {
            DEFAULT_TAG.to_string()
        };
        Self {
            name,
            description,
            attributes,
            sets,
            current,
            locked,
            dirty: false,
            store: Some(store),
        }
    }

    pub(crate) fn set_store(&mut self, store: Store) {
        self.store = Some(store);
    }

    // ---------- metadata ----------

    /// The notebook's name; for persistent notebooks this is the file path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The free text description.
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

    /// True when backed by a file.
    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Sets a notebook-level attribute.
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

    /// Retrieves a notebook-level attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All notebook-level attributes.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    // ---------- locking ----------

    /// True when the notebook has been finished and locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Cancels all pending results in every set, locks every set, and locks
    /// the notebook itself.
    pub fn finish(&mut self) {
        if self.locked {
            return;
        }
        for set in self.sets.values_mut() {
            set.finish();
        }
        self.locked = true;
        self.dirty = true;
    }

    fn assert_unlocked(&self) -> Result<(), CrucibleError> {
        if self.locked {
            return Err(CrucibleError::NotebookLocked(ErrorInfo::new(
                "notebook-locked",
                "notebook is locked against further changes",
            )));
        }
        Ok(())
    }

    // ---------- result sets ----------

    /// Creates a result set under the given tag and selects it. Fails when
    /// the tag already exists.
    pub fn add_result_set(
        &mut self,
        tag: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        let tag = tag.into();
        if self.sets.contains_key(&tag) {
            return Err(CrucibleError::Notebook(
                ErrorInfo::new("resultset-exists", "result set tag already in use").in_set(tag),
            ));
        }
        self.sets.insert(tag.clone(), ResultSet::new(description.into()));
        self.current = tag;
        self.dirty = true;
        Ok(())
    }

    /// Selects the result set with the given tag.
    pub fn select(&mut self, tag: &str) -> Result<(), CrucibleError> {
        if !self.sets.contains_key(tag) {
            return Err(unknown_tag(tag));
        }
        self.current = tag.to_string();
        self.dirty = true;
        Ok(())
    }

    /// Creates-or-selects the tag, returning whether it already existed.
    pub fn already(
        &mut self,
        tag: &str,
        description: impl Into<String>,
    ) -> Result<bool, CrucibleError> {
        if self.sets.contains_key(tag) {
            self.select(tag)?;
            Ok(true)
        } else {
            self.add_result_set(tag, description)?;
            Ok(false)
        }
    }

    /// Deletes a result set. The default set cannot be deleted; deleting the
    /// current set selects the default first.
    pub fn delete_result_set(&mut self, tag: &str) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        if tag == DEFAULT_TAG {
            return Err(CrucibleError::Notebook(ErrorInfo::new(
                "resultset-default",
                "the default result set cannot be deleted",
            )));
        }
        if !self.sets.contains_key(tag) {
            return Err(unknown_tag(tag));
        }
        if self.current == tag {
            self.current = DEFAULT_TAG.to_string();
        }
        self.sets.shift_remove(tag);
        self.dirty = true;
        Ok(())
    }

    /// The currently selected tag.
    pub fn current_tag(&self) -> &str {
        &self.current
    }

    /// The currently selected result set.
    pub fn current(&self) -> &ResultSet {
        &self.sets[&self.current]
    }

    /// Mutable access to the currently selected result set.
    pub fn current_mut(&mut self) -> &mut ResultSet {
        self.sets.get_mut(&self.current).expect("current tag always resolves")
    }

    /// The result set under the given tag.
    pub fn result_set(&self, tag: &str) -> Option<&ResultSet> {
        self.sets.get(tag)
    }

    /// Mutable access to the result set under the given tag.
    pub fn result_set_mut(&mut self, tag: &str) -> Option<&mut ResultSet> {
        self.sets.get_mut(tag)
    }

    /// All tags, in creation order.
    pub fn tags(&self) -> Vec<&str> {
        self.sets.keys().map(String::as_str).collect()
    }

    /// True when the tag names a result set.
    pub fn contains(&self, tag: &str) -> bool {
        self.sets.contains_key(tag)
    }

    /// Iterates (tag, set) pairs in creation order.
    pub fn result_sets(&self) -> impl Iterator<Item = (&str, &ResultSet)> {
        self.sets.iter().map(|(tag, set)| (tag.as_str(), set))
    }

    /// Inserts a fully-built result set under a fresh tag, selecting it.
    /// Used when duplicating sets between notebooks.
    pub fn insert_result_set(
        &mut self,
        tag: impl Into<String>,
        set: ResultSet,
    ) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        let tag = tag.into();
        if self.sets.contains_key(&tag) {
            return Err(CrucibleError::Notebook(
                ErrorInfo::new("resultset-exists", "result set tag already in use").in_set(tag),
            ));
        }
        self.sets.insert(tag.clone(), set);
        self.current = tag;
        self.dirty = true;
        Ok(())
    }

    // ---------- results ----------

    /// Appends a record to the current set.
    pub fn add_result(&mut self, record: ResultRecord) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        self.current_mut().add_record(record)
    }

    /// Appends a list of records to the current set, in order.
    pub fn add_results(
        &mut self,
        records: impl IntoIterator<Item = ResultRecord>,
    ) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        self.current_mut().add_records(records)
    }

    // ---------- pending results ----------

    /// Registers a pending record in the current set under a freshly minted
    /// job id, and returns the id.
    pub fn add_pending(&mut self, params: Params) -> Result<String, CrucibleError> {
        let job_id = Uuid::new_v4().to_string();
        self.add_pending_with_id(params, &job_id)?;
        Ok(job_id)
    }

    /// Registers a pending record in the current set under an externally
    /// issued job id (for example one issued by a worker farm).
    pub fn add_pending_with_id(
        &mut self,
        params: Params,
        job_id: &str,
    ) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        if self.tag_of_pending(job_id).is_some() {
            return Err(CrucibleError::PendingResult(
                ErrorInfo::new("pending-duplicate", "job id already pending in this notebook")
                    .for_job(job_id),
            ));
        }
        self.current_mut().add_pending(params, job_id)
    }

    /// The tag of the set holding the given pending job, if any.
    pub fn tag_of_pending(&self, job_id: &str) -> Option<&str> {
        self.sets
            .iter()
            .find(|(_, set)| set.has_pending(job_id))
            .map(|(tag, _)| tag.as_str())
    }

    /// Resolves a pending record, wherever it was submitted, with the records
    /// that completed it. The records land in the submit-time set, not the
    /// currently selected one.
    pub fn resolve_pending(
        &mut self,
        job_id: &str,
        records: impl IntoIterator<Item = ResultRecord>,
    ) -> Result<(), CrucibleError> {
        self.assert_unlocked()?;
        let tag = self
            .tag_of_pending(job_id)
            .map(str::to_string)
            .ok_or_else(|| {
                CrucibleError::PendingResult(
                    ErrorInfo::new("pending-unknown", "unrecognised pending result job identifier")
                        .for_job(job_id),
                )
            })?;
        self.sets
            .get_mut(&tag)
            .expect("tag resolved above")
            .resolve_pending(job_id, records)
    }

    /// Cancels a pending record wherever it was submitted, recording the
    /// synthetic failed record. Idempotent: an unknown or already-resolved
    /// job id is a no-op returning `false`.
    pub fn cancel_pending(&mut self, job_id: &str) -> Result<bool, CrucibleError> {
        self.assert_unlocked()?;
        let Some(tag) = self.tag_of_pending(job_id).map(str::to_string) else {
            return Ok(false);
        };
        self.sets
            .get_mut(&tag)
            .expect("tag resolved above")
            .cancel_pending(job_id)?;
        Ok(true)
    }

    /// Job ids pending across every set, in set order then submission order.
    pub fn pending_job_ids(&self) -> Vec<String> {
        self.sets
            .values()
            .flat_map(ResultSet::pending_job_ids)
            .collect()
    }

    /// Number of pending records across every set.
    pub fn number_of_pending(&self) -> usize {
        self.sets.values().map(ResultSet::number_of_pending).sum()
    }

    /// Number of records across every set.
    pub fn number_of_results(&self) -> usize {
        self.sets.values().map(ResultSet::number_of_results).sum()
    }

    /// True when no pending records remain anywhere.
    pub fn ready(&self) -> bool {
        self.sets.values().all(ResultSet::ready)
    }

    // ---------- persistence ----------

    /// Flushes dirty state to the backing store. A no-op for in-memory
    /// notebooks.
    pub fn commit(&mut self) -> Result<(), CrucibleError> {
        let store = match &self.store {
            None => return Ok(()),
            Some(store) => store.clone(),
        };
        match store {
            Store::Json(path) => json::save(self, &path)?,
            Store::Columnar(path) => columnar::save(self, &path)?,
        }
        self.dirty = false;
        for set in self.sets.values_mut() {
            set.mark_clean();
            set.clear_type_changed();
        }
        Ok(())
    }

    /// True when the notebook or any set holds unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.sets.values().any(ResultSet::is_dirty)
    }

    /// Opens a commit scope: the returned guard dereferences to the notebook
    /// and commits on drop, on every exit path.
    pub fn open(&mut self) -> NotebookScope<'_> {
        NotebookScope { notebook: self }
    }
}

/// RAII commit scope returned by [`Notebook::open`]. Commit failures on drop
/// are logged rather than panicking; call [`Notebook::commit`] explicitly to
/// observe them.
#[derive(Debug)]
pub struct NotebookScope<'a> {
    notebook: &'a mut Notebook,
}

impl Deref for NotebookScope<'_> {
    type Target = Notebook;

    fn deref(&self) -> &Notebook {
        self.notebook
    }
}

impl DerefMut for NotebookScope<'_> {
    fn deref_mut(&mut self) -> &mut Notebook {
        self.notebook
    }
}

impl Drop for NotebookScope<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.notebook.commit() {
            error!(error = %err, "commit on scope exit failed");
        }
    }
}

fn unknown_tag(tag: &str) -> CrucibleError {
    CrucibleError::Notebook(
        ErrorInfo::new("resultset-unknown", "no result set with this tag").in_set(tag),
    )
}
