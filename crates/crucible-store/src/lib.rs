//! Result-set and notebook storage for the crucible experiment manager.
//!
//! A [`ResultSet`] is a typed, append-only collection of result records plus
//! the pending records of dispatched-but-unresolved work. A [`Notebook`] is a
//! transactional container of named result sets with one current selection,
//! persisted either as portable JSON or as a columnar SQLite container.

use std::sync::Mutex;

mod columnar;
mod json;
mod notebook;
mod resultset;

pub use notebook::{Notebook, NotebookScope, DEFAULT_TAG, FORMAT_VERSION};
pub use resultset::{cancellation_record, ResultSet, CANCELLED_EXCEPTION};

/// Process-wide lock serialising notebook file commits: readers see a
/// consistent snapshot, writers serialise. Two processes must not share a
/// notebook file; that precondition is documented, not enforced.
pub(crate) static COMMIT_LOCK: Mutex<()> = Mutex::new(());
