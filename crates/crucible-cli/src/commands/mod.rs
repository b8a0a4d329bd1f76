pub mod copy;
pub mod remove;
pub mod select;
pub mod show;

use std::path::Path;

use crucible_core::{CrucibleError, ErrorInfo};
use crucible_store::Notebook;

/// Opens an existing columnar notebook, refusing to create one implicitly.
pub fn open_notebook(path: &Path) -> Result<Notebook, CrucibleError> {
    if !path.exists() {
        return Err(CrucibleError::Notebook(
            ErrorInfo::new("notebook-missing", "notebook file does not exist")
                .at_path(path.display().to_string()),
        ));
    }
    Notebook::columnar(path, false)
}
