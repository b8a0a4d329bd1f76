use std::path::PathBuf;

use clap::Args;

use crucible_core::{CrucibleError, ErrorInfo};
use crucible_store::Notebook;

use super::open_notebook;

#[derive(Args, Debug)]
pub struct CopyArgs {
    /// Source columnar notebook file.
    pub source: PathBuf,
    /// Tag of the result set to copy.
    pub tag: String,
    /// Destination columnar notebook file, created when missing.
    pub destination: PathBuf,
    /// Tag to store the copy under (defaults to the source tag).
    #[arg(long = "as")]
    pub rename: Option<String>,
}

pub fn run(args: &CopyArgs) -> Result<(), CrucibleError> {
    let source = open_notebook(&args.source)?;
    let set = source.result_set(&args.tag).cloned().ok_or_else(|| {
        CrucibleError::Notebook(
            ErrorInfo::new("resultset-unknown", "no result set with this tag")
                .in_set(args.tag.clone())
                .at_path(args.source.display().to_string()),
        )
    })?;

    let target_tag = args.rename.as_deref().unwrap_or(&args.tag);
    let mut destination = Notebook::columnar(&args.destination, false)?;
    destination.insert_result_set(target_tag, set)?;
    destination.commit()?;
    println!(
        "copied {} from {} to {} as {}",
        args.tag,
        args.source.display(),
        args.destination.display(),
        target_tag
    );
    Ok(())
}
