use std::path::PathBuf;

use clap::Args;

use crucible_core::CrucibleError;

use super::open_notebook;

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Columnar notebook file.
    pub notebook: PathBuf,
    /// Tag of the result set to delete.
    pub tag: String,
}

pub fn run(args: &RemoveArgs) -> Result<(), CrucibleError> {
    let mut notebook = open_notebook(&args.notebook)?;
    notebook.delete_result_set(&args.tag)?;
    notebook.commit()?;
    println!("removed result set: {}", args.tag);
    Ok(())
}
