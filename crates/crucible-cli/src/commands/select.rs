use std::path::PathBuf;

use clap::Args;

use crucible_core::CrucibleError;

use super::open_notebook;

#[derive(Args, Debug)]
pub struct SelectArgs {
    /// Columnar notebook file.
    pub notebook: PathBuf,
    /// Tag of the result set to make current.
    pub tag: String,
}

pub fn run(args: &SelectArgs) -> Result<(), CrucibleError> {
    let mut notebook = open_notebook(&args.notebook)?;
    notebook.select(&args.tag)?;
    notebook.commit()?;
    println!("current result set: {}", args.tag);
    Ok(())
}
