use std::path::PathBuf;

use clap::Args;

use crucible_core::CrucibleError;

use super::open_notebook;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Columnar notebook file.
    pub notebook: PathBuf,
}

pub fn run(args: &ShowArgs) -> Result<(), CrucibleError> {
    let notebook = open_notebook(&args.notebook)?;
    println!("notebook: {}", args.notebook.display());
    if !notebook.description().is_empty() {
        println!("description: {}", notebook.description());
    }
    if notebook.is_locked() {
        println!("locked: yes");
    }
    for (tag, set) in notebook.result_sets() {
        let marker = if tag == notebook.current_tag() { "*" } else { " " };
        let lock = if set.is_locked() { " [locked]" } else { "" };
        println!("{marker} {tag}{lock}: {}", set.description());
        println!(
            "    results: {}, pending: {}",
            set.number_of_results(),
            set.number_of_pending()
        );
        if !set.schema().is_empty() {
            let fields: Vec<String> = set
                .schema()
                .fields()
                .map(|field| format!("{}: {}", field.name, field.kind.name()))
                .collect();
            println!("    schema: {}", fields.join(", "));
        }
    }
    Ok(())
}
