use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

mod commands;

use commands::{copy, remove, select, show};

#[derive(Parser, Debug)]
#[command(name = "crucible", about = "Inspect and manage crucible notebook files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the result sets in a notebook, with counts and schemas.
    Show(show::ShowArgs),
    /// Change the notebook's current result set.
    Select(select::SelectArgs),
    /// Delete a result set; refused when the notebook is locked.
    Remove(remove::RemoveArgs),
    /// Duplicate a result set between notebook files.
    Copy(copy::CopyArgs),
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code: u8 = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };
    let result = match &cli.command {
        Command::Show(args) => show::run(args),
        Command::Select(args) => select::run(args),
        Command::Remove(args) => remove::run(args),
        Command::Copy(args) => copy::run(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("crucible: {err}");
            ExitCode::from(2)
        }
    }
}
