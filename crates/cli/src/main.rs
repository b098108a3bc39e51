use std::process::ExitCode;

use clap::Parser;

use pharmacy_cli::{Cli, error_kind, run};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {err:#}", error_kind(&err));
            ExitCode::FAILURE
        }
    }
}
