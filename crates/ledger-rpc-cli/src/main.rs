mod bootstrap_helpers;
mod cli_args;
mod commands;

use std::process::ExitCode;

use clap::Parser;

use crate::{cli_args::Cli, commands::rpc_reason_code};

#[tokio::main]
async fn main() -> ExitCode {
    bootstrap_helpers::init_tracing();
    let cli = Cli::parse();
    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            match rpc_reason_code(&error) {
                Some(reason_code) => eprintln!("error [{reason_code}]: {error:#}"),
                None => eprintln!("error: {error:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
