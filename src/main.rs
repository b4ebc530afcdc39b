// Entrypoint for the CLI application.
// - Keeps `main` small: parse flags, run, map the error taxonomy to an
//   exit code (2 for configuration problems, 1 for remote failures).

use std::process::ExitCode;

use clap::Parser;
use rmlst_cli::cli::Cli;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("rmlst_cli=info"))
        .format_timestamp_millis()
        .init();

    match Cli::parse().run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
