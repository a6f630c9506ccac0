//! Tollgate command line entry point

use std::{io, process::ExitCode};

use tracing::error;

use tollgate_cli::{
    config::{CliConfig, Command, RunArgs},
    logging,
    runner::{self, RunOptions},
    scenario::Scenario,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match CliConfig::load() {
        Ok(config) => config,
        Err(error) => {
            _ = error.print();

            return if error.use_stderr() {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(error) = logging::init_subscriber(&config.logging) {
        #[expect(
            clippy::print_stderr,
            reason = "logging not initialized yet, must use eprintln for setup errors"
        )]
        {
            eprintln!("{error}");
        }

        return ExitCode::FAILURE;
    }

    match config.command {
        Command::Run(args) => run(&args).await,
    }
}

async fn run(args: &RunArgs) -> ExitCode {
    let scenario = match Scenario::load(&args.scenario) {
        Ok(scenario) => scenario,
        Err(error) => {
            error!(path = %args.scenario.display(), %error, "could not load scenario");

            return ExitCode::FAILURE;
        }
    };

    let report = match runner::run(&scenario, &RunOptions::from(args)).await {
        Ok(report) => report,
        Err(error) => {
            error!(path = %args.scenario.display(), %error, "could not run scenario");

            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = report.write_to(io::stdout().lock()) {
        error!(%error, "could not write report");

        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
