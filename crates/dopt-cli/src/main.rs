use anyhow::Result;
use clap::Parser;
use dopt_cli::cli::{Cli, Commands};
use std::io;
use std::process::ExitCode;
use tracing::Level;

mod commands;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };

    // Respects RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Optimize { run, output, init } => {
            commands::optimize::run(&run.load()?, output, init.as_deref())
        }
        Commands::Mpc {
            run,
            output,
            samples,
        } => commands::mpc::run(&run.load()?, output, *samples),
        Commands::Estimate {
            run,
            measurements,
            output,
        } => commands::estimate::run(&run.load()?, measurements, output),
        Commands::Inspect { run, model } => commands::inspect::run(&run.load()?, *model),
    }
}
