use super::write_output;
use anyhow::{Context, Result};
use dopt_algo::{NlpSolver, Transcription};
use dopt_cli::config::RunConfig;
use dopt_cli::models;
use dopt_io::{ResultDymolaTextual, WriteOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn run(config: &RunConfig, output: &Path, init: Option<&Path>) -> Result<()> {
    let model = models::van_der_pol()?;
    let mut transcription = Transcription::new(Arc::new(model), config.transcription.clone())
        .context("building the Van der Pol transcription")?;
    if let Some(path) = init {
        let previous = ResultDymolaTextual::from_path(path)
            .with_context(|| format!("reading initial guess {}", path.display()))?;
        transcription.initialize_from_source(&previous);
        info!(path = %path.display(), "initial guess taken from result file");
    }

    let mut solver = config.solver()?;
    let solution = solver
        .solve(&transcription, transcription.bounds())
        .context("solving the Van der Pol problem")?;
    let trajectories = transcription.extract(&solution.x)?;
    write_output(
        output,
        transcription.description(),
        &trajectories,
        WriteOptions { rescale: true },
    )?;

    println!("objective   : {:.6}", solution.objective);
    println!("status      : {:?}", solution.status);
    println!("iterations  : {}", solution.iterations);
    println!("solve time  : {:.3?}", solution.solve_time);
    println!("result      : {}", output.display());
    Ok(())
}
