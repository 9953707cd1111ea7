use super::write_output;
use anyhow::{Context, Result};
use dopt_algo::{NlpSolver, ParameterEstimation, Transcription};
use dopt_cli::config::RunConfig;
use dopt_cli::models;
use dopt_core::VarKind;
use dopt_io::{load_measurements, WriteOptions};
use std::path::Path;
use std::sync::Arc;

pub fn run(config: &RunConfig, measurements: &Path, output: &Path) -> Result<()> {
    let data = load_measurements(measurements)
        .with_context(|| format!("loading measurements {}", measurements.display()))?;
    let mut options = config.transcription.clone();
    options.parameter_estimation = Some(ParameterEstimation::unweighted(data));
    let transcription = Transcription::new(Arc::new(models::reactor_estimation()?), options)
        .context("building the estimation problem")?;

    let mut solver = config.solver()?;
    let solution = solver
        .solve(&transcription, transcription.bounds())
        .context("solving the estimation problem")?;
    let description = transcription.description();
    let trajectories = transcription.extract(&solution.x)?.unscaled(description);
    write_output(output, description, &trajectories, WriteOptions::default())?;

    println!("fit cost    : {:.6e}", solution.objective);
    for (var, value) in description.class(VarKind::Parameter).zip(&trajectories.p_opt) {
        println!("{:<12}: {value:.6}", var.name);
    }
    println!("result      : {}", output.display());
    Ok(())
}
