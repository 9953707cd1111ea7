use super::write_output;
use anyhow::{Context, Result};
use dopt_algo::{MeasuredState, RecedingHorizonController};
use dopt_cli::config::RunConfig;
use dopt_cli::models;
use dopt_core::ModelEvaluator;
use dopt_io::WriteOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn run(config: &RunConfig, output: &Path, samples: Option<usize>) -> Result<()> {
    let model = models::reactor()?;
    let concentration = model.description().resolve("c")?;
    let measured = vec![MeasuredState {
        parameter: model.description().resolve("c0")?,
        state: concentration,
    }];
    let mut controller = RecedingHorizonController::from_model(
        Arc::new(model),
        config.transcription.clone(),
        config.solver()?,
        measured,
        config.mpc.clone(),
    )
    .context("setting up the receding-horizon controller")?;

    let n_samples = samples.unwrap_or(config.mpc.n_samples);
    let period = config.mpc.sample_period;
    let mut c = models::C_START;
    for sample in 1..=n_samples {
        let t = controller.transcription().horizon().t0();
        let controls = controller
            .sample()
            .with_context(|| format!("sample {sample} at t = {t}"))?;
        let q = controls.first().copied().unwrap_or(0.0);
        c = models::simulate_reactor(c, q, period);
        println!("sample {sample:>3}  t = {t:>7.3}  q = {q:.5}  c(t+h) = {c:.5}");
        if sample < n_samples {
            controller.update_nlp_state(Some(&[(concentration, c)]))?;
        }
    }

    let results = controller.get_complete_results();
    write_output(
        output,
        controller.transcription().description(),
        &results.trajectories,
        WriteOptions::default(),
    )?;

    let timings = &results.timings;
    info!(
        total = ?timings.total,
        solve = ?timings.solve,
        slowest = timings.max_sample,
        "receding-horizon run finished"
    );
    println!("points      : {}", results.trajectories.len());
    println!("total time  : {:.3?}", timings.total);
    println!("result      : {}", output.display());
    Ok(())
}
