use anyhow::{Context, Result};
use dopt_algo::{LayoutSummary, Scheme, Transcription};
use dopt_cli::config::RunConfig;
use dopt_cli::models::DemoModel;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct LayoutReport {
    model: &'static str,
    scheme: Scheme,
    n_e: usize,
    n_cp: usize,
    blocking_factors: Option<Vec<usize>>,
    equalities: usize,
    inequalities: usize,
    layout: LayoutSummary,
}

pub fn run(config: &RunConfig, model: DemoModel) -> Result<()> {
    let options = config.transcription.clone();
    let transcription = Transcription::new(Arc::new(model.build()?), options.clone())
        .with_context(|| format!("building the {} transcription", model.name()))?;
    let report = LayoutReport {
        model: model.name(),
        scheme: options.scheme,
        n_e: options.n_e,
        n_cp: options.n_cp,
        blocking_factors: options.blocking_factors,
        equalities: transcription.n_equalities(),
        inequalities: transcription.n_inequalities(),
        layout: transcription.index().summary(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
