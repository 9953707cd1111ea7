pub mod estimate;
pub mod inspect;
pub mod mpc;
pub mod optimize;

use anyhow::{Context, Result};
use dopt_io::{write_result_file, WriteOptions};
use dopt_core::{ModelDescription, Trajectories};
use std::path::Path;

fn write_output(
    path: &Path,
    description: &ModelDescription,
    trajectories: &Trajectories,
    options: WriteOptions,
) -> Result<()> {
    write_result_file(path, description, trajectories, &options)
        .with_context(|| format!("writing result file {}", path.display()))
}
