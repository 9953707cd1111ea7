//! TOML run configuration.

use anyhow::{Context, Result};
use dopt_algo::{AugmentedLagrangianSolver, MpcOptions, NlpSolver, SolverOptions, TranscriptionOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    #[default]
    AugmentedLagrangian,
    Ipopt,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub backend: Backend,
    pub transcription: TranscriptionOptions,
    pub solver: SolverOptions,
    pub mpc: MpcOptions,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// The configured backend with the `[solver]` options applied.
    pub fn solver(&self) -> Result<Box<dyn NlpSolver>> {
        match self.backend {
            Backend::AugmentedLagrangian => {
                Ok(Box::new(AugmentedLagrangianSolver::new(self.solver.clone())))
            }
            #[cfg(feature = "solver-ipopt")]
            Backend::Ipopt => Ok(Box::new(dopt_algo::IpoptSolver::new(self.solver.clone()))),
            #[cfg(not(feature = "solver-ipopt"))]
            Backend::Ipopt => anyhow::bail!("dopt was built without the solver-ipopt feature"),
        }
    }
}
