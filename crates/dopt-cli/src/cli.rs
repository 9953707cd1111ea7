use crate::config::RunConfig;
use crate::models::DemoModel;
use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueHint};
use dopt_algo::Scheme;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dopt", author, version, about = "Collocation-based dynamic optimization", long_about = None)]
pub struct Cli {
    /// Log at debug level (RUST_LOG directives still apply)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Solve the Van der Pol optimal control problem
    Optimize {
        #[command(flatten)]
        run: RunArgs,
        /// Result file (Dymola textual format)
        #[arg(short, long, default_value = "vdp_result.txt", value_hint = ValueHint::FilePath)]
        output: PathBuf,
        /// Initialize from a previous result file
        #[arg(long, value_hint = ValueHint::FilePath)]
        init: Option<PathBuf>,
    },
    /// Receding-horizon control of the reactor model
    Mpc {
        #[command(flatten)]
        run: RunArgs,
        /// Stitched closed-loop result file
        #[arg(short, long, default_value = "reactor_mpc_result.txt", value_hint = ValueHint::FilePath)]
        output: PathBuf,
        /// Number of samples (overrides mpc.n_samples)
        #[arg(long)]
        samples: Option<usize>,
    },
    /// Fit the reactor rate constant to measurements
    Estimate {
        #[command(flatten)]
        run: RunArgs,
        /// CSV table with a `time` column followed by measured variables
        #[arg(long, value_hint = ValueHint::FilePath)]
        measurements: PathBuf,
        #[arg(short, long, default_value = "reactor_estimate_result.txt", value_hint = ValueHint::FilePath)]
        output: PathBuf,
    },
    /// Print the decision-vector layout of a demonstration model
    Inspect {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, value_enum, default_value_t = DemoModel::VanDerPol)]
        model: DemoModel,
    },
}

/// Config file plus command-line overrides of its `[transcription]` table.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// TOML run configuration
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub config: PathBuf,

    /// Discretization scheme (radau, gauss, gauss_lobatto)
    #[arg(long)]
    pub scheme: Option<Scheme>,

    /// Number of mesh elements
    #[arg(long)]
    pub n_e: Option<usize>,

    /// Collocation points per element
    #[arg(long)]
    pub n_cp: Option<usize>,
}

impl RunArgs {
    pub fn load(&self) -> Result<RunConfig> {
        let mut config = RunConfig::load(&self.config)?;
        let options = &mut config.transcription;
        if let Some(scheme) = self.scheme {
            options.scheme = scheme;
        }
        if let Some(n_e) = self.n_e {
            options.n_e = n_e;
        }
        if let Some(n_cp) = self.n_cp {
            options.n_cp = n_cp;
        }
        Ok(config)
    }
}
