//! # dopt-cli: Command-Line Driver
//!
//! TOML-configured runs of the built-in demonstration problems:
//!
//! | Command | Model | Output |
//! |---------|-------|--------|
//! | `optimize` | Van der Pol oscillator, minimum-energy control | Dymola result file |
//! | `mpc` | first-order reactor, receding-horizon tracking | stitched closed-loop result |
//! | `estimate` | first-order reactor, rate constant fit | Dymola result file |
//! | `inspect` | either | decision-vector layout as JSON |
//!
//! ```toml
//! backend = "augmented-lagrangian"
//!
//! [transcription]
//! scheme = "radau"
//! n_e = 20
//! n_cp = 3
//!
//! [solver]
//! max_iter = 3000
//! tolerance = 1e-6
//!
//! [mpc]
//! sample_period = 0.5
//! n_samples = 10
//! ```

pub mod cli;
pub mod config;
pub mod models;
