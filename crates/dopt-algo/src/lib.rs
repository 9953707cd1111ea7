//! # dopt-algo: Collocation Transcription and Receding-Horizon Control
//!
//! This crate turns a [`dopt_core::ModelEvaluator`] into a sparse nonlinear
//! program by direct collocation, solves it through a pluggable backend and
//! re-solves it on a moving horizon.
//!
//! ## Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Scheme | [`collocation`] | nodes, weights, differentiation matrix |
//! | Layout | [`transcription::indexer`] | decision-vector ranges |
//! | Assembly | [`transcription`] | residuals, cost, sparse Jacobian / Hessian |
//! | Bounds | [`transcription::bounds`] | lower / upper / initial arrays |
//! | Solve | [`nlp`] | primal solution |
//! | Extraction | [`transcription::result`] | per-class trajectories |
//! | Control loop | [`mpc`] | stitched closed-loop trajectories |
//!
//! ## Schemes
//!
//! - [`Scheme::Radau`]: right endpoint collocated (default)
//! - [`Scheme::Gauss`]: interior nodes only, exit state by quadrature
//! - [`Scheme::GaussLobatto`]: both endpoints collocated
//!
//! ## Example
//!
//! ```ignore
//! use dopt_algo::{AugmentedLagrangianSolver, NlpSolver, Transcription, TranscriptionOptions};
//! use std::sync::Arc;
//!
//! let transcription = Transcription::new(Arc::new(model), TranscriptionOptions::default())?;
//! let mut solver = AugmentedLagrangianSolver::default();
//! let solution = solver.solve(&transcription, transcription.bounds())?;
//! let trajectories = transcription.extract(&solution.x)?;
//! ```

pub mod collocation;
pub mod mpc;
pub mod nlp;
pub mod transcription;

pub use collocation::{CollocationBasis, LagrangeBasis, Scheme};
pub use mpc::{
    default_blocking_factors, ControllerState, MeasuredState, MpcOptions, MpcResults, MpcTimings,
    RecedingHorizonController,
};
#[cfg(feature = "solver-ipopt")]
pub use nlp::IpoptSolver;
pub use nlp::{
    AugmentedLagrangianSolver, HessianApproximation, NlpProblem, NlpSolution, NlpSolver,
    OptionValue, SolveStatus, SolverOptions,
};
pub use transcription::{
    BoundsAndGuess, HessianMode, LayoutSummary, ParameterEstimation, PhaseLink, ResultMode,
    StateContinuity, Transcription, TranscriptionOptions, VarType, VariableIndexMap,
};
