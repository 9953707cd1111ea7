//! # dopt-core: Dynamic Optimization Model Core
//!
//! Shared types for transcribing continuous-time optimal control and
//! parameter estimation problems into nonlinear programs:
//!
//! - [`ModelDescription`] / [`VarRef`]: typed variable references resolved once
//! - [`ModelFunction`]: evaluate / differentiate capability for model functions
//! - [`ModelEvaluator`] / [`Model`]: DAE, cost and boundary functions plus the
//!   typed [`TimeHorizon`]
//! - [`Trajectories`], [`LinearInterpolation`], [`MeasurementData`]
//! - [`DoptError`]: the error taxonomy shared by all crates

pub mod error;
pub mod evaluator;
pub mod function;
pub mod model;
pub mod trajectory;

pub use error::{DoptError, DoptResult};
pub use evaluator::{validate_evaluator, DaeLayout, Model, ModelEvaluator, TimeBound, TimeHorizon};
pub use function::{finite_difference_hessian, finite_difference_jacobian, FnFunction, ModelFunction};
pub use model::{AliasKind, DescriptionBuilder, ModelDescription, VarKind, VarRef, Variability, Variable};
pub use trajectory::{
    LinearInterpolation, MeasurementData, NamedTrajectories, TrajectorySource, Trajectories,
};
