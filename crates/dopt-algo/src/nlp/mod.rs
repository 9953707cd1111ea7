//! NLP solver adapter layer.
//!
//! [`NlpProblem`] is what a solver consumes: dimensions, objective,
//! constraints `[g; h]` (with `g = 0`, `h <= 0`), sparse Jacobian and an
//! optional lower-triangular Lagrangian Hessian. [`NlpSolver`] is the
//! backend seam; [`AugmentedLagrangianSolver`] is always available and
//! `IpoptSolver` comes with the `solver-ipopt` feature.

mod augmented;
#[cfg(feature = "solver-ipopt")]
mod ipopt;

pub use augmented::AugmentedLagrangianSolver;
#[cfg(feature = "solver-ipopt")]
pub use self::ipopt::IpoptSolver;

use crate::transcription::{hessian, jacobian, BoundsAndGuess, Transcription};
use dopt_core::DoptResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Evaluation interface a solver backend drives.
pub trait NlpProblem {
    fn n_variables(&self) -> usize;
    fn n_equalities(&self) -> usize;
    fn n_inequalities(&self) -> usize;

    fn n_constraints(&self) -> usize {
        self.n_equalities() + self.n_inequalities()
    }

    fn objective(&self, x: &[f64]) -> f64;
    fn objective_gradient(&self, x: &[f64]) -> Vec<f64>;

    /// Equalities followed by inequalities.
    fn constraints(&self, x: &[f64]) -> Vec<f64>;

    fn jacobian_structure(&self) -> (Vec<usize>, Vec<usize>);
    fn jacobian_values(&self, x: &[f64]) -> Vec<f64>;

    /// `None` when the solver must approximate curvature.
    fn hessian_structure(&self) -> Option<(Vec<usize>, Vec<usize>)>;

    /// Lagrangian Hessian values; `lambda` must hold one multiplier per constraint.
    fn hessian_values(&self, x: &[f64], obj_factor: f64, lambda: &[f64]) -> DoptResult<Vec<f64>>;
}

impl NlpProblem for Transcription {
    fn n_variables(&self) -> usize {
        self.n_xx()
    }

    fn n_equalities(&self) -> usize {
        Transcription::n_equalities(self)
    }

    fn n_inequalities(&self) -> usize {
        Transcription::n_inequalities(self)
    }

    fn objective(&self, x: &[f64]) -> f64 {
        Transcription::objective(self, x)
    }

    fn objective_gradient(&self, x: &[f64]) -> Vec<f64> {
        Transcription::objective_gradient(self, x)
    }

    fn constraints(&self, x: &[f64]) -> Vec<f64> {
        Transcription::constraints(self, x)
    }

    fn jacobian_structure(&self) -> (Vec<usize>, Vec<usize>) {
        jacobian::jacobian_sparsity(self)
    }

    fn jacobian_values(&self, x: &[f64]) -> Vec<f64> {
        jacobian::jacobian_values(self, x)
    }

    fn hessian_structure(&self) -> Option<(Vec<usize>, Vec<usize>)> {
        hessian::hessian_sparsity(self)
    }

    fn hessian_values(&self, x: &[f64], obj_factor: f64, lambda: &[f64]) -> DoptResult<Vec<f64>> {
        hessian::hessian_values(self, x, obj_factor, lambda)
    }
}

/// Backend-specific option value passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HessianApproximation {
    #[default]
    Exact,
    LimitedMemory,
}

/// Typed solver options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iter: usize,
    pub tolerance: f64,
    pub print_level: i32,
    /// Start from the supplied point instead of pushing it into the interior.
    pub warm_start_init_point: bool,
    pub mu_init: Option<f64>,
    pub hessian_approximation: HessianApproximation,
    pub warm_start_bound_push: f64,
    pub warm_start_bound_frac: f64,
    pub warm_start_slack_bound_push: f64,
    pub extra: BTreeMap<String, OptionValue>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 3000,
            tolerance: 1e-8,
            print_level: 0,
            warm_start_init_point: false,
            mu_init: None,
            hessian_approximation: HessianApproximation::Exact,
            warm_start_bound_push: 1e-6,
            warm_start_bound_frac: 1e-6,
            warm_start_slack_bound_push: 1e-6,
            extra: BTreeMap::new(),
        }
    }
}

impl SolverOptions {
    /// Set an option by its backend key. Known keys land in the typed
    /// fields; everything else goes to `extra`.
    pub fn set(&mut self, key: &str, value: OptionValue) {
        match (key, &value) {
            ("max_iter", OptionValue::Int(v)) if *v >= 0 => self.max_iter = *v as usize,
            ("tol", OptionValue::Num(v)) => self.tolerance = *v,
            ("print_level", OptionValue::Int(v)) => self.print_level = *v as i32,
            ("warm_start_init_point", OptionValue::Bool(v)) => self.warm_start_init_point = *v,
            ("warm_start_init_point", OptionValue::Str(v)) => {
                self.warm_start_init_point = v == "yes"
            }
            ("mu_init", OptionValue::Num(v)) => self.mu_init = Some(*v),
            ("hessian_approximation", OptionValue::Str(v)) => {
                self.hessian_approximation = if v == "limited-memory" {
                    HessianApproximation::LimitedMemory
                } else {
                    HessianApproximation::Exact
                }
            }
            ("warm_start_bound_push", OptionValue::Num(v)) => self.warm_start_bound_push = *v,
            ("warm_start_bound_frac", OptionValue::Num(v)) => self.warm_start_bound_frac = *v,
            ("warm_start_slack_bound_push", OptionValue::Num(v)) => {
                self.warm_start_slack_bound_push = *v
            }
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Acceptable,
}

/// Primal result of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct NlpSolution {
    pub x: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub solve_time: Duration,
    pub status: SolveStatus,
}

/// A backend that solves an [`NlpProblem`].
pub trait NlpSolver {
    fn name(&self) -> &'static str;

    fn options(&self) -> &SolverOptions;

    fn options_mut(&mut self) -> &mut SolverOptions;

    /// Solve from `start.initial` within `start.lower..=start.upper`.
    ///
    /// Non-convergence is a `SolverFailure` carrying the elapsed time.
    fn solve(&mut self, problem: &dyn NlpProblem, start: &BoundsAndGuess) -> DoptResult<NlpSolution>;
}

/// Lets a backend chosen at runtime drive the receding-horizon loop.
impl<S: NlpSolver + ?Sized> NlpSolver for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn options(&self) -> &SolverOptions {
        (**self).options()
    }

    fn options_mut(&mut self) -> &mut SolverOptions {
        (**self).options_mut()
    }

    fn solve(&mut self, problem: &dyn NlpProblem, start: &BoundsAndGuess) -> DoptResult<NlpSolution> {
        (**self).solve(problem, start)
    }
}
