//! Augmented-Lagrangian NLP solver on top of argmin's L-BFGS.
//!
//! ```text
//! L_μ(x) = f(x) + Σ λᵢ gᵢ(x) + μ/2 Σ gᵢ(x)²
//!        + 1/(2μ) Σ [max(0, νⱼ + μ hⱼ(x))² - νⱼ²]
//!        + μ/2 Σ max(0, lb - x)² + max(0, x - ub)²
//! ```
//!
//! Variables with `lower == upper` are eliminated, so pinned parameters hold
//! exactly. After each inner L-BFGS solve the multipliers move
//! (`λ += μ g`, `ν = max(0, ν + μ h)`); the penalty grows tenfold whenever
//! the violation fails to shrink by a factor of four.

use super::{NlpProblem, NlpSolution, NlpSolver, SolveStatus, SolverOptions};
use crate::transcription::BoundsAndGuess;
use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use dopt_core::{DoptError, DoptResult};
use tracing::{debug, info};
use web_time::Instant;

const MAX_OUTER_ITERATIONS: usize = 25;
const INITIAL_PENALTY: f64 = 10.0;
const PENALTY_INCREASE: f64 = 10.0;
const MAX_PENALTY: f64 = 1e12;

/// Pure-Rust fallback solver.
#[derive(Debug, Clone, Default)]
pub struct AugmentedLagrangianSolver {
    options: SolverOptions,
}

impl AugmentedLagrangianSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }
}

/// Inner unconstrained problem over the free variables.
struct Subproblem<'a> {
    problem: &'a dyn NlpProblem,
    template: &'a [f64],
    free: &'a [usize],
    lower: &'a [f64],
    upper: &'a [f64],
    jac_rows: &'a [usize],
    jac_cols: &'a [usize],
    n_eq: usize,
    lambda: &'a [f64],
    nu: &'a [f64],
    mu: f64,
}

impl Subproblem<'_> {
    fn embed(&self, y: &[f64]) -> Vec<f64> {
        let mut x = self.template.to_vec();
        for (&i, &v) in self.free.iter().zip(y) {
            x[i] = v;
        }
        x
    }

    /// Constraint weights `∂L_μ/∂c` at `c`.
    fn weights(&self, c: &[f64]) -> Vec<f64> {
        c.iter()
            .enumerate()
            .map(|(i, &ci)| {
                if i < self.n_eq {
                    self.lambda[i] + self.mu * ci
                } else {
                    (self.nu[i - self.n_eq] + self.mu * ci).max(0.0)
                }
            })
            .collect()
    }
}

impl CostFunction for Subproblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, y: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let x = self.embed(y);
        let c = self.problem.constraints(&x);
        let mut cost = self.problem.objective(&x);
        for (i, &ci) in c.iter().enumerate() {
            if i < self.n_eq {
                cost += self.lambda[i] * ci + 0.5 * self.mu * ci * ci;
            } else {
                let nu = self.nu[i - self.n_eq];
                let shifted = (nu + self.mu * ci).max(0.0);
                cost += (shifted * shifted - nu * nu) / (2.0 * self.mu);
            }
        }
        for &i in self.free {
            let below = (self.lower[i] - x[i]).max(0.0);
            let above = (x[i] - self.upper[i]).max(0.0);
            cost += 0.5 * self.mu * (below * below + above * above);
        }
        Ok(cost)
    }
}

impl Gradient for Subproblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, y: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let x = self.embed(y);
        let mut grad = self.problem.objective_gradient(&x);
        let w = self.weights(&self.problem.constraints(&x));
        let vals = self.problem.jacobian_values(&x);
        for ((&r, &c), &v) in self.jac_rows.iter().zip(self.jac_cols).zip(&vals) {
            grad[c] += w[r] * v;
        }
        Ok(self
            .free
            .iter()
            .map(|&i| {
                let below = (self.lower[i] - x[i]).max(0.0);
                let above = (x[i] - self.upper[i]).max(0.0);
                grad[i] + self.mu * (above - below)
            })
            .collect())
    }
}

fn max_violation(problem: &dyn NlpProblem, x: &[f64], lower: &[f64], upper: &[f64]) -> f64 {
    let c = problem.constraints(x);
    let n_eq = problem.n_equalities();
    let constraint = c
        .iter()
        .enumerate()
        .map(|(i, &ci)| if i < n_eq { ci.abs() } else { ci.max(0.0) })
        .fold(0.0, f64::max);
    let bounds = x
        .iter()
        .zip(lower.iter().zip(upper))
        .map(|(&xi, (&lo, &hi))| (lo - xi).max(xi - hi).max(0.0))
        .fold(0.0, f64::max);
    constraint.max(bounds)
}

fn project_onto_bounds(x: &mut [f64], lower: &[f64], upper: &[f64]) {
    for ((xi, &lo), &hi) in x.iter_mut().zip(lower).zip(upper) {
        *xi = xi.max(lo).min(hi);
    }
}

impl NlpSolver for AugmentedLagrangianSolver {
    fn name(&self) -> &'static str {
        "augmented-lagrangian"
    }

    fn options(&self) -> &SolverOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut SolverOptions {
        &mut self.options
    }

    fn solve(&mut self, problem: &dyn NlpProblem, start: &BoundsAndGuess) -> DoptResult<NlpSolution> {
        let started = Instant::now();
        let n = problem.n_variables();
        if start.len() != n {
            return Err(DoptError::AssemblyInvariant {
                expected: n,
                actual: start.len(),
            });
        }
        let (lower, upper) = (&start.lower, &start.upper);
        let mut x = start.initial.clone();
        project_onto_bounds(&mut x, lower, upper);

        let free: Vec<usize> = (0..n).filter(|&i| lower[i] < upper[i]).collect();
        let (jac_rows, jac_cols) = problem.jacobian_structure();
        let n_eq = problem.n_equalities();
        let mut lambda = vec![0.0; n_eq];
        let mut nu = vec![0.0; problem.n_inequalities()];
        let mut mu = INITIAL_PENALTY;
        let inner_max_iter = (self.options.max_iter / MAX_OUTER_ITERATIONS).max(50) as u64;

        info!(solver = self.name(), n_variables = n, n_free = free.len(), "solving NLP");

        let mut iterations = 0;
        let mut violation = max_violation(problem, &x, lower, upper);
        for outer in 0..MAX_OUTER_ITERATIONS {
            if !free.is_empty() {
                let template = x.clone();
                let subproblem = Subproblem {
                    problem,
                    template: &template,
                    free: &free,
                    lower,
                    upper,
                    jac_rows: &jac_rows,
                    jac_cols: &jac_cols,
                    n_eq,
                    lambda: &lambda,
                    nu: &nu,
                    mu,
                };
                let y0: Vec<f64> = free.iter().map(|&i| x[i]).collect();
                let solver = LBFGS::new(MoreThuenteLineSearch::new(), 7);
                let result = Executor::new(subproblem, solver)
                    .configure(|state| state.param(y0).max_iters(inner_max_iter))
                    .run();
                match result {
                    Ok(res) => {
                        iterations += res.state().get_iter() as usize;
                        if let Some(best) = res.state().get_best_param() {
                            for (&i, &v) in free.iter().zip(best) {
                                x[i] = v;
                            }
                        }
                    }
                    Err(err) => debug!(outer, error = %err, "inner L-BFGS stopped early"),
                }
            }

            let c = problem.constraints(&x);
            for (i, &ci) in c.iter().enumerate() {
                if i < n_eq {
                    lambda[i] += mu * ci;
                } else {
                    let j = i - n_eq;
                    nu[j] = (nu[j] + mu * ci).max(0.0);
                }
            }

            let previous = violation;
            violation = max_violation(problem, &x, lower, upper);
            debug!(outer, mu, violation, "augmented Lagrangian iteration");
            if violation < self.options.tolerance {
                break;
            }
            if violation > 0.25 * previous {
                mu = (mu * PENALTY_INCREASE).min(MAX_PENALTY);
            }
        }

        project_onto_bounds(&mut x, lower, upper);
        let violation = max_violation(problem, &x, lower, upper);
        let elapsed = started.elapsed();
        let status = if violation < self.options.tolerance {
            SolveStatus::Optimal
        } else if violation < 10.0 * self.options.tolerance {
            SolveStatus::Acceptable
        } else {
            return Err(DoptError::SolverFailure {
                message: format!("constraint violation {violation:.3e} after {iterations} iterations"),
                elapsed,
            });
        };

        let objective = problem.objective(&x);
        info!(
            solver = self.name(),
            iterations,
            objective,
            elapsed_ms = elapsed.as_millis() as u64,
            "NLP solved"
        );
        Ok(NlpSolution {
            x,
            objective,
            iterations,
            solve_time: elapsed,
            status,
        })
    }
}
