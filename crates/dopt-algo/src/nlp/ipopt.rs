//! IPOPT backend (feature `solver-ipopt`).
//!
//! Wraps any [`NlpProblem`] in the `ipopt` crate's `BasicProblem` /
//! `ConstrainedProblem` traits. Infinite bounds map to IPOPT's ±1e20
//! sentinels; equality rows get `g_l = g_u = 0` and inequality rows
//! `g_l = -1e20, g_u = 0`.

use super::{HessianApproximation, NlpProblem, NlpSolution, NlpSolver, SolveStatus, SolverOptions};
use super::OptionValue;
use crate::transcription::BoundsAndGuess;
use dopt_core::{DoptError, DoptResult};
use ipopt::{BasicProblem, ConstrainedProblem, Index, IntermediateCallbackData, Ipopt, Number};
use tracing::{info, warn};
use web_time::Instant;

const IPOPT_INFINITY: f64 = 1e20;

fn finite(v: f64) -> f64 {
    v.clamp(-IPOPT_INFINITY, IPOPT_INFINITY)
}

struct IpoptProblem<'a> {
    problem: &'a dyn NlpProblem,
    start: &'a BoundsAndGuess,
    jacobian: (Vec<usize>, Vec<usize>),
    hessian: Option<(Vec<usize>, Vec<usize>)>,
    iterations: usize,
}

/// Records the iteration count; never asks IPOPT to stop.
fn record_iteration(problem: &mut IpoptProblem<'_>, data: IntermediateCallbackData) -> bool {
    problem.iterations = data.iter_count.max(0) as usize;
    true
}

impl BasicProblem for IpoptProblem<'_> {
    fn num_variables(&self) -> usize {
        self.problem.n_variables()
    }

    fn bounds(&self, x_l: &mut [Number], x_u: &mut [Number]) -> bool {
        for (dst, &v) in x_l.iter_mut().zip(&self.start.lower) {
            *dst = finite(v);
        }
        for (dst, &v) in x_u.iter_mut().zip(&self.start.upper) {
            *dst = finite(v);
        }
        true
    }

    fn initial_point(&self, x: &mut [Number]) -> bool {
        x.copy_from_slice(&self.start.initial);
        true
    }

    fn objective(&self, x: &[Number], _new_x: bool, obj: &mut Number) -> bool {
        *obj = self.problem.objective(x);
        true
    }

    fn objective_grad(&self, x: &[Number], _new_x: bool, grad_f: &mut [Number]) -> bool {
        grad_f.copy_from_slice(&self.problem.objective_gradient(x));
        true
    }
}

impl ConstrainedProblem for IpoptProblem<'_> {
    fn num_constraints(&self) -> usize {
        self.problem.n_constraints()
    }

    fn num_constraint_jacobian_non_zeros(&self) -> usize {
        self.jacobian.0.len()
    }

    fn constraint_bounds(&self, g_l: &mut [Number], g_u: &mut [Number]) -> bool {
        let n_eq = self.problem.n_equalities();
        for (i, (lo, hi)) in g_l.iter_mut().zip(g_u.iter_mut()).enumerate() {
            *lo = if i < n_eq { 0.0 } else { -IPOPT_INFINITY };
            *hi = 0.0;
        }
        true
    }

    fn constraint(&self, x: &[Number], _new_x: bool, g: &mut [Number]) -> bool {
        g.copy_from_slice(&self.problem.constraints(x));
        true
    }

    fn constraint_jacobian_indices(&self, irow: &mut [Index], jcol: &mut [Index]) -> bool {
        for (i, (&r, &c)) in self.jacobian.0.iter().zip(&self.jacobian.1).enumerate() {
            irow[i] = r as Index;
            jcol[i] = c as Index;
        }
        true
    }

    fn constraint_jacobian_values(&self, x: &[Number], _new_x: bool, vals: &mut [Number]) -> bool {
        vals.copy_from_slice(&self.problem.jacobian_values(x));
        true
    }

    fn num_hessian_non_zeros(&self) -> usize {
        self.hessian.as_ref().map_or(0, |(rows, _)| rows.len())
    }

    fn hessian_indices(&self, irow: &mut [Index], jcol: &mut [Index]) -> bool {
        let Some((rows, cols)) = &self.hessian else {
            return true;
        };
        for (i, (&r, &c)) in rows.iter().zip(cols).enumerate() {
            irow[i] = r as Index;
            jcol[i] = c as Index;
        }
        true
    }

    fn hessian_values(
        &self,
        x: &[Number],
        _new_x: bool,
        obj_factor: Number,
        lambda: &[Number],
        vals: &mut [Number],
    ) -> bool {
        match self.problem.hessian_values(x, obj_factor, lambda) {
            Ok(hess) if hess.len() == vals.len() => {
                vals.copy_from_slice(&hess);
                true
            }
            Ok(hess) => {
                warn!(expected = vals.len(), actual = hess.len(), "hessian length mismatch");
                false
            }
            Err(err) => {
                warn!(error = %err, "hessian evaluation failed");
                false
            }
        }
    }
}

/// IPOPT-backed solver.
#[derive(Debug, Clone, Default)]
pub struct IpoptSolver {
    options: SolverOptions,
}

impl IpoptSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }
}

impl NlpSolver for IpoptSolver {
    fn name(&self) -> &'static str {
        "ipopt"
    }

    fn options(&self) -> &SolverOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut SolverOptions {
        &mut self.options
    }

    fn solve(&mut self, problem: &dyn NlpProblem, start: &BoundsAndGuess) -> DoptResult<NlpSolution> {
        let started = Instant::now();
        let exact = self.options.hessian_approximation == HessianApproximation::Exact;
        let hessian = if exact { problem.hessian_structure() } else { None };
        let limited_memory = hessian.is_none();
        let wrapped = IpoptProblem {
            problem,
            start,
            jacobian: problem.jacobian_structure(),
            hessian,
            iterations: 0,
        };

        let mut solver = Ipopt::new(wrapped).map_err(|e| DoptError::SolverFailure {
            message: format!("IPOPT init failed: {e:?}"),
            elapsed: started.elapsed(),
        })?;
        solver.set_intermediate_callback(Some(record_iteration));

        let o = &self.options;
        solver.set_option("max_iter", o.max_iter as i32);
        solver.set_option("tol", o.tolerance);
        solver.set_option("print_level", o.print_level);
        solver.set_option("sb", "yes");
        if limited_memory {
            solver.set_option("hessian_approximation", "limited-memory");
        } else {
            solver.set_option("hessian_approximation", "exact");
        }
        if o.warm_start_init_point {
            solver.set_option("warm_start_init_point", "yes");
            solver.set_option("warm_start_bound_push", o.warm_start_bound_push);
            solver.set_option("warm_start_bound_frac", o.warm_start_bound_frac);
            solver.set_option("warm_start_slack_bound_push", o.warm_start_slack_bound_push);
        }
        if let Some(mu) = o.mu_init {
            solver.set_option("mu_init", mu);
        }
        for (key, value) in &o.extra {
            match value {
                OptionValue::Bool(b) => solver.set_option(key, if *b { "yes" } else { "no" }),
                OptionValue::Int(i) => solver.set_option(key, *i as i32),
                OptionValue::Num(v) => solver.set_option(key, *v),
                OptionValue::Str(s) => solver.set_option(key, s.as_str()),
            };
        }

        info!(solver = "ipopt", n_variables = problem.n_variables(), "solving NLP");
        let result = solver.solve();
        let elapsed = started.elapsed();
        let status = match result.status {
            ipopt::SolveStatus::SolveSucceeded => SolveStatus::Optimal,
            ipopt::SolveStatus::SolvedToAcceptableLevel => SolveStatus::Acceptable,
            other => {
                return Err(DoptError::SolverFailure {
                    message: format!("IPOPT returned {other:?}"),
                    elapsed,
                })
            }
        };
        let x = result.solver_data.solution.primal_variables.to_vec();
        let iterations = result.solver_data.problem.iterations;
        info!(solver = "ipopt", iterations, ?elapsed, ?status, "NLP solved");
        Ok(NlpSolution {
            objective: result.objective_value,
            x,
            iterations,
            solve_time: elapsed,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// min (x0 - 1)² + (x1 - 2)²  s.t.  x0 + x1 = 1
    struct Toy;

    impl NlpProblem for Toy {
        fn n_variables(&self) -> usize {
            2
        }
        fn n_equalities(&self) -> usize {
            1
        }
        fn n_inequalities(&self) -> usize {
            0
        }
        fn objective(&self, x: &[f64]) -> f64 {
            (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2)
        }
        fn objective_gradient(&self, x: &[f64]) -> Vec<f64> {
            vec![2.0 * (x[0] - 1.0), 2.0 * (x[1] - 2.0)]
        }
        fn constraints(&self, x: &[f64]) -> Vec<f64> {
            vec![x[0] + x[1] - 1.0]
        }
        fn jacobian_structure(&self) -> (Vec<usize>, Vec<usize>) {
            (vec![0, 0], vec![0, 1])
        }
        fn jacobian_values(&self, _x: &[f64]) -> Vec<f64> {
            vec![1.0, 1.0]
        }
        fn hessian_structure(&self) -> Option<(Vec<usize>, Vec<usize>)> {
            Some((vec![0, 1], vec![0, 1]))
        }
        fn hessian_values(&self, _x: &[f64], f: f64, _l: &[f64]) -> DoptResult<Vec<f64>> {
            Ok(vec![2.0 * f, 2.0 * f])
        }
    }

    #[test]
    fn test_reports_iteration_count() {
        let start = BoundsAndGuess {
            lower: vec![f64::NEG_INFINITY; 2],
            upper: vec![f64::INFINITY; 2],
            initial: vec![3.0, -4.0],
        };
        let mut solver = IpoptSolver::default();
        let sol = solver.solve(&Toy, &start).unwrap();
        assert!((sol.x[0] - 0.0).abs() < 1e-6);
        assert!((sol.x[1] - 1.0).abs() < 1e-6);
        assert!(sol.iterations > 0);
    }
}
