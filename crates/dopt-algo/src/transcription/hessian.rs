//! # Lagrangian Hessian
//!
//! ```text
//! H(x, σ, λ) = σ · ∇²f(x) + Σᵢ λᵢ · ∇²cᵢ(x)
//! ```
//!
//! Only the lower triangle (`row >= col`) is stored. A model block
//! `s(x)·F(Ax + c)` contributes
//!
//! ```text
//! s · Aᵀ (Σ λ_r ∇²F_r) A  +  ∇s gᵀ + g ∇sᵀ,     g = Aᵀ J_Fᵀ λ
//! ```
//!
//! and a quadratic row contributes its constant bilinear coefficients.
//! The pattern is the union over all blocks, deduplicated once at assembly.

use super::{Residual, Transcription};
use dopt_core::{DoptError, DoptResult};
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;

/// Deduplicated lower-triangular Hessian pattern.
#[derive(Debug, Clone, Default)]
pub struct HessianPattern {
    rows: Vec<usize>,
    cols: Vec<usize>,
    position: HashMap<(usize, usize), usize>,
}

impl HessianPattern {
    pub(super) fn build(t: &Transcription) -> Self {
        let mut pattern = Self::default();
        for term in &t.cost_terms {
            pattern.add_dense(term.support());
        }
        for residual in t.equalities.iter().chain(&t.inequalities) {
            match residual {
                Residual::Model { term, .. } => pattern.add_dense(term.support()),
                Residual::Quadratic(q) => {
                    for (r, c, _) in q.hessian_entries(1.0) {
                        pattern.insert(r, c);
                    }
                }
            }
        }
        pattern
    }

    fn add_dense(&mut self, support: &[usize]) {
        for (p, &i) in support.iter().enumerate() {
            for &j in &support[..=p] {
                // support is sorted, so i >= j
                self.insert(i, j);
            }
        }
    }

    fn insert(&mut self, row: usize, col: usize) {
        if let Entry::Vacant(slot) = self.position.entry((row, col)) {
            slot.insert(self.rows.len());
            self.rows.push(row);
            self.cols.push(col);
        }
    }

    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    fn slot(&self, row: usize, col: usize) -> Option<usize> {
        self.position.get(&(row, col)).copied()
    }
}

/// Lower-triangular pattern, or `None` when the Hessian is approximated.
pub fn hessian_sparsity(t: &Transcription) -> Option<(Vec<usize>, Vec<usize>)> {
    t.hessian_pattern()
        .map(|p| (p.rows().to_vec(), p.cols().to_vec()))
}

/// Hessian values in the order of [`hessian_sparsity`].
///
/// `lambda` covers equalities then inequalities.
pub fn hessian_values(
    t: &Transcription,
    x: &[f64],
    obj_factor: f64,
    lambda: &[f64],
) -> DoptResult<Vec<f64>> {
    let Some(pattern) = t.hessian_pattern() else {
        return Ok(Vec::new());
    };
    let n_constraints = t.n_equalities() + t.n_inequalities();
    if lambda.len() != n_constraints {
        return Err(DoptError::AssemblyInvariant {
            expected: n_constraints,
            actual: lambda.len(),
        });
    }
    let mut vals = vec![0.0; pattern.nnz()];

    let mut scatter = |support: &[usize], dense: &[f64]| {
        let n = support.len();
        for (p, &i) in support.iter().enumerate() {
            for (q, &j) in support[..=p].iter().enumerate() {
                if let Some(slot) = pattern.slot(i, j) {
                    vals[slot] += dense[p * n + q];
                }
            }
        }
    };

    if obj_factor != 0.0 {
        for term in &t.cost_terms {
            if let Some(f) = t.function(term.function) {
                scatter(term.support(), &term.weighted_hessian(f, x, &[obj_factor]));
            }
        }
    }

    let mut row = 0;
    let mut quadratic = Vec::new();
    for residual in t.equalities.iter().chain(&t.inequalities) {
        let n = residual.rows();
        let weights = &lambda[row..row + n];
        match residual {
            Residual::Model { term, .. } => {
                if weights.iter().any(|&w| w != 0.0) {
                    if let Some(f) = t.function(term.function) {
                        scatter(term.support(), &term.weighted_hessian(f, x, weights));
                    }
                }
            }
            Residual::Quadratic(q) => quadratic.extend(q.hessian_entries(weights[0])),
        }
        row += n;
    }
    for (r, c, v) in quadratic {
        if let Some(slot) = pattern.slot(r, c) {
            vals[slot] += v;
        }
    }
    Ok(vals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::TranscriptionOptions;
    use dopt_core::{DescriptionBuilder, FnFunction, Model, TimeBound, TimeHorizon, Variable};
    use std::sync::Arc;

    fn model() -> Model {
        let description = DescriptionBuilder::new()
            .state(Variable::new("x"))
            .control(Variable::new("u").with_nominal(0.5))
            .build()
            .unwrap();
        // dx = x·u, cost ∫ x² + u² dt, free final time
        let dae = FnFunction::new(4, 1, |z, out| out[0] = z[0] - z[1] * z[2]);
        let horizon = TimeHorizon {
            start: TimeBound::Fixed(0.0),
            end: TimeBound::Free {
                initial_guess: 1.0,
                min: None,
                max: None,
            },
        };
        Model::new(description, horizon, dae)
            .with_lagrange(FnFunction::new(4, 1, |z, out| out[0] = z[1] * z[1] + z[2] * z[2]))
    }

    #[test]
    fn test_pattern_is_lower_triangular_and_unique() {
        let t = Transcription::new(
            Arc::new(model()),
            TranscriptionOptions {
                n_e: 2,
                n_cp: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let (rows, cols) = hessian_sparsity(&t).unwrap();
        let mut seen = std::collections::HashSet::new();
        for (r, c) in rows.iter().zip(&cols) {
            assert!(r >= c);
            assert!(seen.insert((*r, *c)));
        }
    }

    fn assert_matches_lagrangian(t: &Transcription) {
        let n = t.n_xx();
        let x: Vec<f64> = (0..n).map(|i| 0.2 + 0.05 * i as f64).collect();
        let m = t.n_equalities() + t.n_inequalities();
        let lambda: Vec<f64> = (0..m).map(|i| 0.1 * (i as f64 + 1.0)).collect();
        let sigma = 0.7;

        let (rows, cols) = hessian_sparsity(t).unwrap();
        let vals = hessian_values(t, &x, sigma, &lambda).unwrap();
        let mut dense = vec![vec![0.0; n]; n];
        for ((&r, &c), v) in rows.iter().zip(&cols).zip(vals) {
            dense[r][c] += v;
            if r != c {
                dense[c][r] += v;
            }
        }

        let grad = |x: &[f64]| -> Vec<f64> {
            let h = 1e-6;
            let mut xp = x.to_vec();
            (0..n)
                .map(|j| {
                    xp[j] = x[j] + h;
                    let lp = t.lagrangian(&xp, sigma, &lambda);
                    xp[j] = x[j] - h;
                    let lm = t.lagrangian(&xp, sigma, &lambda);
                    xp[j] = x[j];
                    (lp - lm) / (2.0 * h)
                })
                .collect()
        };
        let step = 1e-4;
        for j in 0..n {
            let mut xp = x.clone();
            xp[j] += step;
            let gp = grad(&xp);
            xp[j] -= 2.0 * step;
            let gm = grad(&xp);
            for i in 0..n {
                let fd = (gp[i] - gm[i]) / (2.0 * step);
                assert!((dense[i][j] - fd).abs() < 1e-3, "H[{i}][{j}] = {} vs {fd}", dense[i][j]);
            }
        }
    }

    #[test]
    fn test_hessian_matches_lagrangian_finite_differences() {
        let t = Transcription::new(
            Arc::new(model()),
            TranscriptionOptions {
                n_e: 2,
                n_cp: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_matches_lagrangian(&t);
    }

    #[test]
    fn test_hessian_with_free_phase_boundaries() {
        let t = Transcription::new(
            Arc::new(model()),
            TranscriptionOptions {
                n_e: 3,
                n_cp: 2,
                free_phases: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(t.n_inequalities() > 0);
        assert_matches_lagrangian(&t);
    }

    #[test]
    fn test_multiplier_length_is_checked() {
        let t = Transcription::new(
            Arc::new(model()),
            TranscriptionOptions {
                n_e: 2,
                n_cp: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let x = vec![0.5; t.n_xx()];
        let n = t.n_equalities() + t.n_inequalities();
        let short = vec![1.0; n - 1];
        assert!(matches!(
            hessian_values(&t, &x, 1.0, &short),
            Err(DoptError::AssemblyInvariant { expected, actual }) if expected == n && actual == n - 1
        ));
        assert!(hessian_values(&t, &x, 1.0, &vec![0.0; n + 1]).is_err());
        assert_eq!(
            hessian_values(&t, &x, 1.0, &vec![0.0; n]).unwrap().len(),
            hessian_sparsity(&t).unwrap().0.len()
        );
    }
}
