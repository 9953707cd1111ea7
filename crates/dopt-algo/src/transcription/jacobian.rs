//! # Constraint Jacobian
//!
//! Rows follow the constraint order (equalities, then inequalities). Every
//! residual block contributes a dense `rows × support` patch:
//!
//! ```text
//! model block      s·J_F·A + F ⊗ ∇s          (n_out rows)
//! quadratic row    a + Σ q (e_i x_j + e_j x_i)
//! ```
//!
//! The pattern is fixed at assembly; values are produced in the same order.

use super::{Residual, Transcription};
use sprs::{CsMat, TriMat};

/// Row/column indices of every structural non-zero.
pub(super) fn sparsity(t: &Transcription) -> (Vec<usize>, Vec<usize>) {
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut row = 0;
    for residual in t.equalities.iter().chain(&t.inequalities) {
        match residual {
            Residual::Model { term, rows: n } => {
                for r in 0..*n {
                    for &c in term.support() {
                        rows.push(row + r);
                        cols.push(c);
                    }
                }
            }
            Residual::Quadratic(q) => {
                for c in q.support() {
                    rows.push(row);
                    cols.push(c);
                }
            }
        }
        row += residual.rows();
    }
    (rows, cols)
}

/// Sparsity pattern of the constraint Jacobian.
pub fn jacobian_sparsity(t: &Transcription) -> (Vec<usize>, Vec<usize>) {
    t.jacobian_pattern().clone()
}

pub fn jacobian_nnz(t: &Transcription) -> usize {
    t.jacobian_pattern().0.len()
}

/// Jacobian values in the order of [`jacobian_sparsity`].
pub fn jacobian_values(t: &Transcription, x: &[f64]) -> Vec<f64> {
    let mut vals = Vec::with_capacity(jacobian_nnz(t));
    for residual in t.equalities.iter().chain(&t.inequalities) {
        match residual {
            Residual::Model { term, rows } => match t.function(term.function) {
                Some(f) => vals.extend(term.jacobian(f, x)),
                None => vals.extend(std::iter::repeat(0.0).take(rows * term.support().len())),
            },
            Residual::Quadratic(q) => {
                let support = q.support();
                vals.extend(q.gradient(x, &support));
            }
        }
    }
    vals
}

/// The Jacobian as a CSR matrix.
pub fn jacobian_matrix(t: &Transcription, x: &[f64]) -> CsMat<f64> {
    let (rows, cols) = t.jacobian_pattern();
    let vals = jacobian_values(t, x);
    let mut triplets = TriMat::new((t.n_equalities() + t.n_inequalities(), t.n_xx()));
    for ((&r, &c), &v) in rows.iter().zip(cols).zip(&vals) {
        triplets.add_triplet(r, c, v);
    }
    triplets.to_csr()
}
