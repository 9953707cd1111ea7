//! Residual building blocks with exact first and second derivatives.
//!
//! Every constraint row and cost term is one of two shapes:
//!
//! ```text
//! QuadraticRow:  r(x) = c + Σ a_i x_i + Σ q_k x_{i_k} x_{j_k}
//! ModelTerm:     r(x) = s(x) · F(A x + c)          s affine, F a ModelFunction
//! ```
//!
//! Collocation with a free horizon, continuity, linking and the Gauss end
//! equation are quadratic rows. DAE, boundary, path and cost terms are model
//! terms; the affine input map carries the variable scaling and the mapping
//! from free time variables to node times.

use dopt_core::ModelFunction;
use std::collections::BTreeSet;

/// Sparse affine function `c + Σ a_i x_i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Affine {
    pub constant: f64,
    pub terms: Vec<(usize, f64)>,
}

impl Affine {
    pub fn constant(value: f64) -> Self {
        Self {
            constant: value,
            terms: Vec::new(),
        }
    }

    pub fn var(index: usize, coefficient: f64) -> Self {
        Self {
            constant: 0.0,
            terms: vec![(index, coefficient)],
        }
    }

    pub fn eval(&self, x: &[f64]) -> f64 {
        self.constant + self.terms.iter().map(|&(i, a)| a * x[i]).sum::<f64>()
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn scale(&self, k: f64) -> Self {
        Self {
            constant: self.constant * k,
            terms: self.terms.iter().map(|&(i, a)| (i, a * k)).collect(),
        }
    }

    /// `self + k · other`, merging repeated indices.
    pub fn axpy(&self, k: f64, other: &Affine) -> Self {
        let mut out = self.clone();
        out.constant += k * other.constant;
        for &(i, a) in &other.terms {
            match out.terms.iter_mut().find(|(j, _)| *j == i) {
                Some(term) => term.1 += k * a,
                None => out.terms.push((i, k * a)),
            }
        }
        out
    }
}

/// One scalar residual that is at most bilinear in the decision vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuadraticRow {
    pub affine: Affine,
    pub bilinear: Vec<(usize, usize, f64)>,
}

impl QuadraticRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linear(mut self, index: usize, coefficient: f64) -> Self {
        self.affine = self.affine.axpy(1.0, &Affine::var(index, coefficient));
        self
    }

    pub fn add_affine(mut self, k: f64, a: &Affine) -> Self {
        self.affine = self.affine.axpy(k, a);
        self
    }

    /// Add `k · a(x) · x_index`.
    pub fn add_product(mut self, k: f64, a: &Affine, index: usize) -> Self {
        if a.constant != 0.0 {
            self = self.linear(index, k * a.constant);
        }
        for &(i, coef) in &a.terms {
            self.bilinear.push((i, index, k * coef));
        }
        self
    }

    pub fn eval(&self, x: &[f64]) -> f64 {
        self.affine.eval(x)
            + self
                .bilinear
                .iter()
                .map(|&(i, j, q)| q * x[i] * x[j])
                .sum::<f64>()
    }

    /// Sorted, unique decision-vector indices the row depends on.
    pub fn support(&self) -> Vec<usize> {
        let mut set: BTreeSet<usize> = self.affine.terms.iter().map(|&(i, _)| i).collect();
        for &(i, j, _) in &self.bilinear {
            set.insert(i);
            set.insert(j);
        }
        set.into_iter().collect()
    }

    /// Gradient values aligned with [`Self::support`].
    pub fn gradient(&self, x: &[f64], support: &[usize]) -> Vec<f64> {
        let mut grad = vec![0.0; support.len()];
        let pos = |i: usize| support.binary_search(&i).ok();
        for &(i, a) in &self.affine.terms {
            if let Some(p) = pos(i) {
                grad[p] += a;
            }
        }
        for &(i, j, q) in &self.bilinear {
            if let Some(p) = pos(i) {
                grad[p] += q * x[j];
            }
            if let Some(p) = pos(j) {
                grad[p] += q * x[i];
            }
        }
        grad
    }

    /// Lower-triangular Hessian entries `(row, col, value)`, `row >= col`.
    pub fn hessian_entries(&self, weight: f64) -> Vec<(usize, usize, f64)> {
        self.bilinear
            .iter()
            .map(|&(i, j, q)| {
                let (r, c) = if i >= j { (i, j) } else { (j, i) };
                let value = if i == j { 2.0 * q } else { q };
                (r, c, weight * value)
            })
            .collect()
    }
}

/// Which model function a [`ModelTerm`] evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRef {
    Dae,
    Initial,
    Mayer,
    Lagrange,
    BoundaryEquality,
    BoundaryInequality,
    Path,
    /// Index into the transcription's measurement-deviation functions.
    Measurement(usize),
}

/// `s(x) · F(A x + c)`.
#[derive(Debug, Clone)]
pub struct ModelTerm {
    pub function: FunctionRef,
    pub inputs: Vec<Affine>,
    pub scale: Affine,
    support: Vec<usize>,
}

/// Values of a model term and its derivative pieces at one point.
pub struct TermEvaluation {
    pub z: Vec<f64>,
    pub f: Vec<f64>,
    pub s: f64,
}

impl ModelTerm {
    pub fn new(function: FunctionRef, inputs: Vec<Affine>, scale: Affine) -> Self {
        let mut set = BTreeSet::new();
        for a in inputs.iter().chain(std::iter::once(&scale)) {
            for &(i, _) in &a.terms {
                set.insert(i);
            }
        }
        Self {
            function,
            inputs,
            scale,
            support: set.into_iter().collect(),
        }
    }

    pub fn support(&self) -> &[usize] {
        &self.support
    }

    pub fn inputs_at(&self, x: &[f64]) -> Vec<f64> {
        self.inputs.iter().map(|a| a.eval(x)).collect()
    }

    pub fn evaluate(&self, f: &dyn ModelFunction, x: &[f64]) -> TermEvaluation {
        let z = self.inputs_at(x);
        let mut out = vec![0.0; f.n_out()];
        f.eval(&z, &mut out);
        TermEvaluation {
            z,
            f: out,
            s: self.scale.eval(x),
        }
    }

    /// Residual values `s · F(z)`.
    pub fn values(&self, f: &dyn ModelFunction, x: &[f64]) -> Vec<f64> {
        let ev = self.evaluate(f, x);
        ev.f.iter().map(|v| ev.s * v).collect()
    }

    /// Dense `n_out × support.len()` Jacobian, row-major.
    pub fn jacobian(&self, f: &dyn ModelFunction, x: &[f64]) -> Vec<f64> {
        let ev = self.evaluate(f, x);
        let (n_in, n_out, n_sup) = (f.n_in(), f.n_out(), self.support.len());
        let mut jf = vec![0.0; n_out * n_in];
        f.jacobian(&ev.z, &mut jf);

        let mut jac = vec![0.0; n_out * n_sup];
        for (k, input) in self.inputs.iter().enumerate() {
            for &(i, a) in &input.terms {
                let p = self.position(i);
                for r in 0..n_out {
                    jac[r * n_sup + p] += ev.s * jf[r * n_in + k] * a;
                }
            }
        }
        for &(i, a) in &self.scale.terms {
            let p = self.position(i);
            for r in 0..n_out {
                jac[r * n_sup + p] += ev.f[r] * a;
            }
        }
        jac
    }

    /// Dense `support × support` Hessian of `Σ_r λ_r s(x) F_r(A x + c)`.
    pub fn weighted_hessian(&self, f: &dyn ModelFunction, x: &[f64], lambda: &[f64]) -> Vec<f64> {
        let ev = self.evaluate(f, x);
        let (n_in, n_out, n_sup) = (f.n_in(), f.n_out(), self.support.len());
        let mut hess = vec![0.0; n_sup * n_sup];

        // s · Aᵀ (Σ λ_r ∇²F_r) A
        let mut hf = vec![0.0; n_in * n_in];
        f.hessian(&ev.z, lambda, &mut hf);
        for (k1, in1) in self.inputs.iter().enumerate() {
            for (k2, in2) in self.inputs.iter().enumerate() {
                let h = hf[k1 * n_in + k2];
                if h == 0.0 {
                    continue;
                }
                for &(i, a) in &in1.terms {
                    let p = self.position(i);
                    for &(j, b) in &in2.terms {
                        let q = self.position(j);
                        hess[p * n_sup + q] += ev.s * h * a * b;
                    }
                }
            }
        }

        // Cross terms between the scale and F: ∇s gᵀ + g ∇sᵀ, g = Aᵀ J_Fᵀ λ
        if !self.scale.is_constant() {
            let mut jf = vec![0.0; n_out * n_in];
            f.jacobian(&ev.z, &mut jf);
            let mut g = vec![0.0; n_sup];
            for (k, input) in self.inputs.iter().enumerate() {
                let weighted: f64 = (0..n_out).map(|r| lambda[r] * jf[r * n_in + k]).sum();
                for &(i, a) in &input.terms {
                    g[self.position(i)] += weighted * a;
                }
            }
            for &(i, a) in &self.scale.terms {
                let p = self.position(i);
                for q in 0..n_sup {
                    hess[p * n_sup + q] += a * g[q];
                    hess[q * n_sup + p] += a * g[q];
                }
            }
        }
        hess
    }

    fn position(&self, index: usize) -> usize {
        // Support is built from the same affine terms, so the index is present.
        self.support.binary_search(&index).unwrap_or_else(|p| p)
    }
}
