//! Model functions: the differentiation capability consumed by the assembler.
//!
//! The transcription never builds symbolic graphs. It calls [`ModelFunction`]
//! for values, first derivatives and the second derivative of a weighted
//! combination of outputs (`Σ_r λ_r ∇²F_r`). Implementations backed by an AD
//! engine override [`ModelFunction::jacobian`] and [`ModelFunction::hessian`];
//! the provided defaults fall back to central finite differences.

use std::fmt;

/// Relative step for first-order central differences.
const JAC_STEP: f64 = 1e-6;
/// Relative step for the outer difference of the Hessian.
const HESS_STEP: f64 = 1e-4;

/// A vector-valued function `F: R^n_in -> R^n_out`.
pub trait ModelFunction: Send + Sync {
    fn n_in(&self) -> usize;
    fn n_out(&self) -> usize;

    /// Evaluate `F(z)` into `out` (length `n_out`).
    fn eval(&self, z: &[f64], out: &mut [f64]);

    /// Dense row-major Jacobian (`n_out × n_in`).
    fn jacobian(&self, z: &[f64], jac: &mut [f64]) {
        finite_difference_jacobian(self, z, jac)
    }

    /// Dense row-major Hessian (`n_in × n_in`) of `Σ_r weights[r]·F_r(z)`.
    fn hessian(&self, z: &[f64], weights: &[f64], hess: &mut [f64]) {
        finite_difference_hessian(self, z, weights, hess)
    }
}

/// Central-difference Jacobian using only [`ModelFunction::eval`].
pub fn finite_difference_jacobian<F: ModelFunction + ?Sized>(f: &F, z: &[f64], jac: &mut [f64]) {
    let (n_in, n_out) = (f.n_in(), f.n_out());
    let mut zp = z.to_vec();
    let mut f_plus = vec![0.0; n_out];
    let mut f_minus = vec![0.0; n_out];
    for j in 0..n_in {
        let h = JAC_STEP * z[j].abs().max(1.0);
        zp[j] = z[j] + h;
        f.eval(&zp, &mut f_plus);
        zp[j] = z[j] - h;
        f.eval(&zp, &mut f_minus);
        zp[j] = z[j];
        for r in 0..n_out {
            jac[r * n_in + j] = (f_plus[r] - f_minus[r]) / (2.0 * h);
        }
    }
}

/// Weighted Hessian from central differences of [`ModelFunction::jacobian`].
pub fn finite_difference_hessian<F: ModelFunction + ?Sized>(
    f: &F,
    z: &[f64],
    weights: &[f64],
    hess: &mut [f64],
) {
    let (n_in, n_out) = (f.n_in(), f.n_out());
    let mut zp = z.to_vec();
    let mut jac_plus = vec![0.0; n_out * n_in];
    let mut jac_minus = vec![0.0; n_out * n_in];
    for j in 0..n_in {
        let h = HESS_STEP * z[j].abs().max(1.0);
        zp[j] = z[j] + h;
        f.jacobian(&zp, &mut jac_plus);
        zp[j] = z[j] - h;
        f.jacobian(&zp, &mut jac_minus);
        zp[j] = z[j];
        for i in 0..n_in {
            let mut d = 0.0;
            for r in 0..n_out {
                d += weights[r] * (jac_plus[r * n_in + i] - jac_minus[r * n_in + i]);
            }
            hess[i * n_in + j] = d / (2.0 * h);
        }
    }
    // Symmetrize away the difference noise.
    for i in 0..n_in {
        for j in 0..i {
            let avg = 0.5 * (hess[i * n_in + j] + hess[j * n_in + i]);
            hess[i * n_in + j] = avg;
            hess[j * n_in + i] = avg;
        }
    }
}

type EvalFn = Box<dyn Fn(&[f64], &mut [f64]) + Send + Sync>;
type HessFn = Box<dyn Fn(&[f64], &[f64], &mut [f64]) + Send + Sync>;

/// Closure-backed [`ModelFunction`], with optional analytic derivatives.
///
/// ```ignore
/// // dx - x = 0 with z = [dx, x, t]
/// let f = FnFunction::new(3, 1, |z, out| out[0] = z[0] - z[1])
///     .with_jacobian(|_, jac| jac.copy_from_slice(&[1.0, -1.0, 0.0]));
/// ```
pub struct FnFunction {
    n_in: usize,
    n_out: usize,
    eval: EvalFn,
    jacobian: Option<EvalFn>,
    hessian: Option<HessFn>,
}

impl FnFunction {
    pub fn new<F>(n_in: usize, n_out: usize, eval: F) -> Self
    where
        F: Fn(&[f64], &mut [f64]) + Send + Sync + 'static,
    {
        Self {
            n_in,
            n_out,
            eval: Box::new(eval),
            jacobian: None,
            hessian: None,
        }
    }

    pub fn with_jacobian<F>(mut self, jacobian: F) -> Self
    where
        F: Fn(&[f64], &mut [f64]) + Send + Sync + 'static,
    {
        self.jacobian = Some(Box::new(jacobian));
        self
    }

    /// `hessian(z, weights, out)` writes the dense weighted Hessian.
    pub fn with_hessian<F>(mut self, hessian: F) -> Self
    where
        F: Fn(&[f64], &[f64], &mut [f64]) + Send + Sync + 'static,
    {
        self.hessian = Some(Box::new(hessian));
        self
    }
}

impl fmt::Debug for FnFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFunction")
            .field("n_in", &self.n_in)
            .field("n_out", &self.n_out)
            .field("analytic_jacobian", &self.jacobian.is_some())
            .field("analytic_hessian", &self.hessian.is_some())
            .finish()
    }
}

impl ModelFunction for FnFunction {
    fn n_in(&self) -> usize {
        self.n_in
    }

    fn n_out(&self) -> usize {
        self.n_out
    }

    fn eval(&self, z: &[f64], out: &mut [f64]) {
        (self.eval)(z, out)
    }

    fn jacobian(&self, z: &[f64], jac: &mut [f64]) {
        match &self.jacobian {
            Some(j) => j(z, jac),
            None => finite_difference_jacobian(self, z, jac),
        }
    }

    fn hessian(&self, z: &[f64], weights: &[f64], hess: &mut [f64]) {
        match &self.hessian {
            Some(h) => h(z, weights, hess),
            None => finite_difference_hessian(self, z, weights, hess),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_fd_jacobian_matches_analytic() {
        // F(z) = [z0 * z1, sin(z0)]
        let f = FnFunction::new(2, 2, |z, out| {
            out[0] = z[0] * z[1];
            out[1] = z[0].sin();
        });
        let z = [0.3, -1.2];
        let mut jac = [0.0; 4];
        f.jacobian(&z, &mut jac);
        assert!(close(jac[0], -1.2, 1e-8));
        assert!(close(jac[1], 0.3, 1e-8));
        assert!(close(jac[2], 0.3f64.cos(), 1e-8));
        assert!(close(jac[3], 0.0, 1e-8));
    }

    #[test]
    fn test_fd_hessian_of_weighted_sum() {
        // 2·(z0·z1) + 3·z0² -> [[6, 2], [2, 0]]
        let f = FnFunction::new(2, 2, |z, out| {
            out[0] = z[0] * z[1];
            out[1] = z[0] * z[0];
        });
        let mut hess = [0.0; 4];
        f.hessian(&[1.0, 2.0], &[2.0, 3.0], &mut hess);
        assert!(close(hess[0], 6.0, 1e-5));
        assert!(close(hess[1], 2.0, 1e-5));
        assert!(close(hess[2], 2.0, 1e-5));
        assert!(close(hess[3], 0.0, 1e-5));
    }

    #[test]
    fn test_analytic_jacobian_is_used() {
        let f = FnFunction::new(1, 1, |z, out| out[0] = z[0] * z[0])
            .with_jacobian(|_, jac| jac[0] = 42.0);
        let mut jac = [0.0];
        f.jacobian(&[1.0], &mut jac);
        assert_eq!(jac[0], 42.0);
    }
}
