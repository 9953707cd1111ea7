//! Lagrange interpolation bases over a fixed point set.

use faer::Mat;

/// Lagrange basis `ℓ_j` over points `s_0 < ... < s_m`, with `ℓ_j(s_k) = δ_jk`.
#[derive(Debug, Clone)]
pub struct LagrangeBasis {
    points: Vec<f64>,
    /// Barycentric weights `b_j = 1 / Π_{k≠j} (s_j - s_k)`.
    bary: Vec<f64>,
}

impl LagrangeBasis {
    pub fn new(points: Vec<f64>) -> Self {
        let bary = (0..points.len())
            .map(|j| {
                let prod: f64 = points
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != j)
                    .map(|(_, &s)| points[j] - s)
                    .product();
                1.0 / prod
            })
            .collect();
        Self { points, bary }
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `ℓ_j(τ)` for every `j`.
    pub fn eval(&self, tau: f64) -> Vec<f64> {
        (0..self.len())
            .map(|j| {
                self.points
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != j)
                    .map(|(_, &s)| tau - s)
                    .product::<f64>()
                    * self.bary[j]
            })
            .collect()
    }

    /// `ℓ'_j(τ)` for every `j`; exact at the interpolation points too.
    pub fn derivative(&self, tau: f64) -> Vec<f64> {
        let n = self.len();
        (0..n)
            .map(|j| {
                let mut sum = 0.0;
                for m in (0..n).filter(|&m| m != j) {
                    let prod: f64 = (0..n)
                        .filter(|&k| k != j && k != m)
                        .map(|k| tau - self.points[k])
                        .product();
                    sum += prod;
                }
                sum * self.bary[j]
            })
            .collect()
    }

    /// Interpolate nodal `values` at `tau`.
    pub fn interpolate(&self, values: &[f64], tau: f64) -> f64 {
        self.eval(tau).iter().zip(values).map(|(l, v)| l * v).sum()
    }

    /// `D[i, j] = ℓ'_j(s_i)`, so `(D f)_i` approximates `f'(s_i)`.
    pub fn differentiation_matrix(&self) -> Mat<f64> {
        let n = self.len();
        let mut d = Mat::<f64>::zeros(n, n);
        for i in 0..n {
            let mut diag = 0.0;
            for j in 0..n {
                if i == j {
                    continue;
                }
                let value = (self.bary[j] / self.bary[i]) / (self.points[i] - self.points[j]);
                d.write(i, j, value);
                diag -= value;
            }
            d.write(i, i, diag);
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_is_cardinal() {
        let basis = LagrangeBasis::new(vec![-1.0, -0.2, 0.5, 1.0]);
        for (k, &s) in basis.points().to_vec().iter().enumerate() {
            let l = basis.eval(s);
            for (j, lj) in l.iter().enumerate() {
                let expected = if j == k { 1.0 } else { 0.0 };
                assert!((lj - expected).abs() < 1e-14);
            }
        }
    }

    #[test]
    fn test_derivative_matches_matrix() {
        let basis = LagrangeBasis::new(vec![-1.0, -0.3, 0.4, 1.0]);
        let d = basis.differentiation_matrix();
        for (i, &s) in basis.points().iter().enumerate() {
            let dl = basis.derivative(s);
            for (j, dlj) in dl.iter().enumerate() {
                assert!((d.read(i, j) - dlj).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_interpolates_quadratic_exactly() {
        let basis = LagrangeBasis::new(vec![-1.0, 0.0, 1.0]);
        let values: Vec<f64> = basis.points().iter().map(|s| s * s).collect();
        assert!((basis.interpolate(&values, 0.3) - 0.09).abs() < 1e-14);
    }
}
