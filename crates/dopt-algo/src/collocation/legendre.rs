//! Legendre polynomials and the node families built from their roots.
//!
//! All node sets live on the reference interval [-1, 1]:
//!
//! ```text
//! Gauss (LG)          roots of P_n                     -1 <  τ_1 < ... < τ_n <  1
//! Radau (flipped LGR) roots of P_n - P_{n-1}           -1 <  τ_1 < ... < τ_n =  1
//! Lobatto (LGL)       ±1 and roots of P'_{n-1}         -1 =  τ_1 < ... < τ_n =  1
//! ```
//!
//! Roots are found by Newton iteration with Maehly deflation: each new root
//! is sought on `p(x) / Π (x - r_j)` so previously found roots repel the
//! iterate. Weights are closed-form in the polynomial values at the roots.

const MAX_NEWTON: usize = 100;
const NEWTON_TOL: f64 = 1e-15;

/// `(P_n(x), P_{n-1}(x))` by the three-term recurrence.
pub(crate) fn legendre_pair(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p_prev = 1.0;
    let mut p = x;
    for k in 2..=n {
        let kf = k as f64;
        let p_next = ((2.0 * kf - 1.0) * x * p - (kf - 1.0) * p_prev) / kf;
        p_prev = p;
        p = p_next;
    }
    (p, p_prev)
}

pub(crate) fn legendre(n: usize, x: f64) -> f64 {
    legendre_pair(n, x).0
}

/// `P'_n(x)`, including the endpoint limits `P'_n(±1) = (±1)^{n+1} n(n+1)/2`.
pub(crate) fn legendre_derivative(n: usize, x: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let nf = n as f64;
    if (1.0 - x.abs()).abs() < 1e-14 {
        let sign = if x > 0.0 || n % 2 == 1 { 1.0 } else { -1.0 };
        return sign * nf * (nf + 1.0) / 2.0;
    }
    let (p, p_prev) = legendre_pair(n, x);
    nf * (x * p - p_prev) / (x * x - 1.0)
}

/// `P''_n(x)` for interior points, from the Legendre differential equation.
fn legendre_second_derivative(n: usize, x: f64) -> f64 {
    let nf = n as f64;
    let p = legendre(n, x);
    let dp = legendre_derivative(n, x);
    (2.0 * x * dp - nf * (nf + 1.0) * p) / (1.0 - x * x)
}

fn deflated_newton(known: &[f64], guess: f64, f: impl Fn(f64) -> (f64, f64)) -> f64 {
    let mut x = guess;
    for _ in 0..MAX_NEWTON {
        let (p, dp) = f(x);
        let deflation: f64 = known.iter().map(|r| 1.0 / (x - r)).sum();
        let denom = dp - p * deflation;
        if denom == 0.0 || !denom.is_finite() {
            break;
        }
        let step = p / denom;
        x -= step;
        if step.abs() < NEWTON_TOL * x.abs().max(1.0) {
            break;
        }
    }
    x
}

fn sorted(mut roots: Vec<f64>) -> Vec<f64> {
    roots.sort_by(|a, b| a.total_cmp(b));
    roots
}

/// Gauss–Legendre nodes and weights `w = 2 / ((1 - τ²) P'_n(τ)²)`.
pub(crate) fn gauss(n: usize) -> (Vec<f64>, Vec<f64>) {
    let nf = n as f64;
    let mut roots: Vec<f64> = Vec::with_capacity(n);
    for k in 0..n {
        let guess = (std::f64::consts::PI * (k as f64 + 0.75) / (nf + 0.5)).cos();
        let r = deflated_newton(&roots, guess, |x| {
            (legendre(n, x), legendre_derivative(n, x))
        });
        roots.push(r);
    }
    let nodes = sorted(roots);
    let weights = nodes
        .iter()
        .map(|&x| {
            let dp = legendre_derivative(n, x);
            2.0 / ((1.0 - x * x) * dp * dp)
        })
        .collect();
    (nodes, weights)
}

/// Radau nodes including the right endpoint, with weights
/// `w = (1 + τ) / (n² P_{n-1}(τ)²)` and `w_n = 2 / n²`.
pub(crate) fn radau(n: usize) -> (Vec<f64>, Vec<f64>) {
    let nf = n as f64;
    let mut roots = vec![1.0];
    for k in 1..n {
        let guess = (2.0 * std::f64::consts::PI * k as f64 / (2.0 * nf - 1.0)).cos();
        let r = deflated_newton(&roots, guess, |x| {
            let value = legendre(n, x) - legendre(n - 1, x);
            let slope = legendre_derivative(n, x) - legendre_derivative(n - 1, x);
            (value, slope)
        });
        roots.push(r);
    }
    let nodes = sorted(roots);
    let weights = nodes
        .iter()
        .map(|&x| {
            if (x - 1.0).abs() < 1e-14 {
                2.0 / (nf * nf)
            } else {
                let p = legendre(n - 1, x);
                (1.0 + x) / (nf * nf * p * p)
            }
        })
        .collect();
    (nodes, weights)
}

/// Lobatto nodes (n ≥ 2) with weights `w = 2 / (n(n-1) P_{n-1}(τ)²)`.
pub(crate) fn lobatto(n: usize) -> (Vec<f64>, Vec<f64>) {
    let nf = n as f64;
    let m = n - 1;
    let mut roots = vec![-1.0, 1.0];
    for k in 1..m {
        let guess = (std::f64::consts::PI * k as f64 / m as f64).cos();
        let r = deflated_newton(&roots, guess, |x| {
            (legendre_derivative(m, x), legendre_second_derivative(m, x))
        });
        roots.push(r);
    }
    let nodes = sorted(roots);
    let weights = nodes
        .iter()
        .map(|&x| {
            let p = legendre(m, x);
            2.0 / (nf * (nf - 1.0) * p * p)
        })
        .collect();
    (nodes, weights)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legendre_values() {
        // P_2(x) = (3x² - 1)/2, P_3(x) = (5x³ - 3x)/2
        assert!((legendre(2, 0.5) - (-0.125)).abs() < 1e-15);
        assert!((legendre(3, 0.5) - (-0.4375)).abs() < 1e-15);
        assert!((legendre_derivative(3, 0.5) - 0.375).abs() < 1e-14);
        assert_eq!(legendre_derivative(3, 1.0), 6.0);
        assert_eq!(legendre_derivative(2, -1.0), -3.0);
    }

    #[test]
    fn test_gauss_two_points() {
        let (nodes, weights) = gauss(2);
        let r = 1.0 / 3f64.sqrt();
        assert!((nodes[0] + r).abs() < 1e-14);
        assert!((nodes[1] - r).abs() < 1e-14);
        assert!((weights[0] - 1.0).abs() < 1e-14);
    }

    #[test]
    fn test_radau_two_points() {
        let (nodes, weights) = radau(2);
        assert!((nodes[0] + 1.0 / 3.0).abs() < 1e-14);
        assert_eq!(nodes[1], 1.0);
        assert!((weights[0] - 1.5).abs() < 1e-13);
        assert!((weights[1] - 0.5).abs() < 1e-14);
    }

    #[test]
    fn test_lobatto_three_points() {
        let (nodes, weights) = lobatto(3);
        assert_eq!(nodes[0], -1.0);
        assert!(nodes[1].abs() < 1e-14);
        assert_eq!(nodes[2], 1.0);
        assert!((weights[0] - 1.0 / 3.0).abs() < 1e-14);
        assert!((weights[1] - 4.0 / 3.0).abs() < 1e-14);
    }
}
