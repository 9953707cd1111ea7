//! # Collocation Scheme Library
//!
//! Node positions, quadrature weights, differentiation matrices and Lagrange
//! bases for the supported discretization schemes on the reference interval
//! [-1, 1].
//!
//! ## Point sets
//!
//! Two bases are kept per scheme:
//!
//! ```text
//!                     state points (x basis)          collocation points (dx, u, w basis)
//! Radau     n_cp+1    -1, τ_1 ... τ_n (= 1)           τ_1 ... τ_n
//! Gauss     n_cp+1    -1, τ_1 ... τ_n                 τ_1 ... τ_n
//! Lobatto   n_cp      τ_1 (= -1) ... τ_n (= 1)        τ_1 ... τ_n
//! ```
//!
//! The state basis index of a node equals its node number inside an element,
//! so node 0 is always the element-entry point. Node `n_cp + 1` is the Gauss
//! exit point, which carries only a state.
//!
//! ## Differentiation matrix
//!
//! `D[k, l] = ℓ'_l(s_k)` over the state points. The collocation residual at
//! node `k` is `Σ_l D[k, l]·x_l - (h/2)·dx_k`, where `h` is the physical
//! element length.
//!
//! ## Gauss end state
//!
//! Gauss nodes exclude +1, so the element-exit state is tied to the interior
//! by quadrature of the state polynomial's derivative:
//!
//! ```text
//! x_exit = x_0 + Σ_k w_k Σ_l D[k, l]·x_l
//! ```

mod lagrange;
mod legendre;

pub use lagrange::LagrangeBasis;

use dopt_core::{DoptError, DoptResult};
use faer::Mat;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Discretization scheme, selected once per transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Right endpoint collocated, left not.
    #[default]
    Radau,
    /// Neither endpoint collocated.
    Gauss,
    /// Both endpoints collocated.
    GaussLobatto,
}

impl Scheme {
    /// Whether element entry is a separate, non-collocated node 0.
    pub fn has_entry_node(&self) -> bool {
        matches!(self, Scheme::Radau | Scheme::Gauss)
    }

    /// Whether the element exit is a separate, non-collocated node.
    pub fn has_exit_node(&self) -> bool {
        matches!(self, Scheme::Gauss)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Radau => "radau",
            Scheme::Gauss => "gauss",
            Scheme::GaussLobatto => "gauss_lobatto",
        }
    }
}

impl FromStr for Scheme {
    type Err = DoptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "radau" | "radau2" | "lgr" => Ok(Scheme::Radau),
            "gauss" | "legendre" | "gauss_legendre" | "lg" => Ok(Scheme::Gauss),
            "gauss_lobatto" | "lobatto" | "lgl" => Ok(Scheme::GaussLobatto),
            other => Err(DoptError::config(format!(
                "unknown discretization scheme '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric data of one scheme at one order.
#[derive(Debug, Clone)]
pub struct CollocationBasis {
    scheme: Scheme,
    n_cp: usize,
    nodes: Vec<f64>,
    weights: Vec<f64>,
    state_basis: LagrangeBasis,
    collocation_basis: LagrangeBasis,
    diff: Mat<f64>,
    end_coefficients: Vec<f64>,
}

impl CollocationBasis {
    pub fn new(scheme: Scheme, n_cp: usize) -> DoptResult<Self> {
        if n_cp == 0 {
            return Err(DoptError::config("at least one collocation point is required"));
        }
        let (nodes, weights) = match scheme {
            Scheme::Radau => legendre::radau(n_cp),
            Scheme::Gauss => legendre::gauss(n_cp),
            Scheme::GaussLobatto => {
                if n_cp < 2 {
                    return Err(DoptError::config(
                        "Gauss-Lobatto collocation needs at least two points per element",
                    ));
                }
                legendre::lobatto(n_cp)
            }
        };

        let state_points = if scheme.has_entry_node() {
            std::iter::once(-1.0).chain(nodes.iter().copied()).collect()
        } else {
            nodes.clone()
        };
        let state_basis = LagrangeBasis::new(state_points);
        let collocation_basis = LagrangeBasis::new(nodes.clone());
        let diff = state_basis.differentiation_matrix();

        let collocation_rows: Vec<usize> = if scheme.has_entry_node() {
            (1..=n_cp).collect()
        } else {
            (0..n_cp).collect()
        };
        let end_coefficients = (0..state_basis.len())
            .map(|l| {
                collocation_rows
                    .iter()
                    .zip(&weights)
                    .map(|(&k, w)| w * diff.read(k, l))
                    .sum()
            })
            .collect();

        Ok(Self {
            scheme,
            n_cp,
            nodes,
            weights,
            state_basis,
            collocation_basis,
            diff,
            end_coefficients,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn n_cp(&self) -> usize {
        self.n_cp
    }

    /// Collocation abscissae, ascending.
    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// `(n_cp+1) × (n_cp+1)` for Radau/Gauss, `n_cp × n_cp` for Lobatto.
    pub fn differentiation_matrix(&self) -> &Mat<f64> {
        &self.diff
    }

    pub fn diff(&self, row: usize, col: usize) -> f64 {
        self.diff.read(row, col)
    }

    pub fn state_basis(&self) -> &LagrangeBasis {
        &self.state_basis
    }

    pub fn collocation_basis(&self) -> &LagrangeBasis {
        &self.collocation_basis
    }

    /// Number of state approximation points per element.
    pub fn n_state_points(&self) -> usize {
        self.state_basis.len()
    }

    /// Node numbers (within an element) that are collocation points.
    pub fn collocation_nodes(&self) -> std::ops::Range<usize> {
        if self.scheme.has_entry_node() {
            1..self.n_cp + 1
        } else {
            0..self.n_cp
        }
    }

    /// Index into [`Self::nodes`] / [`Self::weights`] of a collocation node.
    pub fn collocation_slot(&self, node: usize) -> usize {
        if self.scheme.has_entry_node() {
            node - 1
        } else {
            node
        }
    }

    /// Node number of the element-exit point.
    pub fn exit_node(&self) -> usize {
        match self.scheme {
            Scheme::Radau => self.n_cp,
            Scheme::Gauss => self.n_cp + 1,
            Scheme::GaussLobatto => self.n_cp - 1,
        }
    }

    /// Reference abscissa of a node number.
    pub fn tau(&self, node: usize) -> f64 {
        match self.scheme {
            Scheme::Radau | Scheme::Gauss if node == 0 => -1.0,
            Scheme::Gauss if node == self.n_cp + 1 => 1.0,
            _ => self.nodes[self.collocation_slot(node)],
        }
    }

    /// Coefficients `c_l` of the Gauss end-state equation
    /// `x_exit - x_0 - Σ_l c_l x_l = 0` over the state points.
    pub fn end_coefficients(&self) -> &[f64] {
        &self.end_coefficients
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_parsing() {
        assert_eq!("Radau".parse::<Scheme>().unwrap(), Scheme::Radau);
        assert_eq!("legendre".parse::<Scheme>().unwrap(), Scheme::Gauss);
        assert_eq!("LGL".parse::<Scheme>().unwrap(), Scheme::GaussLobatto);
        assert!(matches!(
            "chebyshev".parse::<Scheme>(),
            Err(DoptError::Configuration(_))
        ));
    }

    #[test]
    fn test_endpoint_inclusion() {
        let radau = CollocationBasis::new(Scheme::Radau, 3).unwrap();
        assert_eq!(*radau.nodes().last().unwrap(), 1.0);
        assert!(radau.nodes()[0] > -1.0);

        let gauss = CollocationBasis::new(Scheme::Gauss, 3).unwrap();
        assert!(gauss.nodes()[0] > -1.0 && *gauss.nodes().last().unwrap() < 1.0);

        let lobatto = CollocationBasis::new(Scheme::GaussLobatto, 3).unwrap();
        assert_eq!(lobatto.nodes()[0], -1.0);
        assert_eq!(*lobatto.nodes().last().unwrap(), 1.0);
    }

    #[test]
    fn test_matrix_shapes() {
        let radau = CollocationBasis::new(Scheme::Radau, 4).unwrap();
        assert_eq!(radau.differentiation_matrix().nrows(), 5);
        let lobatto = CollocationBasis::new(Scheme::GaussLobatto, 4).unwrap();
        assert_eq!(lobatto.differentiation_matrix().ncols(), 4);
    }

    #[test]
    fn test_lobatto_requires_two_points() {
        assert!(matches!(
            CollocationBasis::new(Scheme::GaussLobatto, 1),
            Err(DoptError::Configuration(_))
        ));
        assert!(CollocationBasis::new(Scheme::Radau, 0).is_err());
    }

    #[test]
    fn test_gauss_end_coefficients_integrate_linear_state() {
        // x(τ) = τ: x_exit - x_0 = 2
        let gauss = CollocationBasis::new(Scheme::Gauss, 3).unwrap();
        let x: Vec<f64> = gauss.state_basis().points().to_vec();
        let integral: f64 = gauss
            .end_coefficients()
            .iter()
            .zip(&x)
            .map(|(c, x)| c * x)
            .sum();
        assert!((integral - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_node_numbering() {
        let gauss = CollocationBasis::new(Scheme::Gauss, 2).unwrap();
        assert_eq!(gauss.collocation_nodes(), 1..3);
        assert_eq!(gauss.exit_node(), 3);
        assert_eq!(gauss.tau(0), -1.0);
        assert_eq!(gauss.tau(3), 1.0);

        let lobatto = CollocationBasis::new(Scheme::GaussLobatto, 3).unwrap();
        assert_eq!(lobatto.collocation_nodes(), 0..3);
        assert_eq!(lobatto.exit_node(), 2);
        assert_eq!(lobatto.tau(0), -1.0);
    }
}
