//! Result extraction: decision vector back to time trajectories.
//!
//! Values stay in decision-vector units (`value / nominal`); use
//! [`Trajectories::unscaled`] for physical values. Times are physical.

use super::indexer::VarType;
use super::Transcription;
use dopt_core::{DoptError, DoptResult, Trajectories};
use serde::{Deserialize, Serialize};

/// Where trajectories are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResultMode {
    /// The mesh nodes themselves, plus the entry (Radau/Gauss) and exit (Gauss) points.
    #[default]
    CollocationPoints,
    /// Equidistant points in each element, endpoints included.
    ElementInterpolation { points_per_element: usize },
}

impl Transcription {
    /// Trajectories in the configured result mode.
    pub fn extract(&self, x: &[f64]) -> DoptResult<Trajectories> {
        self.extract_with(x, self.options().result_mode)
    }

    pub fn extract_with(&self, x: &[f64], mode: ResultMode) -> DoptResult<Trajectories> {
        if x.len() != self.n_xx() {
            return Err(DoptError::AssemblyInvariant {
                expected: self.n_xx(),
                actual: x.len(),
            });
        }
        let mut out = Trajectories {
            p_opt: x[self.index().p_range()].to_vec(),
            ..Default::default()
        };
        match mode {
            ResultMode::CollocationPoints => self.extract_nodes(x, &mut out)?,
            ResultMode::ElementInterpolation { points_per_element } => {
                if points_per_element < 2 {
                    return Err(DoptError::config(
                        "element interpolation needs at least two points per element",
                    ));
                }
                self.extract_interpolated(x, points_per_element, &mut out)?
            }
        }
        Ok(out)
    }

    fn values_at(&self, x: &[f64], element: usize, node: usize, var: VarType) -> DoptResult<Vec<f64>> {
        self.index()
            .range(element, node, var)
            .map(|r| x[r].to_vec())
            .ok_or(DoptError::AssemblyInvariant {
                expected: self.n_xx(),
                actual: element,
            })
    }

    /// Values of `var` at every collocation node of `element`.
    fn collocated(&self, x: &[f64], element: usize, var: VarType) -> DoptResult<Vec<Vec<f64>>> {
        self.basis()
            .collocation_nodes()
            .map(|node| self.values_at(x, element, node, var))
            .collect()
    }

    /// Values of the state at every state-approximation point of `element`.
    fn state_points(&self, x: &[f64], element: usize) -> DoptResult<Vec<Vec<f64>>> {
        (0..self.basis().n_state_points())
            .map(|l| self.values_at(x, element, l, VarType::X))
            .collect()
    }

    fn extract_nodes(&self, x: &[f64], out: &mut Trajectories) -> DoptResult<()> {
        let basis = self.basis();
        let gauss_exit = basis.scheme().has_exit_node().then(|| basis.exit_node());
        for element in 0..self.mesh().n_e() {
            for node in self.result_nodes(element) {
                out.time.push(self.node_time(element, node).eval(x));
                if Some(node) == gauss_exit {
                    let state = self.values_at(x, element, node, VarType::X)?;
                    out.dx.push(self.exit_derivative(x, element)?);
                    out.x.push(state);
                    let weights = basis.collocation_basis().eval(1.0);
                    out.u.push(combine(&self.collocated(x, element, VarType::U)?, &weights));
                    out.w.push(combine(&self.collocated(x, element, VarType::W)?, &weights));
                } else {
                    out.dx.push(self.values_at(x, element, node, VarType::Dx)?);
                    out.x.push(self.values_at(x, element, node, VarType::X)?);
                    out.u.push(self.values_at(x, element, node, VarType::U)?);
                    out.w.push(self.values_at(x, element, node, VarType::W)?);
                }
            }
        }
        Ok(())
    }

    /// State derivative at the element exit from the state polynomial.
    fn exit_derivative(&self, x: &[f64], element: usize) -> DoptResult<Vec<f64>> {
        let h = self.element_length(element).eval(x);
        let d = self.basis().state_basis().derivative(1.0);
        let physical = combine(&self.state_points(x, element)?, &d);
        let nominals = self.nominals();
        Ok(physical
            .iter()
            .enumerate()
            .map(|(j, v)| 2.0 / h * v * nominals.x[j] / nominals.dx[j])
            .collect())
    }

    fn extract_interpolated(&self, x: &[f64], n: usize, out: &mut Trajectories) -> DoptResult<()> {
        let basis = self.basis();
        for element in 0..self.mesh().n_e() {
            let states = self.state_points(x, element)?;
            let dx = self.collocated(x, element, VarType::Dx)?;
            let u = self.collocated(x, element, VarType::U)?;
            let w = self.collocated(x, element, VarType::W)?;
            let t0 = self.boundary_time(element).eval(x);
            let h = self.element_length(element).eval(x);
            for k in 0..n {
                let tau = -1.0 + 2.0 * k as f64 / (n - 1) as f64;
                out.time.push(t0 + (tau + 1.0) / 2.0 * h);
                out.x.push(combine(&states, &basis.state_basis().eval(tau)));
                let weights = basis.collocation_basis().eval(tau);
                out.dx.push(combine(&dx, &weights));
                out.u.push(combine(&u, &weights));
                out.w.push(combine(&w, &weights));
            }
        }
        Ok(())
    }
}

/// `Σ_k weights[k] · rows[k]`, component-wise.
fn combine(rows: &[Vec<f64>], weights: &[f64]) -> Vec<f64> {
    let width = rows.first().map_or(0, Vec::len);
    let mut out = vec![0.0; width];
    for (row, &c) in rows.iter().zip(weights) {
        for (o, v) in out.iter_mut().zip(row) {
            *o += c * v;
        }
    }
    out
}
