//! Cost assembly: Bolza functional or weighted measurement fit.
//!
//! ```text
//! Bolza:       J = φ(z_final) + Σ_e Σ_k (h_e/2) w_k L(z_ek)
//! Estimation:  J = Σ_e Σ_k (h_e/2) w_k (y_ek - m(t_ek))ᵀ Q (y_ek - m(t_ek))
//! ```
//!
//! `w_k` are reference weights on [-1, 1] and `h_e` the physical element
//! length, so the quadrature already carries the horizon length.

use super::expr::{Affine, FunctionRef, ModelTerm};
use super::indexer::VarType;
use super::Transcription;
use dopt_core::{
    AliasKind, DoptError, DoptResult, MeasurementData, ModelDescription, ModelFunction, VarKind,
};

/// Measurement-fitting cost configuration.
#[derive(Debug, Clone)]
pub struct ParameterEstimation {
    /// Measured variable names (states, algebraics or controls).
    pub measured_variables: Vec<String>,
    /// Weight matrix `Q`, row-major, `n × n` for `n` measured variables.
    pub weights: Vec<f64>,
    pub data: MeasurementData,
}

impl ParameterEstimation {
    /// Identity-weighted fit of every variable present in `data`.
    pub fn unweighted(data: MeasurementData) -> Self {
        let n = data.names().len();
        let mut weights = vec![0.0; n * n];
        for i in 0..n {
            weights[i * n + i] = 1.0;
        }
        Self {
            measured_variables: data.names().to_vec(),
            weights,
            data,
        }
    }
}

/// `(y - r)ᵀ Q (y - r)` for a fixed reference `r`.
#[derive(Debug, Clone)]
pub struct MeasurementDeviation {
    reference: Vec<f64>,
    weights: Vec<f64>,
}

impl MeasurementDeviation {
    pub fn new(reference: Vec<f64>, weights: Vec<f64>) -> Self {
        Self { reference, weights }
    }

    fn q(&self, i: usize, j: usize) -> f64 {
        self.weights[i * self.reference.len() + j]
    }
}

impl ModelFunction for MeasurementDeviation {
    fn n_in(&self) -> usize {
        self.reference.len()
    }

    fn n_out(&self) -> usize {
        1
    }

    fn eval(&self, z: &[f64], out: &mut [f64]) {
        let n = self.reference.len();
        let mut total = 0.0;
        for i in 0..n {
            for j in 0..n {
                total += (z[i] - self.reference[i]) * self.q(i, j) * (z[j] - self.reference[j]);
            }
        }
        out[0] = total;
    }

    fn jacobian(&self, z: &[f64], jac: &mut [f64]) {
        let n = self.reference.len();
        for k in 0..n {
            jac[k] = (0..n)
                .map(|j| (self.q(k, j) + self.q(j, k)) * (z[j] - self.reference[j]))
                .sum();
        }
    }

    fn hessian(&self, _z: &[f64], weights: &[f64], hess: &mut [f64]) {
        let n = self.reference.len();
        for i in 0..n {
            for j in 0..n {
                hess[i * n + j] = weights[0] * (self.q(i, j) + self.q(j, i));
            }
        }
    }
}

/// Decision-vector class, class position and sign of a measured name.
fn resolve_measured(description: &ModelDescription, name: &str) -> DoptResult<(VarType, usize, f64)> {
    let var = description
        .by_name(name)
        .ok_or_else(|| DoptError::not_found(name))?;
    let sign = if var.alias == AliasKind::Negated { -1.0 } else { 1.0 };
    let (kind, position) = description
        .position(var.var_ref)
        .ok_or_else(|| DoptError::not_found(name))?;
    let var_type = match kind {
        VarKind::State => VarType::X,
        VarKind::Algebraic => VarType::W,
        VarKind::Control => VarType::U,
        _ => return Err(DoptError::not_found(name)),
    };
    Ok((var_type, position, sign))
}

impl Transcription {
    pub(super) fn build_cost(&self) -> DoptResult<(Vec<ModelTerm>, Vec<MeasurementDeviation>)> {
        match &self.options().parameter_estimation {
            Some(estimation) => self.estimation_cost(estimation),
            None => Ok((self.bolza_cost()?, Vec::new())),
        }
    }

    fn quadrature_scale(&self, element: usize, node: usize) -> Affine {
        let w = self.basis().weights()[self.basis().collocation_slot(node)];
        self.element_length(element).scale(0.5 * w)
    }

    fn bolza_cost(&self) -> DoptResult<Vec<ModelTerm>> {
        let model = self.model().clone();
        let n_e = self.mesh().n_e();
        let mut terms = Vec::new();
        if model.mayer().is_some() {
            terms.push(ModelTerm::new(
                FunctionRef::Mayer,
                self.node_inputs(n_e - 1, self.basis().exit_node())?,
                Affine::constant(1.0),
            ));
        }
        if model.lagrange().is_some() {
            for element in 0..n_e {
                for node in self.basis().collocation_nodes() {
                    terms.push(ModelTerm::new(
                        FunctionRef::Lagrange,
                        self.node_inputs(element, node)?,
                        self.quadrature_scale(element, node),
                    ));
                }
            }
        }
        Ok(terms)
    }

    fn estimation_cost(
        &self,
        estimation: &ParameterEstimation,
    ) -> DoptResult<(Vec<ModelTerm>, Vec<MeasurementDeviation>)> {
        let n = estimation.measured_variables.len();
        if estimation.weights.len() != n * n {
            return Err(DoptError::config(format!(
                "measurement weight matrix has {} entries, expected {n}x{n}",
                estimation.weights.len()
            )));
        }
        if !self.has_fixed_time_grid() {
            return Err(DoptError::config(
                "parameter estimation needs a fixed time grid (no free times or phases)",
            ));
        }

        let description = self.description();
        let mut measured = Vec::with_capacity(n);
        for name in &estimation.measured_variables {
            let (var, position, sign) = resolve_measured(description, name)?;
            let series = estimation.data.get(name)?;
            measured.push((var, position, sign, series));
        }

        let mut terms = Vec::new();
        let mut deviations = Vec::new();
        for element in 0..self.mesh().n_e() {
            for node in self.basis().collocation_nodes() {
                let t = self.node_time(element, node).constant;
                let mut inputs = Vec::with_capacity(n);
                let mut reference = Vec::with_capacity(n);
                for &(var, position, sign, series) in &measured {
                    inputs.push(self.node_value(element, node, var, position)?.scale(sign));
                    reference.push(series.eval(t));
                }
                terms.push(ModelTerm::new(
                    FunctionRef::Measurement(deviations.len()),
                    inputs,
                    self.quadrature_scale(element, node),
                ));
                deviations.push(MeasurementDeviation::new(reference, estimation.weights.clone()));
            }
        }
        Ok((terms, deviations))
    }

    /// Cost value at `x`.
    pub fn objective(&self, x: &[f64]) -> f64 {
        self.cost_terms
            .iter()
            .filter_map(|term| self.function(term.function).map(|f| term.values(f, x)[0]))
            .sum()
    }

    /// Dense cost gradient.
    pub fn objective_gradient(&self, x: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; self.n_xx()];
        for term in &self.cost_terms {
            if let Some(f) = self.function(term.function) {
                let jac = term.jacobian(f, x);
                for (p, &i) in term.support().iter().enumerate() {
                    grad[i] += jac[p];
                }
            }
        }
        grad
    }

    /// `σ f(x) + λᵀ c(x)` over equalities then inequalities.
    pub fn lagrangian(&self, x: &[f64], sigma: f64, lambda: &[f64]) -> f64 {
        let c = self.constraints(x);
        sigma * self.objective(x) + c.iter().zip(lambda).map(|(ci, li)| ci * li).sum::<f64>()
    }
}
