//! Equality and inequality residual assembly.
//!
//! Row order is part of the contract with the solver (dual vectors and
//! sparsity patterns are positional):
//!
//! ```text
//! equalities    F0(0,0) | DAE(0,0) | u(0,0) interpolation
//!               per element, per collocation node: DAE, collocation
//!               Gauss end equations | continuity / links | boundary
//! inequalities  boundary | path at every collocation node | phase ordering
//! ```

use super::expr::{Affine, FunctionRef, ModelTerm, QuadraticRow};
use super::indexer::VarType;
use super::{Residual, Transcription};
use crate::collocation::Scheme;
use dopt_core::{DoptError, DoptResult, ModelFunction};

impl Transcription {
    fn model_residual(
        &self,
        function: FunctionRef,
        f: &dyn ModelFunction,
        inputs: Vec<Affine>,
    ) -> Residual {
        Residual::Model {
            term: ModelTerm::new(function, inputs, Affine::constant(1.0)),
            rows: f.n_out(),
        }
    }

    fn index_of(&self, element: usize, node: usize, var: VarType, j: usize) -> DoptResult<usize> {
        self.index()
            .index(element, node, var, j)
            .ok_or(DoptError::AssemblyInvariant {
                expected: self.n_xx(),
                actual: element,
            })
    }

    pub(super) fn build_equalities(&self) -> DoptResult<Vec<Residual>> {
        let model = self.model().clone();
        let basis = self.basis();
        let scheme = basis.scheme();
        let layout = self.layout();
        let n_e = self.mesh().n_e();
        let mut out = Vec::new();

        // Initial conditions.
        if let Some(f0) = model.initial() {
            out.push(self.model_residual(FunctionRef::Initial, f0, self.node_inputs(0, 0)?));
        }
        if scheme.has_entry_node() {
            out.push(self.model_residual(FunctionRef::Dae, model.dae(), self.node_inputs(0, 0)?));
            if !self.index().is_blocked() {
                let weights = basis.collocation_basis().eval(-1.0);
                for j in 0..layout.n_u {
                    let mut row = QuadraticRow::new().linear(self.index_of(0, 0, VarType::U, j)?, 1.0);
                    for (slot, node) in basis.collocation_nodes().enumerate() {
                        row = row.linear(self.index_of(0, node, VarType::U, j)?, -weights[slot]);
                    }
                    out.push(Residual::Quadratic(row));
                }
            }
        }

        // Dynamics and collocation.
        let n_points = basis.n_state_points();
        for element in 0..n_e {
            let h = self.element_length(element);
            for node in basis.collocation_nodes() {
                out.push(self.model_residual(
                    FunctionRef::Dae,
                    model.dae(),
                    self.node_inputs(element, node)?,
                ));
                for j in 0..layout.n_x {
                    let sx = self.nominals().x[j];
                    let sdx = self.nominals().dx[j];
                    let mut row = QuadraticRow::new();
                    for l in 0..n_points {
                        row = row.linear(self.index_of(element, l, VarType::X, j)?, basis.diff(node, l) * sx);
                    }
                    let dx = self.index_of(element, node, VarType::Dx, j)?;
                    out.push(Residual::Quadratic(row.add_product(-0.5 * sdx, &h, dx)));
                }
            }
        }

        // Gauss: the exit state is the quadrature of the collocated derivative.
        if scheme == Scheme::Gauss {
            let c = basis.end_coefficients();
            let exit = basis.exit_node();
            for element in 0..n_e {
                for j in 0..layout.n_x {
                    let sx = self.nominals().x[j];
                    let mut row = QuadraticRow::new()
                        .linear(self.index_of(element, exit, VarType::X, j)?, sx)
                        .linear(self.index_of(element, 0, VarType::X, j)?, -sx);
                    for (l, &cl) in c.iter().enumerate() {
                        row = row.linear(self.index_of(element, l, VarType::X, j)?, -cl * sx);
                    }
                    out.push(Residual::Quadratic(row));
                }
            }
        }

        // Continuity and linking across element boundaries.
        if self.index().has_explicit_continuity() {
            for element in 1..n_e {
                let exit = self
                    .index()
                    .element_exit_state(element - 1)
                    .ok_or(DoptError::AssemblyInvariant {
                        expected: element,
                        actual: 0,
                    })?;
                let entry = self
                    .index()
                    .explicit_entry_state(element)
                    .ok_or(DoptError::AssemblyInvariant {
                        expected: element,
                        actual: 0,
                    })?;
                for j in 0..layout.n_x {
                    let sx = self.nominals().x[j];
                    let mut row = QuadraticRow::new()
                        .linear(exit + j, sx)
                        .linear(entry + j, -sx);
                    for link in self.links.iter().filter(|l| l.element == element && l.state == j) {
                        row = row.add_affine(1.0, &link.jump);
                    }
                    out.push(Residual::Quadratic(row));
                }
            }
        }

        if let Some(f) = model.boundary_equality() {
            out.push(self.model_residual(FunctionRef::BoundaryEquality, f, self.boundary_inputs()?));
        }
        Ok(out)
    }

    pub(super) fn build_inequalities(&self) -> DoptResult<Vec<Residual>> {
        let model = self.model().clone();
        let basis = self.basis();
        let n_e = self.mesh().n_e();
        let mut out = Vec::new();

        if let Some(f) = model.boundary_inequality() {
            out.push(self.model_residual(FunctionRef::BoundaryInequality, f, self.boundary_inputs()?));
        }
        if let Some(f) = model.path_inequality() {
            for element in 0..n_e {
                for node in basis.collocation_nodes() {
                    out.push(self.model_residual(FunctionRef::Path, f, self.node_inputs(element, node)?));
                }
            }
        }
        if self.options().free_phases {
            for i in 1..=n_e {
                let gap = self.boundary_time(i - 1).axpy(-1.0, self.boundary_time(i));
                if !gap.is_constant() {
                    out.push(Residual::Quadratic(QuadraticRow::new().add_affine(1.0, &gap)));
                }
            }
        }
        Ok(out)
    }

    /// Equality residuals followed by inequality residuals.
    pub fn constraints(&self, x: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.n_equalities() + self.n_inequalities());
        for residual in self.equalities.iter().chain(&self.inequalities) {
            match residual {
                Residual::Model { term, rows } => match self.function(term.function) {
                    Some(f) => out.extend(term.values(f, x)),
                    None => out.extend(std::iter::repeat(0.0).take(*rows)),
                },
                Residual::Quadratic(row) => out.push(row.eval(x)),
            }
        }
        out
    }

    /// Largest equality violation and largest positive inequality value.
    pub fn constraint_violation(&self, x: &[f64]) -> f64 {
        let g = self.constraints(x);
        let (eq, ineq) = g.split_at(self.n_equalities());
        let eq_violation = eq.iter().map(|v| v.abs()).fold(0.0, f64::max);
        let ineq_violation = ineq.iter().copied().fold(0.0, f64::max);
        eq_violation.max(ineq_violation)
    }
}

#[cfg(test)]
mod tests {
    use crate::collocation::Scheme;
    use crate::transcription::{PhaseLink, Transcription, TranscriptionOptions};
    use dopt_core::{DescriptionBuilder, DoptError, FnFunction, Model, TimeHorizon, Variable};
    use std::sync::Arc;

    fn integrator() -> Model {
        let description = DescriptionBuilder::new()
            .state(Variable::new("x"))
            .control(Variable::new("u"))
            .free_parameter(Variable::new("jump"))
            .build()
            .unwrap();
        // z = [jump, dx, x, u, t]
        let dae = FnFunction::new(5, 1, |z, out| out[0] = z[1] - z[3]);
        Model::new(description, TimeHorizon::fixed(0.0, 1.0), dae)
            .with_initial(FnFunction::new(5, 1, |z, out| out[0] = z[2] - 1.0))
    }

    #[test]
    fn test_equality_count_radau() {
        let options = TranscriptionOptions {
            n_e: 4,
            n_cp: 2,
            ..Default::default()
        };
        let t = Transcription::new(Arc::new(integrator()), options).unwrap();
        // F0 + entry DAE + entry u + 4·2·(DAE + collocation)
        assert_eq!(t.n_equalities(), 1 + 1 + 1 + 16);
        assert_eq!(t.n_inequalities(), 0);
    }

    #[test]
    fn test_gauss_adds_end_equations() {
        let options = TranscriptionOptions {
            scheme: Scheme::Gauss,
            n_e: 3,
            n_cp: 2,
            ..Default::default()
        };
        let t = Transcription::new(Arc::new(integrator()), options).unwrap();
        assert_eq!(t.n_equalities(), 3 + 3 * 2 * 2 + 3);
    }

    #[test]
    fn test_link_row_carries_jump() {
        let options = TranscriptionOptions {
            n_e: 2,
            n_cp: 1,
            links: vec![PhaseLink {
                element: 1,
                state: "x".into(),
                parameter: "jump".into(),
            }],
            ..Default::default()
        };
        let t = Transcription::new(Arc::new(integrator()), options).unwrap();
        let n = t.n_xx();
        let exit = t.index().element_exit_state(0).unwrap();
        let entry = t.index().explicit_entry_state(1).unwrap();
        let mut x = vec![0.0; n];
        x[exit] = 2.0;
        x[entry] = 2.5;
        x[t.index().p_opt(0)] = 0.5;
        let g = t.constraints(&x);
        // The continuity row is the last equality.
        assert!(g[t.n_equalities() - 1].abs() < 1e-15);
    }

    #[test]
    fn test_missing_link_parameter() {
        let options = TranscriptionOptions {
            n_e: 2,
            n_cp: 1,
            links: vec![PhaseLink {
                element: 1,
                state: "x".into(),
                parameter: "nope".into(),
            }],
            ..Default::default()
        };
        let err = Transcription::new(Arc::new(integrator()), options).unwrap_err();
        assert!(matches!(err, DoptError::Linking { name } if name == "nope"));
    }
}
