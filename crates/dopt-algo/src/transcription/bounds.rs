//! Variable bounds and initial guess on the decision vector.
//!
//! Model-level `min`/`max`/`start` are physical; the decision vector holds
//! `value / nominal`, so every entry is divided by the nominal (and the
//! bounds swap for a negative nominal). Missing entries default to
//! `(-∞, +∞, 0)`.

use super::indexer::{Block, VarType};
use super::Transcription;
use dopt_core::{
    DoptError, DoptResult, LinearInterpolation, NamedTrajectories, TimeBound, TrajectorySource,
    Trajectories, VarKind, Variable,
};
use tracing::{debug, warn};

/// Parallel `lower`/`upper`/`initial` arrays of length `n_xx`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundsAndGuess {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub initial: Vec<f64>,
}

impl BoundsAndGuess {
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
            initial: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.initial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.initial.is_empty()
    }

    /// Clamp the initial guess into the bounds.
    pub fn clamp_initial(&mut self) {
        for ((x, &lo), &hi) in self.initial.iter_mut().zip(&self.lower).zip(&self.upper) {
            *x = x.max(lo).min(hi);
        }
    }

    fn set(&mut self, i: usize, var: &Variable) {
        let s = var.nominal;
        let mut lo = var.min.map_or(f64::NEG_INFINITY, |v| v / s);
        let mut hi = var.max.map_or(f64::INFINITY, |v| v / s);
        if s < 0.0 {
            std::mem::swap(&mut lo, &mut hi);
        }
        self.lower[i] = lo;
        self.upper[i] = hi;
        self.initial[i] = var.initial_guess().map_or(0.0, |v| v / s);
    }

    fn set_time(&mut self, i: usize, bound: TimeBound) {
        match bound {
            TimeBound::Fixed(t) => {
                self.lower[i] = t;
                self.upper[i] = t;
                self.initial[i] = t;
            }
            TimeBound::Free {
                initial_guess,
                min,
                max,
            } => {
                self.lower[i] = min.unwrap_or(f64::NEG_INFINITY);
                self.upper[i] = max.unwrap_or(f64::INFINITY);
                self.initial[i] = initial_guess;
            }
        }
    }
}

fn class_of(var: VarType) -> VarKind {
    match var {
        VarType::Dx => VarKind::Derivative,
        VarType::X => VarKind::State,
        VarType::U => VarKind::Control,
        VarType::W => VarKind::Algebraic,
    }
}

impl Transcription {
    pub fn bounds(&self) -> &BoundsAndGuess {
        &self.bounds
    }

    /// Rebuild bounds and initial guess from the model description.
    pub fn compute_bounds_and_initial_guess(&mut self) {
        let model = self.model.clone();
        let description = model.description();
        let classes: Vec<Vec<&Variable>> = VarType::ALL
            .iter()
            .map(|&v| description.class(class_of(v)).collect())
            .collect();
        let parameters: Vec<&Variable> = description.class(VarKind::Parameter).collect();
        let horizon = self.horizon;

        let mut out = BoundsAndGuess::unbounded(self.n_xx());
        for record in self.index.records() {
            match record.block {
                Block::Parameters => {
                    for (k, var) in parameters.iter().enumerate() {
                        out.set(record.offset + k, var);
                    }
                }
                Block::Node { var, .. } => {
                    for (k, v) in classes[var as usize].iter().enumerate() {
                        out.set(record.offset + k, v);
                    }
                }
                Block::ControlGroup { .. } => {
                    for (k, v) in classes[VarType::U as usize].iter().enumerate() {
                        out.set(record.offset + k, v);
                    }
                }
                Block::EntryState { .. } => {
                    for (k, v) in classes[VarType::X as usize].iter().enumerate() {
                        out.set(record.offset + k, v);
                    }
                }
                Block::StartTime => out.set_time(record.offset, horizon.start),
                Block::FinalTime => out.set_time(record.offset, horizon.end),
                Block::PhaseBoundary { boundary } => {
                    out.initial[record.offset] =
                        horizon.t0() + self.mesh.boundary(boundary) * horizon.length();
                }
            }
        }
        self.bounds = out;
        self.apply_pinned();
    }

    /// Write pinned parameter values into all three arrays.
    pub(super) fn apply_pinned(&mut self) {
        let nominals = &self.nominals.p;
        for (&position, &value) in &self.pinned {
            let i = self.index.p_opt(position);
            let v = value / nominals[position];
            self.bounds.lower[i] = v;
            self.bounds.upper[i] = v;
            self.bounds.initial[i] = v;
        }
    }

    /// Replace the initial guess wholesale.
    pub fn set_initial_guess(&mut self, initial: Vec<f64>) -> DoptResult<()> {
        if initial.len() != self.n_xx() {
            return Err(DoptError::AssemblyInvariant {
                expected: self.n_xx(),
                actual: initial.len(),
            });
        }
        self.bounds.initial = initial;
        self.apply_pinned();
        Ok(())
    }

    /// Initialize from physical-unit trajectories of the same model.
    pub fn initialize_from_trajectories(&mut self, trajectories: &Trajectories) {
        let model = self.model.clone();
        let source = NamedTrajectories {
            description: model.description(),
            trajectories,
        };
        self.initialize_from_source(&source);
    }

    /// Interpolate every variable the source knows onto the node times.
    ///
    /// Variables the source lacks keep their current guess.
    pub fn initialize_from_source(&mut self, source: &dyn TrajectorySource) {
        let model = self.model.clone();
        let description = model.description();
        let mut initial = self.bounds.initial.clone();

        for (position, var) in description.class(VarKind::Parameter).enumerate() {
            if self.pinned.contains_key(&position) {
                continue;
            }
            if let Some(series) = series_of(source, var) {
                initial[self.index.p_opt(position)] = series.eval(self.horizon.t0()) / var.nominal;
            }
        }

        // Node times are evaluated at the guess that carries the free times.
        let times = initial.clone();
        let n_e = self.mesh.n_e();
        for var in VarType::ALL {
            for (j, v) in description.class(class_of(var)).enumerate() {
                let Some(series) = series_of(source, v) else {
                    continue;
                };
                for element in 0..n_e {
                    for node in self.result_nodes(element) {
                        if let Some(i) = self.index.owned(element, node, var).map(|o| o + j) {
                            initial[i] = series.eval(self.node_time(element, node).eval(&times)) / v.nominal;
                        } else if var == VarType::U && self.index.is_blocked() {
                            if let Some(i) = self.index.index(element, node, var, j) {
                                initial[i] = series.eval(self.node_time(element, node).eval(&times)) / v.nominal;
                            }
                        }
                    }
                    if var == VarType::X {
                        if let Some(offset) = self.index.explicit_entry_state(element) {
                            initial[offset + j] =
                                series.eval(self.node_time(element, 0).eval(&times)) / v.nominal;
                        }
                    }
                }
            }
        }
        self.bounds.initial = initial;
        self.apply_pinned();
        debug!("initial guess updated from trajectory source");
    }
}

fn series_of(source: &dyn TrajectorySource, var: &Variable) -> Option<LinearInterpolation> {
    let (time, values) = match source.variable_data(&var.name) {
        Ok(data) => data,
        Err(err) => {
            warn!(variable = %var.name, error = %err, "not initialized from trajectory source");
            return None;
        }
    };
    match LinearInterpolation::new(time, values) {
        Ok(series) => Some(series),
        Err(err) => {
            warn!(variable = %var.name, error = %err, "unusable trajectory in source");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::TranscriptionOptions;
    use dopt_core::{DescriptionBuilder, FnFunction, Model, TimeHorizon};
    use std::sync::Arc;

    fn model() -> Model {
        let description = DescriptionBuilder::new()
            .state(Variable::new("x").with_bounds(-2.0, 4.0).with_nominal(2.0).with_start(1.0))
            .control(Variable::new("u"))
            .free_parameter(Variable::new("k").with_start(3.0).with_nominal(-1.0).with_bounds(0.0, 5.0))
            .build()
            .unwrap();
        let dae = FnFunction::new(5, 1, |z, out| out[0] = z[1] - z[0] * z[2] - z[3]);
        Model::new(description, TimeHorizon::fixed(0.0, 1.0), dae)
    }

    fn transcription() -> Transcription {
        Transcription::new(
            Arc::new(model()),
            TranscriptionOptions {
                n_e: 2,
                n_cp: 2,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_unbounded_defaults() {
        let t = transcription();
        let r = t.index().range(0, 1, VarType::U).unwrap();
        for i in r {
            assert_eq!(t.bounds().lower[i], f64::NEG_INFINITY);
            assert_eq!(t.bounds().upper[i], f64::INFINITY);
            assert_eq!(t.bounds().initial[i], 0.0);
        }
    }

    #[test]
    fn test_scaled_and_swapped_bounds() {
        let t = transcription();
        let x = t.index().index(1, 2, VarType::X, 0).unwrap();
        assert_eq!(t.bounds().lower[x], -1.0);
        assert_eq!(t.bounds().upper[x], 2.0);
        assert_eq!(t.bounds().initial[x], 0.5);
        // negative nominal swaps the bounds
        let k = t.index().p_opt(0);
        assert_eq!(t.bounds().lower[k], -5.0);
        assert_eq!(t.bounds().upper[k], 0.0);
        assert_eq!(t.bounds().initial[k], -3.0);
    }

    #[test]
    fn test_pinned_parameter() {
        let mut t = transcription();
        let k = t.description().resolve("k").unwrap();
        t.pin_parameter(k, 2.0).unwrap();
        let i = t.index().p_opt(0);
        assert_eq!(t.bounds().lower[i], -2.0);
        assert_eq!(t.bounds().upper[i], -2.0);
        // pinning survives a rebuild
        t.compute_bounds_and_initial_guess();
        assert_eq!(t.bounds().initial[i], -2.0);
        let x = t.description().resolve("x").unwrap();
        assert!(t.pin_parameter(x, 1.0).is_err());
    }

    #[test]
    fn test_initialize_from_trajectories_interpolates() {
        let mut t = transcription();
        let trajectories = Trajectories {
            time: vec![0.0, 1.0],
            dx: vec![vec![0.0], vec![0.0]],
            x: vec![vec![0.0], vec![2.0]],
            u: vec![vec![1.0], vec![1.0]],
            w: vec![vec![], vec![]],
            p_opt: vec![4.0],
        };
        t.initialize_from_trajectories(&trajectories);
        // Radau node (0, 2) sits at t = 0.5
        let x = t.index().index(0, 2, VarType::X, 0).unwrap();
        assert!((t.bounds().initial[x] - 1.0 / 2.0).abs() < 1e-12);
        assert_eq!(t.bounds().initial[t.index().p_opt(0)], -4.0);
    }
}
