//! Model evaluator: the collaborator that supplies DAE, cost and boundary
//! functions together with the typed time horizon.
//!
//! # Input layouts
//!
//! ```text
//! DAE / initial / Mayer / Lagrange / path:   z = [p_opt | dx | x | u | w | t]
//! boundary equality / inequality:            z = [p_opt | x(t0) | t0 | x(tf) | tf]
//! ```

use crate::error::{DoptError, DoptResult};
use crate::function::ModelFunction;
use crate::model::ModelDescription;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Offsets into the flat `[p_opt, dx, x, u, w, t]` input vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaeLayout {
    pub n_p: usize,
    pub n_x: usize,
    pub n_u: usize,
    pub n_w: usize,
}

impl DaeLayout {
    pub fn from_description(description: &ModelDescription) -> Self {
        Self {
            n_p: description.n_p(),
            n_x: description.n_x(),
            n_u: description.n_u(),
            n_w: description.n_w(),
        }
    }

    pub fn p(&self) -> usize {
        0
    }
    pub fn dx(&self) -> usize {
        self.n_p
    }
    pub fn x(&self) -> usize {
        self.n_p + self.n_x
    }
    pub fn u(&self) -> usize {
        self.n_p + 2 * self.n_x
    }
    pub fn w(&self) -> usize {
        self.n_p + 2 * self.n_x + self.n_u
    }
    pub fn t(&self) -> usize {
        self.n_p + 2 * self.n_x + self.n_u + self.n_w
    }
    pub fn len(&self) -> usize {
        self.t() + 1
    }
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Length of the boundary-function input `[p, x(t0), t0, x(tf), tf]`.
    pub fn boundary_len(&self) -> usize {
        self.n_p + 2 * self.n_x + 2
    }
}

/// Start or end of the optimization horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBound {
    Fixed(f64),
    Free {
        initial_guess: f64,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl TimeBound {
    /// The fixed value, or the initial guess of a free bound.
    pub fn nominal_value(&self) -> f64 {
        match *self {
            TimeBound::Fixed(t) => t,
            TimeBound::Free { initial_guess, .. } => initial_guess,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, TimeBound::Free { .. })
    }

    fn shifted(self, dt: f64) -> Self {
        match self {
            TimeBound::Fixed(t) => TimeBound::Fixed(t + dt),
            TimeBound::Free {
                initial_guess,
                min,
                max,
            } => TimeBound::Free {
                initial_guess: initial_guess + dt,
                min: min.map(|m| m + dt),
                max: max.map(|m| m + dt),
            },
        }
    }
}

/// Optimization horizon with explicitly typed free start/final times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeHorizon {
    pub start: TimeBound,
    pub end: TimeBound,
}

impl TimeHorizon {
    pub fn fixed(t0: f64, tf: f64) -> Self {
        Self {
            start: TimeBound::Fixed(t0),
            end: TimeBound::Fixed(tf),
        }
    }

    pub fn t0(&self) -> f64 {
        self.start.nominal_value()
    }

    pub fn tf(&self) -> f64 {
        self.end.nominal_value()
    }

    pub fn length(&self) -> f64 {
        self.tf() - self.t0()
    }

    /// Move both ends by `dt` (free bounds move their guess and limits).
    pub fn shift(&mut self, dt: f64) {
        self.start = self.start.shifted(dt);
        self.end = self.end.shifted(dt);
    }

    pub fn validate(&self) -> DoptResult<()> {
        if !(self.length() > 0.0) {
            return Err(DoptError::config(format!(
                "time horizon [{}, {}] is empty",
                self.t0(),
                self.tf()
            )));
        }
        Ok(())
    }
}

/// Supplies everything the transcription needs to know about a model.
pub trait ModelEvaluator: Send + Sync {
    fn description(&self) -> &ModelDescription;

    fn horizon(&self) -> TimeHorizon;

    /// DAE residual `F(z) = 0`, `n_out = n_x + n_w`.
    fn dae(&self) -> &dyn ModelFunction;

    /// Initial-condition residual `F0(z) = 0` at the first node.
    fn initial(&self) -> Option<&dyn ModelFunction> {
        None
    }

    /// Scalar endpoint cost, evaluated at the last node.
    fn mayer(&self) -> Option<&dyn ModelFunction> {
        None
    }

    /// Scalar cost integrand.
    fn lagrange(&self) -> Option<&dyn ModelFunction> {
        None
    }

    fn boundary_equality(&self) -> Option<&dyn ModelFunction> {
        None
    }

    /// `h(z) <= 0` on the boundary layout.
    fn boundary_inequality(&self) -> Option<&dyn ModelFunction> {
        None
    }

    /// `h(z) <= 0` at every collocation node.
    fn path_inequality(&self) -> Option<&dyn ModelFunction> {
        None
    }

    fn layout(&self) -> DaeLayout {
        DaeLayout::from_description(self.description())
    }
}

/// Concrete [`ModelEvaluator`] assembled from closures or AD-backed functions.
#[derive(Clone)]
pub struct Model {
    description: ModelDescription,
    horizon: TimeHorizon,
    dae: Arc<dyn ModelFunction>,
    initial: Option<Arc<dyn ModelFunction>>,
    mayer: Option<Arc<dyn ModelFunction>>,
    lagrange: Option<Arc<dyn ModelFunction>>,
    boundary_eq: Option<Arc<dyn ModelFunction>>,
    boundary_ineq: Option<Arc<dyn ModelFunction>>,
    path_ineq: Option<Arc<dyn ModelFunction>>,
}

impl Model {
    pub fn new(
        description: ModelDescription,
        horizon: TimeHorizon,
        dae: impl ModelFunction + 'static,
    ) -> Self {
        Self {
            description,
            horizon,
            dae: Arc::new(dae),
            initial: None,
            mayer: None,
            lagrange: None,
            boundary_eq: None,
            boundary_ineq: None,
            path_ineq: None,
        }
    }

    pub fn with_initial(mut self, f: impl ModelFunction + 'static) -> Self {
        self.initial = Some(Arc::new(f));
        self
    }

    pub fn with_mayer(mut self, f: impl ModelFunction + 'static) -> Self {
        self.mayer = Some(Arc::new(f));
        self
    }

    pub fn with_lagrange(mut self, f: impl ModelFunction + 'static) -> Self {
        self.lagrange = Some(Arc::new(f));
        self
    }

    pub fn with_boundary_equality(mut self, f: impl ModelFunction + 'static) -> Self {
        self.boundary_eq = Some(Arc::new(f));
        self
    }

    pub fn with_boundary_inequality(mut self, f: impl ModelFunction + 'static) -> Self {
        self.boundary_ineq = Some(Arc::new(f));
        self
    }

    pub fn with_path_inequality(mut self, f: impl ModelFunction + 'static) -> Self {
        self.path_ineq = Some(Arc::new(f));
        self
    }

    pub fn with_horizon(mut self, horizon: TimeHorizon) -> Self {
        self.horizon = horizon;
        self
    }

    /// Check function dimensions against the description.
    pub fn validate(&self) -> DoptResult<()> {
        validate_evaluator(self)
    }
}

impl ModelEvaluator for Model {
    fn description(&self) -> &ModelDescription {
        &self.description
    }
    fn horizon(&self) -> TimeHorizon {
        self.horizon
    }
    fn dae(&self) -> &dyn ModelFunction {
        self.dae.as_ref()
    }
    fn initial(&self) -> Option<&dyn ModelFunction> {
        self.initial.as_deref()
    }
    fn mayer(&self) -> Option<&dyn ModelFunction> {
        self.mayer.as_deref()
    }
    fn lagrange(&self) -> Option<&dyn ModelFunction> {
        self.lagrange.as_deref()
    }
    fn boundary_equality(&self) -> Option<&dyn ModelFunction> {
        self.boundary_eq.as_deref()
    }
    fn boundary_inequality(&self) -> Option<&dyn ModelFunction> {
        self.boundary_ineq.as_deref()
    }
    fn path_inequality(&self) -> Option<&dyn ModelFunction> {
        self.path_ineq.as_deref()
    }
}

/// Dimension checks shared by every evaluator.
pub fn validate_evaluator(model: &dyn ModelEvaluator) -> DoptResult<()> {
    let layout = model.layout();
    let check = |label: &str, f: &dyn ModelFunction, n_in: usize, n_out: Option<usize>| {
        if f.n_in() != n_in {
            return Err(DoptError::config(format!(
                "{label} function takes {} inputs, expected {n_in}",
                f.n_in()
            )));
        }
        if let Some(n_out) = n_out {
            if f.n_out() != n_out {
                return Err(DoptError::config(format!(
                    "{label} function returns {} outputs, expected {n_out}",
                    f.n_out()
                )));
            }
        }
        Ok(())
    };

    check("DAE", model.dae(), layout.len(), Some(layout.n_x + layout.n_w))?;
    if let Some(f) = model.initial() {
        check("initial", f, layout.len(), None)?;
    }
    if let Some(f) = model.mayer() {
        check("Mayer", f, layout.len(), Some(1))?;
    }
    if let Some(f) = model.lagrange() {
        check("Lagrange", f, layout.len(), Some(1))?;
    }
    if let Some(f) = model.path_inequality() {
        check("path", f, layout.len(), None)?;
    }
    if let Some(f) = model.boundary_equality() {
        check("boundary equality", f, layout.boundary_len(), None)?;
    }
    if let Some(f) = model.boundary_inequality() {
        check("boundary inequality", f, layout.boundary_len(), None)?;
    }
    model.horizon().validate()
}
