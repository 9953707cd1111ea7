//! # Collocation Transcription
//!
//! Turns a [`ModelEvaluator`] into a finite-dimensional NLP:
//!
//! ```text
//! min   f(x)                      Mayer + quadrature of Lagrange, or measurement fit
//! s.t.  g(x) = 0                  initial, DAE, collocation, Gauss end, continuity, boundary
//!       h(x) <= 0                 boundary, path, phase ordering
//!       lower <= x <= upper
//! ```
//!
//! Construction fixes the layout ([`VariableIndexMap`]) once. Assembly
//! produces residual blocks with exact derivatives ([`expr`]), which the
//! [`jacobian`] and [`hessian`] modules turn into sparse triplets.
//! [`Transcription::set_time_horizon`] re-assembles against a moved horizon
//! without touching the layout, which is what the receding-horizon loop uses.

pub mod bounds;
mod constraints;
pub mod cost;
pub mod expr;
pub mod hessian;
pub mod indexer;
pub mod jacobian;
pub mod mesh;
pub mod result;

use crate::collocation::{CollocationBasis, Scheme};
use dopt_core::{
    validate_evaluator, DaeLayout, DoptError, DoptResult, ModelDescription, ModelEvaluator,
    ModelFunction, TimeBound, TimeHorizon, VarKind, VarRef,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub use bounds::BoundsAndGuess;
pub use cost::{MeasurementDeviation, ParameterEstimation};
pub use expr::{Affine, FunctionRef, ModelTerm, QuadraticRow};
pub use hessian::HessianPattern;
pub use indexer::{Block, LayoutSummary, RangeRecord, VarType, VariableIndexMap};
pub use mesh::Mesh;
pub use result::ResultMode;

/// How element boundaries share states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateContinuity {
    /// Entry state of element `i+1` is the exit state of element `i`.
    #[default]
    Implicit,
    /// Separate entry-state variables tied by continuity equations.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HessianMode {
    #[default]
    Exact,
    /// No Hessian is provided; the solver approximates curvature itself.
    Approximate,
}

/// State jump at an element boundary: `x_entry(element) = x_exit(element-1) + parameter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseLink {
    pub element: usize,
    pub state: String,
    pub parameter: String,
}

/// Typed transcription options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionOptions {
    pub scheme: Scheme,
    /// Number of mesh elements.
    pub n_e: usize,
    /// Collocation points per element.
    pub n_cp: usize,
    /// Relative element lengths; uniform when absent.
    pub element_lengths: Option<Vec<f64>>,
    /// Elements per control group.
    pub blocking_factors: Option<Vec<usize>>,
    pub state_continuity: StateContinuity,
    /// Element boundary times become decision variables.
    pub free_phases: bool,
    /// Parameters holding the interior boundary times, one per boundary.
    pub phase_parameters: Vec<String>,
    pub links: Vec<PhaseLink>,
    pub hessian: HessianMode,
    pub result_mode: ResultMode,
    #[serde(skip)]
    pub parameter_estimation: Option<ParameterEstimation>,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            scheme: Scheme::Radau,
            n_e: 50,
            n_cp: 3,
            element_lengths: None,
            blocking_factors: None,
            state_continuity: StateContinuity::Implicit,
            free_phases: false,
            phase_parameters: Vec::new(),
            links: Vec::new(),
            hessian: HessianMode::Exact,
            result_mode: ResultMode::CollocationPoints,
            parameter_estimation: None,
        }
    }
}

/// Where the time of one element boundary comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BoundaryTime {
    Start,
    End,
    /// Fixed fraction of the horizon.
    Fraction(f64),
    /// Free parameter at `p_opt` position `index`.
    Parameter { index: usize, nominal: f64 },
    Constant(f64),
    /// Free phase-boundary scalar in the decision vector.
    Variable(usize),
}

#[derive(Debug, Clone)]
struct ResolvedLink {
    element: usize,
    state: usize,
    jump: Affine,
}

/// Per-class scale factors.
#[derive(Debug, Clone, Default)]
pub(crate) struct Nominals {
    pub p: Vec<f64>,
    pub dx: Vec<f64>,
    pub x: Vec<f64>,
    pub u: Vec<f64>,
    pub w: Vec<f64>,
}

impl Nominals {
    fn from_description(description: &ModelDescription) -> Self {
        Self {
            p: description.nominals(VarKind::Parameter),
            dx: description.nominals(VarKind::Derivative),
            x: description.nominals(VarKind::State),
            u: description.nominals(VarKind::Control),
            w: description.nominals(VarKind::Algebraic),
        }
    }

    pub fn of(&self, var: VarType) -> &[f64] {
        match var {
            VarType::Dx => &self.dx,
            VarType::X => &self.x,
            VarType::U => &self.u,
            VarType::W => &self.w,
        }
    }
}

/// One block of consecutive constraint rows.
#[derive(Debug, Clone)]
pub(crate) enum Residual {
    Model { term: ModelTerm, rows: usize },
    Quadratic(QuadraticRow),
}

impl Residual {
    pub fn rows(&self) -> usize {
        match self {
            Residual::Model { rows, .. } => *rows,
            Residual::Quadratic(_) => 1,
        }
    }
}

/// A transcribed dynamic optimization problem.
pub struct Transcription {
    model: Arc<dyn ModelEvaluator>,
    options: TranscriptionOptions,
    horizon: TimeHorizon,
    layout: DaeLayout,
    basis: CollocationBasis,
    mesh: Mesh,
    index: VariableIndexMap,
    nominals: Nominals,
    boundary_sources: Vec<BoundaryTime>,
    boundary_times: Vec<Affine>,
    links: Vec<ResolvedLink>,
    pinned: BTreeMap<usize, f64>,
    pub(crate) equalities: Vec<Residual>,
    pub(crate) inequalities: Vec<Residual>,
    pub(crate) cost_terms: Vec<ModelTerm>,
    pub(crate) deviations: Vec<MeasurementDeviation>,
    n_equalities: usize,
    n_inequalities: usize,
    jacobian_pattern: (Vec<usize>, Vec<usize>),
    hessian_pattern: Option<HessianPattern>,
    bounds: BoundsAndGuess,
}

impl std::fmt::Debug for Transcription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcription")
            .field("scheme", &self.basis.scheme())
            .field("n_e", &self.mesh.n_e())
            .field("n_cp", &self.basis.n_cp())
            .field("n_xx", &self.index.n_xx())
            .field("n_equalities", &self.n_equalities)
            .field("n_inequalities", &self.n_inequalities)
            .finish()
    }
}

impl Transcription {
    pub fn new(model: Arc<dyn ModelEvaluator>, mut options: TranscriptionOptions) -> DoptResult<Self> {
        validate_evaluator(model.as_ref())?;
        let horizon = model.horizon();
        horizon.validate()?;
        let description = model.description();
        let layout = model.layout();

        if !options.links.is_empty() && options.state_continuity == StateContinuity::Implicit {
            debug!("phase links given, switching to explicit state continuity");
            options.state_continuity = StateContinuity::Explicit;
        }

        let basis = CollocationBasis::new(options.scheme, options.n_cp)?;
        let mesh = Mesh::new(
            options.n_e,
            options.element_lengths.as_deref(),
            options.free_phases,
        )?;

        let n_e = options.n_e;
        let mut boundary_sources = Vec::with_capacity(n_e + 1);
        boundary_sources.push(BoundaryTime::Start);
        let phase_variables = options.free_phases && options.phase_parameters.is_empty();
        if options.free_phases && !options.phase_parameters.is_empty() {
            if options.phase_parameters.len() != n_e - 1 {
                return Err(DoptError::config(format!(
                    "{} phase parameters given for {} interior element boundaries",
                    options.phase_parameters.len(),
                    n_e - 1
                )));
            }
            for name in &options.phase_parameters {
                boundary_sources.push(resolve_parameter_time(description, name)?);
            }
        } else {
            for i in 1..n_e {
                boundary_sources.push(BoundaryTime::Fraction(mesh.boundary(i)));
            }
        }
        boundary_sources.push(BoundaryTime::End);

        let index = VariableIndexMap::build(&indexer::IndexerInput {
            n_x: layout.n_x,
            n_u: layout.n_u,
            n_w: layout.n_w,
            n_p: layout.n_p,
            n_e,
            basis: &basis,
            blocking_factors: options.blocking_factors.as_deref(),
            explicit_continuity: options.state_continuity == StateContinuity::Explicit,
            free_start: horizon.start.is_free(),
            free_final: horizon.end.is_free(),
            free_phase_boundaries: phase_variables,
        })?;
        if phase_variables {
            for (i, source) in boundary_sources.iter_mut().enumerate().take(n_e).skip(1) {
                let offset = index.phase_boundary(i).ok_or(DoptError::AssemblyInvariant {
                    expected: i,
                    actual: 0,
                })?;
                *source = BoundaryTime::Variable(offset);
            }
        }

        let links = options
            .links
            .iter()
            .map(|link| resolve_link(description, link, n_e))
            .collect::<DoptResult<Vec<_>>>()?;

        let nominals = Nominals::from_description(description);
        let mut transcription = Self {
            model,
            options,
            horizon,
            layout,
            basis,
            mesh,
            index,
            nominals,
            boundary_sources,
            boundary_times: Vec::new(),
            links,
            pinned: BTreeMap::new(),
            equalities: Vec::new(),
            inequalities: Vec::new(),
            cost_terms: Vec::new(),
            deviations: Vec::new(),
            n_equalities: 0,
            n_inequalities: 0,
            jacobian_pattern: (Vec::new(), Vec::new()),
            hessian_pattern: None,
            bounds: BoundsAndGuess::default(),
        };
        transcription.assemble()?;
        transcription.compute_bounds_and_initial_guess();

        info!(
            scheme = %transcription.basis.scheme(),
            n_e = transcription.mesh.n_e(),
            n_cp = transcription.basis.n_cp(),
            n_xx = transcription.index.n_xx(),
            n_eq = transcription.n_equalities,
            n_ineq = transcription.n_inequalities,
            "transcription built"
        );
        Ok(transcription)
    }

    /// Build residuals, cost and derivative patterns for the current horizon.
    fn assemble(&mut self) -> DoptResult<()> {
        self.boundary_times = (0..=self.mesh.n_e())
            .map(|i| self.boundary_expression(i))
            .collect();

        let (cost_terms, deviations) = self.build_cost()?;
        self.cost_terms = cost_terms;
        self.deviations = deviations;
        self.equalities = self.build_equalities()?;
        self.inequalities = self.build_inequalities()?;
        self.n_equalities = self.equalities.iter().map(Residual::rows).sum();
        self.n_inequalities = self.inequalities.iter().map(Residual::rows).sum();

        self.jacobian_pattern = jacobian::sparsity(self);
        self.hessian_pattern = match self.options.hessian {
            HessianMode::Exact => Some(HessianPattern::build(self)),
            HessianMode::Approximate => None,
        };
        Ok(())
    }

    /// Move the horizon and re-assemble. The free/fixed kind of each end
    /// must stay the same, since it determines the layout.
    pub fn set_time_horizon(&mut self, horizon: TimeHorizon) -> DoptResult<()> {
        if horizon.start.is_free() != self.horizon.start.is_free()
            || horizon.end.is_free() != self.horizon.end.is_free()
        {
            return Err(DoptError::config(
                "changing a horizon end between free and fixed requires a new transcription",
            ));
        }
        horizon.validate()?;
        self.horizon = horizon;
        self.assemble()?;
        self.compute_bounds_and_initial_guess();
        debug!(t0 = horizon.t0(), tf = horizon.tf(), "time horizon updated");
        Ok(())
    }

    /// Shift both horizon ends by `dt`.
    pub fn shift_time(&mut self, dt: f64) -> DoptResult<()> {
        let mut horizon = self.horizon;
        horizon.shift(dt);
        self.set_time_horizon(horizon)
    }

    /// Fix a free parameter to a physical value through its bounds.
    pub fn pin_parameter(&mut self, parameter: VarRef, value: f64) -> DoptResult<()> {
        let position = self.parameter_position(parameter)?;
        self.pinned.insert(position, value);
        self.apply_pinned();
        Ok(())
    }

    pub fn unpin_parameter(&mut self, parameter: VarRef) -> DoptResult<()> {
        let position = self.parameter_position(parameter)?;
        self.pinned.remove(&position);
        self.compute_bounds_and_initial_guess();
        Ok(())
    }

    /// Pinned physical value of a parameter, if any.
    pub fn pinned_value(&self, parameter: VarRef) -> Option<f64> {
        let position = self.parameter_position(parameter).ok()?;
        self.pinned.get(&position).copied()
    }

    fn parameter_position(&self, parameter: VarRef) -> DoptResult<usize> {
        match self.description().position(parameter) {
            Some((VarKind::Parameter, position)) => Ok(position),
            _ => Err(DoptError::config(format!(
                "{parameter} is not a free parameter of the model"
            ))),
        }
    }

    pub fn model(&self) -> &Arc<dyn ModelEvaluator> {
        &self.model
    }

    pub fn description(&self) -> &ModelDescription {
        self.model.description()
    }

    pub fn options(&self) -> &TranscriptionOptions {
        &self.options
    }

    pub fn horizon(&self) -> TimeHorizon {
        self.horizon
    }

    pub fn layout(&self) -> DaeLayout {
        self.layout
    }

    pub fn basis(&self) -> &CollocationBasis {
        &self.basis
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn index(&self) -> &VariableIndexMap {
        &self.index
    }

    pub fn n_xx(&self) -> usize {
        self.index.n_xx()
    }

    pub fn n_equalities(&self) -> usize {
        self.n_equalities
    }

    pub fn n_inequalities(&self) -> usize {
        self.n_inequalities
    }

    pub fn has_exact_hessian(&self) -> bool {
        self.hessian_pattern.is_some()
    }

    pub(crate) fn nominals(&self) -> &Nominals {
        &self.nominals
    }

    pub(crate) fn jacobian_pattern(&self) -> &(Vec<usize>, Vec<usize>) {
        &self.jacobian_pattern
    }

    pub(crate) fn hessian_pattern(&self) -> Option<&HessianPattern> {
        self.hessian_pattern.as_ref()
    }

    /// The model function a term refers to.
    pub(crate) fn function(&self, function: FunctionRef) -> Option<&dyn ModelFunction> {
        match function {
            FunctionRef::Dae => Some(self.model.dae()),
            FunctionRef::Initial => self.model.initial(),
            FunctionRef::Mayer => self.model.mayer(),
            FunctionRef::Lagrange => self.model.lagrange(),
            FunctionRef::BoundaryEquality => self.model.boundary_equality(),
            FunctionRef::BoundaryInequality => self.model.boundary_inequality(),
            FunctionRef::Path => self.model.path_inequality(),
            FunctionRef::Measurement(i) => self
                .deviations
                .get(i)
                .map(|d| d as &dyn ModelFunction),
        }
    }

    fn horizon_end(&self, bound: TimeBound, offset: Option<usize>) -> Affine {
        match (bound, offset) {
            (TimeBound::Free { .. }, Some(idx)) => Affine::var(idx, 1.0),
            _ => Affine::constant(bound.nominal_value()),
        }
    }

    fn boundary_expression(&self, i: usize) -> Affine {
        let t0 = self.horizon_end(self.horizon.start, self.index.start_time());
        let tf = self.horizon_end(self.horizon.end, self.index.final_time());
        match self.boundary_sources[i] {
            BoundaryTime::Start => t0,
            BoundaryTime::End => tf,
            BoundaryTime::Fraction(c) => t0.scale(1.0 - c).axpy(c, &tf),
            BoundaryTime::Parameter { index, nominal } => {
                Affine::var(self.index.p_opt(index), nominal)
            }
            BoundaryTime::Constant(value) => Affine::constant(value),
            BoundaryTime::Variable(idx) => Affine::var(idx, 1.0),
        }
    }

    /// Time of element boundary `i` as an affine expression.
    pub fn boundary_time(&self, i: usize) -> &Affine {
        &self.boundary_times[i]
    }

    /// Physical length of an element.
    pub fn element_length(&self, element: usize) -> Affine {
        self.boundary_times[element + 1].axpy(-1.0, &self.boundary_times[element])
    }

    /// Time of `(element, node)`.
    pub fn node_time(&self, element: usize, node: usize) -> Affine {
        let c = (self.basis.tau(node) + 1.0) / 2.0;
        self.boundary_times[element]
            .scale(1.0 - c)
            .axpy(c, &self.boundary_times[element + 1])
    }

    /// Whether all node times are independent of the decision vector.
    pub fn has_fixed_time_grid(&self) -> bool {
        self.boundary_times.iter().all(Affine::is_constant)
    }

    /// Affine expression of component `j` of `var` at `(element, node)` in
    /// physical units.
    pub(crate) fn node_value(
        &self,
        element: usize,
        node: usize,
        var: VarType,
        j: usize,
    ) -> DoptResult<Affine> {
        let nominal = self.nominals.of(var)[j];
        if let Some(idx) = self.index.index(element, node, var, j) {
            return Ok(Affine::var(idx, nominal));
        }
        // Gauss exit: extrapolate the collocated values to τ = 1.
        if self.basis.scheme() == Scheme::Gauss && node == self.basis.exit_node() {
            let weights = self.basis.collocation_basis().eval(1.0);
            let mut out = Affine::default();
            for (slot, node) in self.basis.collocation_nodes().enumerate() {
                let idx = self
                    .index
                    .index(element, node, var, j)
                    .ok_or_else(|| self.missing(element, node))?;
                out = out.axpy(weights[slot], &Affine::var(idx, nominal));
            }
            return Ok(out);
        }
        Err(self.missing(element, node))
    }

    fn missing(&self, element: usize, node: usize) -> DoptError {
        DoptError::AssemblyInvariant {
            expected: element * (self.basis.n_cp() + 2) + node,
            actual: self.index.n_xx(),
        }
    }

    pub(crate) fn parameter_inputs(&self) -> Vec<Affine> {
        (0..self.layout.n_p)
            .map(|i| Affine::var(self.index.p_opt(i), self.nominals.p[i]))
            .collect()
    }

    /// `[p_opt, dx, x, u, w, t]` at `(element, node)`.
    pub(crate) fn node_inputs(&self, element: usize, node: usize) -> DoptResult<Vec<Affine>> {
        let mut inputs = self.parameter_inputs();
        for (var, n) in [
            (VarType::Dx, self.layout.n_x),
            (VarType::X, self.layout.n_x),
            (VarType::U, self.layout.n_u),
            (VarType::W, self.layout.n_w),
        ] {
            for j in 0..n {
                inputs.push(self.node_value(element, node, var, j)?);
            }
        }
        inputs.push(self.node_time(element, node));
        Ok(inputs)
    }

    /// `[p_opt, x(t0), t0, x(tf), tf]`.
    pub(crate) fn boundary_inputs(&self) -> DoptResult<Vec<Affine>> {
        let n_e = self.mesh.n_e();
        let mut inputs = self.parameter_inputs();
        for j in 0..self.layout.n_x {
            inputs.push(self.node_value(0, 0, VarType::X, j)?);
        }
        inputs.push(self.boundary_times[0].clone());
        let exit = self.basis.exit_node();
        for j in 0..self.layout.n_x {
            inputs.push(self.node_value(n_e - 1, exit, VarType::X, j)?);
        }
        inputs.push(self.boundary_times[n_e].clone());
        Ok(inputs)
    }

    /// Node numbers that appear in results and initialization for `element`.
    pub(crate) fn result_nodes(&self, element: usize) -> Vec<usize> {
        let mut nodes = Vec::with_capacity(self.basis.n_cp() + 2);
        if element == 0 && self.basis.scheme().has_entry_node() {
            nodes.push(0);
        }
        nodes.extend(self.basis.collocation_nodes());
        if self.basis.scheme().has_exit_node() {
            nodes.push(self.basis.exit_node());
        }
        nodes
    }
}

fn resolve_parameter_time(description: &ModelDescription, name: &str) -> DoptResult<BoundaryTime> {
    let var = description
        .by_name(name)
        .filter(|v| v.kind == VarKind::Parameter)
        .ok_or_else(|| DoptError::Linking {
            name: name.to_string(),
        })?;
    match description.position(var.var_ref) {
        Some((VarKind::Parameter, index)) => Ok(BoundaryTime::Parameter {
            index,
            nominal: var.nominal,
        }),
        _ => var
            .value
            .map(BoundaryTime::Constant)
            .ok_or_else(|| DoptError::config(format!("phase parameter {name} has no value"))),
    }
}

fn resolve_link(description: &ModelDescription, link: &PhaseLink, n_e: usize) -> DoptResult<ResolvedLink> {
    if link.element == 0 || link.element >= n_e {
        return Err(DoptError::config(format!(
            "link at element {} must lie on an interior boundary (1..{n_e})",
            link.element
        )));
    }
    let state = description
        .by_name(&link.state)
        .and_then(|v| description.position(v.var_ref))
        .and_then(|(kind, idx)| (kind == VarKind::State).then_some(idx))
        .ok_or_else(|| DoptError::Linking {
            name: link.state.clone(),
        })?;
    let jump = match resolve_parameter_time(description, &link.parameter)? {
        BoundaryTime::Parameter { index, nominal } => Affine::var(index, nominal),
        BoundaryTime::Constant(value) => Affine::constant(value),
        _ => Affine::default(),
    };
    Ok(ResolvedLink {
        element: link.element,
        state,
        jump,
    })
}
