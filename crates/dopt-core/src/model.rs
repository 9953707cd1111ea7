//! Model description: typed variable references and per-variable metadata.
//!
//! A [`ModelDescription`] is built once from a [`DescriptionBuilder`]. Value
//! references ([`VarRef`]) are assigned at build time and never change, so
//! name lookups happen once when options are resolved and hot loops work on
//! integer positions only.
//!
//! Value references are assigned class by class:
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────┬────────┬──────────┬────────────┐
//! │ free params  │ fixed params │ derivatives │ states │ controls │ algebraics │
//! └──────────────┴──────────────┴─────────────┴────────┴──────────┴────────────┘
//! ```
//!
//! Aliases share the value reference of their target and are listed after
//! all primary variables.

use crate::error::{DoptError, DoptResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable value reference of a model variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarRef(u32);

impl VarRef {
    #[inline]
    pub fn new(value: u32) -> Self {
        VarRef(value)
    }

    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VarRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role of a variable in the DAE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    Derivative,
    State,
    Control,
    Algebraic,
    Parameter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Variability {
    Constant,
    Parameter,
    Discrete,
    #[default]
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    #[default]
    NoAlias,
    Alias,
    Negated,
}

/// A single model variable.
///
/// `min`, `max` and `start` are in physical units; the transcription divides
/// them by `nominal` before they reach the decision vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub var_ref: VarRef,
    pub kind: VarKind,
    #[serde(default)]
    pub variability: Variability,
    #[serde(default)]
    pub alias: AliasKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub start: Option<f64>,
    /// Scale factor. Decision variables hold `value / nominal`.
    pub nominal: f64,
    /// Parameter value (fixed parameters, or the default of a free one).
    pub value: Option<f64>,
    /// Free parameters are optimized and form `p_opt`.
    #[serde(default)]
    pub free: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            var_ref: VarRef(0),
            kind: VarKind::State,
            variability: Variability::Continuous,
            alias: AliasKind::NoAlias,
            min: None,
            max: None,
            start: None,
            nominal: 1.0,
            value: None,
            free: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_bounds(self, min: f64, max: f64) -> Self {
        self.with_min(min).with_max(max)
    }

    pub fn with_start(mut self, start: f64) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_nominal(mut self, nominal: f64) -> Self {
        self.nominal = nominal;
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn is_alias(&self) -> bool {
        self.alias != AliasKind::NoAlias
    }

    /// Initial guess in physical units: start value, then parameter value.
    pub fn initial_guess(&self) -> Option<f64> {
        self.start.or(self.value)
    }
}

enum Pending {
    Primary(VarKind, bool, Variable),
    Alias {
        name: String,
        target: String,
        negated: bool,
    },
}

/// Incrementally declares the variables of a model.
///
/// ```ignore
/// let description = DescriptionBuilder::new()
///     .state(Variable::new("x1").with_start(0.0))
///     .control(Variable::new("u").with_bounds(-1.0, 1.0))
///     .free_parameter(Variable::new("k").with_start(1.0))
///     .build()?;
/// ```
#[derive(Default)]
pub struct DescriptionBuilder {
    entries: Vec<Pending>,
}

impl DescriptionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a state together with its derivative `der(<name>)`.
    pub fn state(self, state: Variable) -> Self {
        let derivative = Variable::new(format!("der({})", state.name));
        self.state_with_derivative(state, derivative)
    }

    pub fn state_with_derivative(mut self, state: Variable, derivative: Variable) -> Self {
        self.entries
            .push(Pending::Primary(VarKind::Derivative, false, derivative));
        self.entries.push(Pending::Primary(VarKind::State, false, state));
        self
    }

    pub fn control(mut self, control: Variable) -> Self {
        self.entries
            .push(Pending::Primary(VarKind::Control, false, control));
        self
    }

    pub fn algebraic(mut self, algebraic: Variable) -> Self {
        self.entries
            .push(Pending::Primary(VarKind::Algebraic, false, algebraic));
        self
    }

    /// A parameter whose value is fixed and known to the model functions.
    pub fn parameter(mut self, parameter: Variable) -> Self {
        self.entries
            .push(Pending::Primary(VarKind::Parameter, false, parameter));
        self
    }

    /// A parameter that is part of the decision vector (`p_opt`).
    pub fn free_parameter(mut self, parameter: Variable) -> Self {
        self.entries
            .push(Pending::Primary(VarKind::Parameter, true, parameter));
        self
    }

    pub fn alias(mut self, name: impl Into<String>, target: impl Into<String>, negated: bool) -> Self {
        self.entries.push(Pending::Alias {
            name: name.into(),
            target: target.into(),
            negated,
        });
        self
    }

    pub fn build(self) -> DoptResult<ModelDescription> {
        let mut primaries: Vec<(VarKind, bool, Variable)> = Vec::new();
        let mut aliases = Vec::new();
        for entry in self.entries {
            match entry {
                Pending::Primary(kind, free, var) => primaries.push((kind, free, var)),
                Pending::Alias {
                    name,
                    target,
                    negated,
                } => aliases.push((name, target, negated)),
            }
        }

        // Stable class order; declaration order within a class.
        let class_rank = |kind: VarKind, free: bool| match (kind, free) {
            (VarKind::Parameter, true) => 0,
            (VarKind::Parameter, false) => 1,
            (VarKind::Derivative, _) => 2,
            (VarKind::State, _) => 3,
            (VarKind::Control, _) => 4,
            (VarKind::Algebraic, _) => 5,
        };
        primaries.sort_by_key(|(kind, free, _)| class_rank(*kind, *free));

        let mut description = ModelDescription::default();
        for (next_ref, (kind, free, mut var)) in primaries.into_iter().enumerate() {
            if description.by_name.contains_key(&var.name) {
                return Err(DoptError::config(format!(
                    "variable '{}' declared twice",
                    var.name
                )));
            }
            if !(var.nominal.is_finite() && var.nominal != 0.0) {
                return Err(DoptError::config(format!(
                    "variable '{}' has invalid nominal value {}",
                    var.name, var.nominal
                )));
            }
            var.var_ref = VarRef(next_ref as u32);
            var.kind = kind;
            var.free = free;
            var.alias = AliasKind::NoAlias;
            var.variability = match kind {
                VarKind::Parameter => Variability::Parameter,
                _ => Variability::Continuous,
            };

            let slot = description.variables.len();
            let position = match (kind, free) {
                (VarKind::Derivative, _) => push_index(&mut description.derivatives, slot),
                (VarKind::State, _) => push_index(&mut description.states, slot),
                (VarKind::Control, _) => push_index(&mut description.controls, slot),
                (VarKind::Algebraic, _) => push_index(&mut description.algebraics, slot),
                (VarKind::Parameter, true) => push_index(&mut description.free_parameters, slot),
                (VarKind::Parameter, false) => push_index(&mut description.fixed_parameters, slot),
            };
            description.positions.insert(var.var_ref, position);
            description.by_name.insert(var.name.clone(), slot);
            description.variables.push(var);
        }

        if description.derivatives.len() != description.states.len() {
            return Err(DoptError::config(format!(
                "{} derivatives declared for {} states",
                description.derivatives.len(),
                description.states.len()
            )));
        }

        for (name, target, negated) in aliases {
            let Some(&target_slot) = description.by_name.get(&target) else {
                return Err(DoptError::config(format!(
                    "alias '{name}' refers to unknown variable '{target}'"
                )));
            };
            if description.by_name.contains_key(&name) {
                return Err(DoptError::config(format!("variable '{name}' declared twice")));
            }
            let mut var = description.variables[target_slot].clone();
            var.name = name.clone();
            var.alias = if negated {
                AliasKind::Negated
            } else {
                AliasKind::Alias
            };
            let slot = description.variables.len();
            description.by_name.insert(name, slot);
            description.variables.push(var);
        }

        Ok(description)
    }
}

fn push_index(list: &mut Vec<usize>, slot: usize) -> usize {
    list.push(slot);
    list.len() - 1
}

/// Immutable description of all model variables.
#[derive(Debug, Clone, Default)]
pub struct ModelDescription {
    variables: Vec<Variable>,
    by_name: HashMap<String, usize>,
    positions: HashMap<VarRef, usize>,
    derivatives: Vec<usize>,
    states: Vec<usize>,
    controls: Vec<usize>,
    algebraics: Vec<usize>,
    free_parameters: Vec<usize>,
    fixed_parameters: Vec<usize>,
}

impl ModelDescription {
    pub fn n_x(&self) -> usize {
        self.states.len()
    }

    pub fn n_u(&self) -> usize {
        self.controls.len()
    }

    pub fn n_w(&self) -> usize {
        self.algebraics.len()
    }

    /// Number of optimized parameters.
    pub fn n_p(&self) -> usize {
        self.free_parameters.len()
    }

    /// All variables in value-reference order, aliases last.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn by_name(&self, name: &str) -> Option<&Variable> {
        self.by_name.get(name).map(|&slot| &self.variables[slot])
    }

    /// Resolve a name to its value reference.
    pub fn resolve(&self, name: &str) -> DoptResult<VarRef> {
        self.by_name(name)
            .map(|v| v.var_ref)
            .ok_or_else(|| DoptError::not_found(name))
    }

    /// The primary (non-alias) variable behind a value reference.
    pub fn variable(&self, var_ref: VarRef) -> Option<&Variable> {
        self.variables
            .get(var_ref.0 as usize)
            .filter(|v| v.var_ref == var_ref && !v.is_alias())
    }

    /// Position of a variable inside its class.
    ///
    /// Parameters report their `p_opt` position and only when free.
    pub fn position(&self, var_ref: VarRef) -> Option<(VarKind, usize)> {
        let var = self.variable(var_ref)?;
        let position = *self.positions.get(&var_ref)?;
        match var.kind {
            VarKind::Parameter if !var.free => None,
            kind => Some((kind, position)),
        }
    }

    pub fn class(&self, kind: VarKind) -> impl Iterator<Item = &Variable> + '_ {
        let slots: &[usize] = match kind {
            VarKind::Derivative => &self.derivatives,
            VarKind::State => &self.states,
            VarKind::Control => &self.controls,
            VarKind::Algebraic => &self.algebraics,
            VarKind::Parameter => &self.free_parameters,
        };
        slots.iter().map(move |&slot| &self.variables[slot])
    }

    pub fn fixed_parameters(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.fixed_parameters
            .iter()
            .map(move |&slot| &self.variables[slot])
    }

    pub fn class_len(&self, kind: VarKind) -> usize {
        match kind {
            VarKind::Derivative | VarKind::State => self.n_x(),
            VarKind::Control => self.n_u(),
            VarKind::Algebraic => self.n_w(),
            VarKind::Parameter => self.n_p(),
        }
    }

    /// Scale factors of a class, in class order.
    pub fn nominals(&self, kind: VarKind) -> Vec<f64> {
        self.class(kind).map(|v| v.nominal).collect()
    }

    pub fn names(&self, kind: VarKind) -> Vec<String> {
        self.class(kind).map(|v| v.name.clone()).collect()
    }
}
