//! Trajectory containers, piecewise-linear interpolation and measurement tables.

use crate::error::{DoptError, DoptResult};
use crate::model::{ModelDescription, VarKind};
use serde::{Deserialize, Serialize};

/// Per-variable-type trajectories on a common time grid.
///
/// Each of `dx`, `x`, `u`, `w` holds one row per time point, columns in
/// model class order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectories {
    pub time: Vec<f64>,
    pub dx: Vec<Vec<f64>>,
    pub x: Vec<Vec<f64>>,
    pub u: Vec<Vec<f64>>,
    pub w: Vec<Vec<f64>>,
    pub p_opt: Vec<f64>,
}

impl Trajectories {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn rows(&self, kind: VarKind) -> Option<&Vec<Vec<f64>>> {
        match kind {
            VarKind::Derivative => Some(&self.dx),
            VarKind::State => Some(&self.x),
            VarKind::Control => Some(&self.u),
            VarKind::Algebraic => Some(&self.w),
            VarKind::Parameter => None,
        }
    }

    fn rows_mut(&mut self, kind: VarKind) -> Option<&mut Vec<Vec<f64>>> {
        match kind {
            VarKind::Derivative => Some(&mut self.dx),
            VarKind::State => Some(&mut self.x),
            VarKind::Control => Some(&mut self.u),
            VarKind::Algebraic => Some(&mut self.w),
            VarKind::Parameter => None,
        }
    }

    /// Time series of one column of a class.
    pub fn column(&self, kind: VarKind, index: usize) -> Vec<f64> {
        self.rows(kind)
            .map(|rows| rows.iter().map(|row| row[index]).collect())
            .unwrap_or_default()
    }

    /// The first `n` time points.
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.len());
        Self {
            time: self.time[..n].to_vec(),
            dx: self.dx[..n].to_vec(),
            x: self.x[..n].to_vec(),
            u: self.u[..n].to_vec(),
            w: self.w[..n].to_vec(),
            p_opt: self.p_opt.clone(),
        }
    }

    /// Append `other`, dropping its first `skip` points.
    pub fn append(&mut self, other: &Trajectories, skip: usize) {
        let skip = skip.min(other.len());
        self.time.extend_from_slice(&other.time[skip..]);
        self.dx.extend_from_slice(&other.dx[skip..]);
        self.x.extend_from_slice(&other.x[skip..]);
        self.u.extend_from_slice(&other.u[skip..]);
        self.w.extend_from_slice(&other.w[skip..]);
        self.p_opt = other.p_opt.clone();
    }

    /// Physical values from decision-vector values (multiply by nominal).
    pub fn unscaled(&self, description: &ModelDescription) -> Self {
        self.rescaled(description, |v, s| v * s)
    }

    /// Decision-vector values from physical values (divide by nominal).
    pub fn scaled(&self, description: &ModelDescription) -> Self {
        self.rescaled(description, |v, s| v / s)
    }

    fn rescaled(&self, description: &ModelDescription, op: impl Fn(f64, f64) -> f64) -> Self {
        let mut out = self.clone();
        for kind in [
            VarKind::Derivative,
            VarKind::State,
            VarKind::Control,
            VarKind::Algebraic,
        ] {
            let nominals = description.nominals(kind);
            if let Some(rows) = out.rows_mut(kind) {
                for row in rows.iter_mut() {
                    for (v, &s) in row.iter_mut().zip(&nominals) {
                        *v = op(*v, s);
                    }
                }
            }
        }
        let nominals = description.nominals(VarKind::Parameter);
        for (v, &s) in out.p_opt.iter_mut().zip(&nominals) {
            *v = op(*v, s);
        }
        out
    }
}

/// Anything that can produce a named variable's time series.
pub trait TrajectorySource {
    /// `(time, values)` of the named variable, in physical units.
    fn variable_data(&self, name: &str) -> DoptResult<(Vec<f64>, Vec<f64>)>;
}

/// Physical-unit trajectories addressed by model variable names.
pub struct NamedTrajectories<'a> {
    pub description: &'a ModelDescription,
    pub trajectories: &'a Trajectories,
}

impl TrajectorySource for NamedTrajectories<'_> {
    fn variable_data(&self, name: &str) -> DoptResult<(Vec<f64>, Vec<f64>)> {
        let var = self
            .description
            .by_name(name)
            .ok_or_else(|| DoptError::not_found(name))?;
        let sign = if var.alias == crate::model::AliasKind::Negated {
            -1.0
        } else {
            1.0
        };
        let (kind, index) = self
            .description
            .position(var.var_ref)
            .ok_or_else(|| DoptError::not_found(name))?;
        let values = if kind == VarKind::Parameter {
            let p = self
                .trajectories
                .p_opt
                .get(index)
                .copied()
                .ok_or_else(|| DoptError::not_found(name))?;
            vec![p; self.trajectories.len()]
        } else {
            self.trajectories.column(kind, index)
        };
        Ok((
            self.trajectories.time.clone(),
            values.into_iter().map(|v| sign * v).collect(),
        ))
    }
}

/// Piecewise-linear interpolant, held constant outside its domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearInterpolation {
    time: Vec<f64>,
    values: Vec<f64>,
}

impl LinearInterpolation {
    pub fn new(time: Vec<f64>, values: Vec<f64>) -> DoptResult<Self> {
        if time.is_empty() || time.len() != values.len() {
            return Err(DoptError::config(format!(
                "interpolation table needs matching non-empty columns (got {} times, {} values)",
                time.len(),
                values.len()
            )));
        }
        if time.windows(2).any(|w| w[1] < w[0]) {
            return Err(DoptError::config("interpolation time column is not sorted"));
        }
        Ok(Self { time, values })
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.time[0], self.time[self.time.len() - 1])
    }

    pub fn eval(&self, t: f64) -> f64 {
        let n = self.time.len();
        if t <= self.time[0] {
            return self.values[0];
        }
        if t >= self.time[n - 1] {
            return self.values[n - 1];
        }
        // First index with time > t; t lies in [time[i-1], time[i]).
        let i = self.time.partition_point(|&s| s <= t);
        let (t0, t1) = (self.time[i - 1], self.time[i]);
        let (v0, v1) = (self.values[i - 1], self.values[i]);
        if t1 == t0 {
            return v1;
        }
        v0 + (v1 - v0) * (t - t0) / (t1 - t0)
    }
}

/// Measurement table: one interpolant per measured variable.
#[derive(Debug, Clone, Default)]
pub struct MeasurementData {
    names: Vec<String>,
    series: Vec<LinearInterpolation>,
}

impl MeasurementData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, series: LinearInterpolation) {
        let name = name.into();
        if let Some(pos) = self.names.iter().position(|n| *n == name) {
            self.series[pos] = series;
        } else {
            self.names.push(name);
            self.series.push(series);
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> DoptResult<&LinearInterpolation> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|pos| &self.series[pos])
            .ok_or_else(|| DoptError::not_found(name))
    }
}
