//! # Receding-Horizon Control
//!
//! Re-solves a shifted transcription once per sample period and stitches
//! the leading sub-interval of every solution into one trajectory.
//!
//! ```text
//!   new ──► AwaitingSample ──sample()──► Solved ──update_nlp_state()──► AwaitingSample
//!                 │                        │
//!                 └──── terminate() / failed sample ────► Terminated
//! ```
//!
//! Measured states enter the problem as free parameters (typically the
//! right-hand side of the initial-condition residual) whose bounds are
//! pinned to the measured value before each solve.

use crate::nlp::NlpSolver;
use crate::transcription::{ResultMode, Transcription, TranscriptionOptions};
use dopt_core::{DoptError, DoptResult, ModelEvaluator, Trajectories, VarKind, VarRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use web_time::Instant;

/// Relative tolerance on the sample-period cut when counting result points.
const SAMPLE_CUT_TOLERANCE: f64 = 1e-9;

/// Receding-horizon loop options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcOptions {
    /// Time between two samples.
    pub sample_period: f64,
    /// Number of samples a driver runs before stopping.
    pub n_samples: usize,
    /// Warm-start every sample after the first from the previous solution.
    pub initialize_from_previous: bool,
}

impl Default for MpcOptions {
    fn default() -> Self {
        Self {
            sample_period: 1.0,
            n_samples: 10,
            initialize_from_previous: true,
        }
    }
}

/// A free parameter that carries the current value of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasuredState {
    pub parameter: VarRef,
    pub state: VarRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Initializing,
    AwaitingSample,
    Solved,
    Terminated,
}

/// Accumulated wall-clock timings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MpcTimings {
    pub init: Duration,
    pub update: Duration,
    pub solve: Duration,
    pub post_processing: Duration,
    pub total: Duration,
    /// Longest single sample (update + solve + post-processing).
    pub max_sample_time: Duration,
    /// 1-based number of that sample.
    pub max_sample: usize,
}

/// Everything the loop produced so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MpcResults {
    /// Stitched physical-unit trajectories.
    pub trajectories: Trajectories,
    /// Physical `p_opt` of every sample, in sample order.
    pub p_opt: Vec<Vec<f64>>,
    pub timings: MpcTimings,
}

pub struct RecedingHorizonController<S: NlpSolver> {
    transcription: Transcription,
    solver: S,
    measured: Vec<MeasuredState>,
    options: MpcOptions,
    points_per_sample: usize,
    state: ControllerState,
    sample_nbr: usize,
    previous: Option<Trajectories>,
    results: MpcResults,
    update_started: Instant,
}

impl<S: NlpSolver> RecedingHorizonController<S> {
    /// Pin every measured parameter at its declared value and size the
    /// per-sample result window.
    pub fn new(
        mut transcription: Transcription,
        solver: S,
        measured: Vec<MeasuredState>,
        options: MpcOptions,
    ) -> DoptResult<Self> {
        let started = Instant::now();
        check_sample_period(options.sample_period)?;

        let description = transcription.description().clone();
        for m in &measured {
            if !matches!(description.position(m.state), Some((VarKind::State, _))) {
                return Err(DoptError::config(format!("{} is not a state of the model", m.state)));
            }
            let value = description
                .variable(m.parameter)
                .and_then(|v| v.initial_guess())
                .unwrap_or(0.0);
            transcription.pin_parameter(m.parameter, value)?;
        }

        let times = transcription
            .extract_with(&transcription.bounds().initial, ResultMode::CollocationPoints)?
            .time;
        let horizon = transcription.horizon();
        let cut = options.sample_period + SAMPLE_CUT_TOLERANCE * horizon.length();
        let points_per_sample = times.iter().take_while(|&&t| t - horizon.t0() <= cut).count();
        if points_per_sample < 2 {
            return Err(DoptError::config(format!(
                "sample period {} is shorter than the first result interval",
                options.sample_period
            )));
        }

        let results = MpcResults {
            timings: MpcTimings {
                init: started.elapsed(),
                ..Default::default()
            },
            ..Default::default()
        };
        info!(
            points_per_sample,
            sample_period = options.sample_period,
            measured = measured.len(),
            "receding-horizon controller ready"
        );
        Ok(Self {
            transcription,
            solver,
            measured,
            options,
            points_per_sample,
            state: ControllerState::AwaitingSample,
            sample_nbr: 1,
            previous: None,
            results,
            update_started: Instant::now(),
        })
    }

    /// Build the transcription as well, with control blocking of one group
    /// per sample period unless blocking factors were given.
    pub fn from_model(
        model: Arc<dyn ModelEvaluator>,
        mut transcription_options: TranscriptionOptions,
        solver: S,
        measured: Vec<MeasuredState>,
        options: MpcOptions,
    ) -> DoptResult<Self> {
        check_sample_period(options.sample_period)?;
        if transcription_options.blocking_factors.is_none() {
            let samples = (model.horizon().length() / options.sample_period).round() as usize;
            transcription_options.blocking_factors =
                Some(default_blocking_factors(transcription_options.n_e, samples));
        }
        let transcription = Transcription::new(model, transcription_options)?;
        Self::new(transcription, solver, measured, options)
    }

    /// Solve the current problem and return the first control values
    /// (physical units, control class order).
    pub fn sample(&mut self) -> DoptResult<Vec<f64>> {
        match self.state {
            ControllerState::Terminated => {
                return Err(DoptError::config("controller has been terminated"))
            }
            ControllerState::Solved => {
                return Err(DoptError::config(
                    "update_nlp_state must run between two samples",
                ))
            }
            ControllerState::Initializing | ControllerState::AwaitingSample => {}
        }

        if self.sample_nbr == 2 {
            let options = self.solver.options_mut();
            options.warm_start_init_point = true;
            if options.mu_init.is_none() {
                options.mu_init = Some(1e-4);
            }
            debug!("warm start enabled");
        }
        if self.sample_nbr >= 2 && self.options.initialize_from_previous {
            if let Some(previous) = &self.previous {
                self.transcription.initialize_from_trajectories(previous);
            }
        }
        let update = self.update_started.elapsed();

        let solve_started = Instant::now();
        let solution = match self.solver.solve(&self.transcription, self.transcription.bounds()) {
            Ok(solution) => solution,
            Err(err) => {
                warn!(sample = self.sample_nbr, error = %err, "sample failed, stopping");
                self.state = ControllerState::Terminated;
                return Err(err);
            }
        };
        let solve = solve_started.elapsed();

        let post_started = Instant::now();
        let full = match self
            .transcription
            .extract_with(&solution.x, ResultMode::CollocationPoints)
        {
            Ok(extracted) => extracted.unscaled(self.transcription.description()),
            Err(err) => {
                warn!(sample = self.sample_nbr, error = %err, "result extraction failed, stopping");
                self.state = ControllerState::Terminated;
                return Err(err);
            }
        };
        let skip = if self.results.trajectories.is_empty() { 0 } else { 1 };
        self.results
            .trajectories
            .append(&full.head(self.points_per_sample), skip);
        self.results.p_opt.push(full.p_opt.clone());
        let controls = full.u.first().cloned().unwrap_or_default();
        self.previous = Some(full);
        let post_processing = post_started.elapsed();

        let total = update + solve + post_processing;
        let timings = &mut self.results.timings;
        timings.update += update;
        timings.solve += solve;
        timings.post_processing += post_processing;
        timings.total += total;
        if total > timings.max_sample_time {
            timings.max_sample_time = total;
            timings.max_sample = self.sample_nbr;
        }
        debug!(?update, ?solve, ?post_processing, "sample timings");
        info!(
            sample = self.sample_nbr,
            t0 = self.transcription.horizon().t0(),
            objective = solution.objective,
            status = ?solution.status,
            "sample solved"
        );

        self.state = ControllerState::Solved;
        Ok(controls)
    }

    /// Advance one sample period and set the measured states.
    ///
    /// Keys may name either the measured parameter or its state. With
    /// `None` each measured state is predicted from the previous solution
    /// at the end of the leading sub-interval.
    pub fn update_nlp_state(&mut self, measurements: Option<&[(VarRef, f64)]>) -> DoptResult<()> {
        if self.state != ControllerState::Solved {
            return Err(DoptError::config(format!(
                "update_nlp_state needs a solved sample, controller is {:?}",
                self.state
            )));
        }
        self.update_started = Instant::now();

        let values = match measurements {
            Some(measurements) => measurements
                .iter()
                .map(|&(key, value)| {
                    self.measured
                        .iter()
                        .find(|m| m.parameter == key || m.state == key)
                        .map(|m| (m.parameter, value))
                        .ok_or_else(|| {
                            DoptError::config(format!("{key} is not a measured state of this controller"))
                        })
                })
                .collect::<DoptResult<Vec<_>>>()?,
            None => self.predict()?,
        };

        for (parameter, value) in values {
            self.transcription.pin_parameter(parameter, value)?;
        }
        self.transcription.shift_time(self.options.sample_period)?;
        self.sample_nbr += 1;
        self.state = ControllerState::AwaitingSample;
        Ok(())
    }

    fn predict(&self) -> DoptResult<Vec<(VarRef, f64)>> {
        let previous = self
            .previous
            .as_ref()
            .ok_or_else(|| DoptError::config("no previous solution to predict from"))?;
        let row = previous
            .x
            .get(self.points_per_sample - 1)
            .ok_or(DoptError::AssemblyInvariant {
                expected: self.points_per_sample,
                actual: previous.len(),
            })?;
        self.measured
            .iter()
            .map(|m| match self.transcription.description().position(m.state) {
                Some((VarKind::State, j)) => Ok((m.parameter, row[j])),
                _ => Err(DoptError::config(format!("{} is not a state of the model", m.state))),
            })
            .collect()
    }

    pub fn terminate(&mut self) {
        self.state = ControllerState::Terminated;
    }

    pub fn get_complete_results(&self) -> MpcResults {
        self.results.clone()
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn points_per_sample(&self) -> usize {
        self.points_per_sample
    }

    /// 1-based number of the next (or current) sample.
    pub fn sample_number(&self) -> usize {
        self.sample_nbr
    }

    pub fn transcription(&self) -> &Transcription {
        &self.transcription
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn options(&self) -> &MpcOptions {
        &self.options
    }
}

fn check_sample_period(sample_period: f64) -> DoptResult<()> {
    if sample_period.is_finite() && sample_period > 0.0 {
        Ok(())
    } else {
        Err(DoptError::config(format!(
            "sample period must be positive, got {sample_period}"
        )))
    }
}

/// One control group per sample period; the remainder joins the last group.
pub fn default_blocking_factors(n_e: usize, samples_per_horizon: usize) -> Vec<usize> {
    let group = (n_e / samples_per_horizon.max(1)).max(1);
    let mut factors = vec![group; n_e / group];
    if let Some(last) = factors.last_mut() {
        *last += n_e % group;
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_blocking_factors() {
        assert_eq!(default_blocking_factors(6, 3), vec![2, 2, 2]);
        assert_eq!(default_blocking_factors(7, 3), vec![2, 2, 3]);
        assert_eq!(default_blocking_factors(2, 5), vec![1, 1]);
        assert_eq!(default_blocking_factors(4, 0), vec![4]);
    }

    #[test]
    fn test_sample_period_validation() {
        assert!(check_sample_period(0.5).is_ok());
        assert!(matches!(check_sample_period(0.0), Err(DoptError::Configuration(_))));
        assert!(matches!(check_sample_period(f64::NAN), Err(DoptError::Configuration(_))));
    }
}
