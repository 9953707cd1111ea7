//! Receding-horizon loop against a deterministic solver.

use dopt_algo::{
    BoundsAndGuess, ControllerState, MeasuredState, MpcOptions, NlpProblem, NlpSolution, NlpSolver,
    RecedingHorizonController, SolveStatus, SolverOptions, Transcription, TranscriptionOptions,
};
use dopt_core::{
    DescriptionBuilder, DoptError, DoptResult, FnFunction, Model, ModelEvaluator, TimeHorizon, VarRef,
    Variable,
};
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_PERIOD: f64 = 0.5;

/// Returns the starting point unchanged; fails on the given call, or
/// returns a point of the wrong length on `truncate_on`.
#[derive(Default)]
struct EchoSolver {
    options: SolverOptions,
    calls: usize,
    fail_on: Option<usize>,
    truncate_on: Option<usize>,
}

impl NlpSolver for EchoSolver {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn options(&self) -> &SolverOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut SolverOptions {
        &mut self.options
    }

    fn solve(&mut self, problem: &dyn NlpProblem, start: &BoundsAndGuess) -> DoptResult<NlpSolution> {
        self.calls += 1;
        if self.fail_on == Some(self.calls) {
            return Err(DoptError::SolverFailure {
                message: "scripted failure".into(),
                elapsed: Duration::from_millis(1),
            });
        }
        let mut x = start.initial.clone();
        if self.truncate_on == Some(self.calls) {
            x.pop();
        }
        Ok(NlpSolution {
            x,
            objective: problem.objective(&start.initial),
            iterations: 0,
            solve_time: Duration::ZERO,
            status: SolveStatus::Optimal,
        })
    }
}

/// First-order lag `dx = -x + u` with `x(t0) = x0`; layout `[x0, dx, x, u, t]`.
fn lag() -> Model {
    let description = DescriptionBuilder::new()
        .state(Variable::new("x").with_start(1.5))
        .control(Variable::new("u").with_start(0.25))
        .free_parameter(Variable::new("x0").with_start(2.0))
        .build()
        .unwrap();
    let dae = FnFunction::new(5, 1, |z, out| out[0] = z[1] + z[2] - z[3]);
    let initial = FnFunction::new(5, 1, |z, out| out[0] = z[2] - z[0]);
    Model::new(description, TimeHorizon::fixed(0.0, 3.0 * SAMPLE_PERIOD), dae)
        .with_initial(initial)
        .with_lagrange(FnFunction::new(5, 1, |z, out| out[0] = z[2] * z[2] + z[3] * z[3]))
}

struct Refs {
    x: VarRef,
    u: VarRef,
    x0: VarRef,
}

fn controller(solver: EchoSolver) -> (RecedingHorizonController<EchoSolver>, Refs) {
    let model = lag();
    let d = model.description().clone();
    let refs = Refs {
        x: d.resolve("x").unwrap(),
        u: d.resolve("u").unwrap(),
        x0: d.resolve("x0").unwrap(),
    };
    let options = TranscriptionOptions {
        n_e: 3,
        n_cp: 2,
        ..Default::default()
    };
    let transcription = Transcription::new(Arc::new(model), options).unwrap();
    let measured = vec![MeasuredState {
        parameter: refs.x0,
        state: refs.x,
    }];
    let mpc_options = MpcOptions {
        sample_period: SAMPLE_PERIOD,
        n_samples: 3,
        ..Default::default()
    };
    let controller = RecedingHorizonController::new(transcription, solver, measured, mpc_options).unwrap();
    (controller, refs)
}

#[test]
fn test_stitched_trajectory_has_no_duplicate_junctions() {
    let (mut mpc, _) = controller(EchoSolver::default());
    // Radau, n_cp = 2: entry point plus two nodes of the first element.
    assert_eq!(mpc.points_per_sample(), 3);
    for sample in 0..3 {
        if sample > 0 {
            mpc.update_nlp_state(None).unwrap();
        }
        mpc.sample().unwrap();
    }
    let results = mpc.get_complete_results();
    assert_eq!(results.trajectories.len(), 3 * mpc.points_per_sample() - 2);
    assert_eq!(results.p_opt.len(), 3);
    assert!(results
        .trajectories
        .time
        .windows(2)
        .all(|w| w[1] > w[0]));
    let last = *results.trajectories.time.last().unwrap();
    assert!((last - 3.0 * SAMPLE_PERIOD).abs() < 1e-12);
}

#[test]
fn test_warm_start_enabled_from_second_sample() {
    let (mut mpc, _) = controller(EchoSolver::default());
    mpc.sample().unwrap();
    assert!(!mpc.solver().options().warm_start_init_point);
    assert_eq!(mpc.solver().options().mu_init, None);
    mpc.update_nlp_state(None).unwrap();
    mpc.sample().unwrap();
    assert!(mpc.solver().options().warm_start_init_point);
    assert_eq!(mpc.solver().options().mu_init, Some(1e-4));
}

#[test]
fn test_measured_values_are_pinned_and_horizon_shifts() {
    let (mut mpc, refs) = controller(EchoSolver::default());
    assert_eq!(mpc.transcription().pinned_value(refs.x0), Some(2.0));
    let u = mpc.sample().unwrap();
    assert_eq!(u, vec![0.25]);

    mpc.update_nlp_state(Some(&[(refs.x, 1.25)])).unwrap();
    assert_eq!(mpc.transcription().pinned_value(refs.x0), Some(1.25));
    assert!((mpc.transcription().horizon().t0() - SAMPLE_PERIOD).abs() < 1e-15);
    assert_eq!(mpc.state(), ControllerState::AwaitingSample);
}

#[test]
fn test_prediction_uses_end_of_leading_interval() {
    let (mut mpc, refs) = controller(EchoSolver::default());
    mpc.sample().unwrap();
    mpc.update_nlp_state(None).unwrap();
    // The echoed guess carries the start value x = 1.5 at every node.
    assert_eq!(mpc.transcription().pinned_value(refs.x0), Some(1.5));
}

#[test]
fn test_unknown_update_key_is_configuration_error() {
    let (mut mpc, refs) = controller(EchoSolver::default());
    mpc.sample().unwrap();
    let err = mpc.update_nlp_state(Some(&[(refs.u, 1.0)])).unwrap_err();
    assert!(matches!(err, DoptError::Configuration(_)));
    assert_eq!(mpc.state(), ControllerState::Solved);
}

#[test]
fn test_solver_failure_terminates_but_keeps_results() {
    let (mut mpc, _) = controller(EchoSolver {
        fail_on: Some(2),
        ..Default::default()
    });
    mpc.sample().unwrap();
    mpc.update_nlp_state(None).unwrap();
    let err = mpc.sample().unwrap_err();
    assert!(matches!(err, DoptError::SolverFailure { .. }));
    assert_eq!(mpc.state(), ControllerState::Terminated);
    assert_eq!(mpc.get_complete_results().trajectories.len(), 3);
    assert!(matches!(mpc.sample(), Err(DoptError::Configuration(_))));
}

#[test]
fn test_extraction_failure_terminates() {
    let (mut mpc, _) = controller(EchoSolver {
        truncate_on: Some(2),
        ..Default::default()
    });
    mpc.sample().unwrap();
    mpc.update_nlp_state(None).unwrap();
    let err = mpc.sample().unwrap_err();
    assert!(matches!(err, DoptError::AssemblyInvariant { .. }));
    assert_eq!(mpc.state(), ControllerState::Terminated);
    let results = mpc.get_complete_results();
    assert_eq!(results.trajectories.len(), 3);
    assert_eq!(results.p_opt.len(), 1);
    assert!(matches!(mpc.update_nlp_state(None), Err(DoptError::Configuration(_))));
}

#[test]
fn test_sampling_twice_without_update_is_rejected() {
    let (mut mpc, _) = controller(EchoSolver::default());
    mpc.sample().unwrap();
    assert!(matches!(mpc.sample(), Err(DoptError::Configuration(_))));
    mpc.terminate();
    assert_eq!(mpc.state(), ControllerState::Terminated);
}

#[test]
fn test_from_model_blocks_controls_per_sample() {
    let model = lag();
    let d = model.description().clone();
    let measured = vec![MeasuredState {
        parameter: d.resolve("x0").unwrap(),
        state: d.resolve("x").unwrap(),
    }];
    let options = TranscriptionOptions {
        n_e: 6,
        n_cp: 2,
        ..Default::default()
    };
    let mpc = RecedingHorizonController::from_model(
        Arc::new(model),
        options,
        EchoSolver::default(),
        measured,
        MpcOptions {
            sample_period: SAMPLE_PERIOD,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        mpc.transcription().options().blocking_factors,
        Some(vec![2, 2, 2])
    );
    assert!(mpc.transcription().index().is_blocked());
}
