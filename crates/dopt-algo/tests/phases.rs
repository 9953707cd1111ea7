//! Element boundary times as decision variables or model parameters.

use dopt_algo::{
    AugmentedLagrangianSolver, NlpSolver, Scheme, SolveStatus, SolverOptions, Transcription,
    TranscriptionOptions, VarType,
};
use dopt_core::{DescriptionBuilder, DoptError, FnFunction, Model, TimeHorizon, Variable};
use std::sync::Arc;

/// `dx = x` on [0, 1]; input layout `[dx, x, t]`.
fn exponential_growth() -> Model {
    let description = DescriptionBuilder::new()
        .state(Variable::new("x").with_start(1.0))
        .build()
        .unwrap();
    let dae = FnFunction::new(3, 1, |z, out| out[0] = z[0] - z[1]);
    Model::new(description, TimeHorizon::fixed(0.0, 1.0), dae)
}

fn free_phases(scheme: Scheme, n_e: usize, n_cp: usize) -> TranscriptionOptions {
    TranscriptionOptions {
        scheme,
        n_e,
        n_cp,
        free_phases: true,
        ..Default::default()
    }
}

/// Put the interior boundaries at `times` and fill every node with `e^t`.
fn exact_point(t: &Transcription, times: &[f64]) -> Vec<f64> {
    let mut x = vec![0.0; t.n_xx()];
    for (i, &time) in times.iter().enumerate() {
        x[t.index().phase_boundary(i + 1).unwrap()] = time;
    }
    for element in 0..t.mesh().n_e() {
        for node in 0..=t.basis().exit_node() {
            let time = t.node_time(element, node).eval(&x);
            for var in [VarType::Dx, VarType::X] {
                if let Some(i) = t.index().index(element, node, var, 0) {
                    x[i] = time.exp();
                }
            }
        }
    }
    x
}

#[test]
fn test_free_boundaries_scale_element_lengths() {
    for scheme in [Scheme::Radau, Scheme::Gauss, Scheme::GaussLobatto] {
        let t = Transcription::new(Arc::new(exponential_growth()), free_phases(scheme, 3, 5)).unwrap();
        assert!(!t.has_fixed_time_grid());
        let x = exact_point(&t, &[0.15, 0.7]);
        assert!((t.element_length(1).eval(&x) - 0.55).abs() < 1e-15);
        let worst = t.constraint_violation(&x);
        assert!(worst < 1e-5, "{scheme:?}: max residual {worst:e}");

        // Moving a boundary without moving the states breaks collocation.
        let mut moved = x.clone();
        moved[t.index().phase_boundary(1).unwrap()] = 0.4;
        assert!(t.constraint_violation(&moved) > 1e-3, "{scheme:?}");
    }
}

#[test]
fn test_reversed_boundaries_violate_ordering() {
    let t = Transcription::new(Arc::new(exponential_growth()), free_phases(Scheme::Radau, 3, 2)).unwrap();
    // t0 - t1, t1 - t2, t2 - tf
    assert_eq!(t.n_inequalities(), 3);

    let ordered = exact_point(&t, &[0.3, 0.6]);
    let g = t.constraints(&ordered);
    assert!(g[t.n_equalities()..].iter().all(|&h| h < 0.0));

    let reversed = exact_point(&t, &[0.8, 0.2]);
    let g = t.constraints(&reversed);
    let ordering = &g[t.n_equalities()..];
    assert!((ordering[0] + 0.8).abs() < 1e-15);
    assert!((ordering[1] - 0.6).abs() < 1e-15);
    assert!((ordering[2] + 0.8).abs() < 1e-15);
    assert!(t.constraint_violation(&reversed) >= 0.6 - 1e-15);
}

#[test]
fn test_fixed_boundaries_add_no_ordering_rows() {
    let options = TranscriptionOptions {
        n_e: 3,
        n_cp: 2,
        ..Default::default()
    };
    let t = Transcription::new(Arc::new(exponential_growth()), options).unwrap();
    assert_eq!(t.n_inequalities(), 0);
    assert_eq!(t.index().phase_boundary(1), None);
    assert!(t.has_fixed_time_grid());
}

/// `dx = 1`, `x(0) = 0` with a free switch parameter `ts` and a fixed `tc`.
fn switched() -> Model {
    let description = DescriptionBuilder::new()
        .state(Variable::new("x"))
        .free_parameter(Variable::new("ts").with_start(0.4).with_nominal(2.0))
        .parameter(Variable::new("tc").with_value(0.75))
        .build()
        .unwrap();
    // z = [ts, dx, x, t]
    let dae = FnFunction::new(4, 1, |z, out| out[0] = z[1] - 1.0);
    Model::new(description, TimeHorizon::fixed(0.0, 1.0), dae)
        .with_initial(FnFunction::new(4, 1, |z, out| out[0] = z[2]))
}

fn with_phase_parameters(names: &[&str]) -> TranscriptionOptions {
    TranscriptionOptions {
        n_e: names.len() + 1,
        n_cp: 2,
        free_phases: true,
        phase_parameters: names.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

#[test]
fn test_phase_parameters_resolve_to_model_parameters() {
    let t = Transcription::new(Arc::new(switched()), with_phase_parameters(&["ts", "tc"])).unwrap();
    // No decision variables of their own.
    assert_eq!(t.index().phase_boundary(1), None);
    assert_eq!(t.index().summary().time_variables, 0);

    let ts = t.boundary_time(1);
    assert_eq!(ts.terms, vec![(t.index().p_opt(0), 2.0)]);
    assert!(t.boundary_time(2).is_constant());
    assert_eq!(t.boundary_time(2).constant, 0.75);

    // Scaled ts = 0.2 puts the first boundary at 0.4.
    let mut x = vec![0.0; t.n_xx()];
    x[t.index().p_opt(0)] = 0.2;
    assert!((t.element_length(0).eval(&x) - 0.4).abs() < 1e-15);
    assert!((t.element_length(1).eval(&x) - 0.35).abs() < 1e-15);
    // t0 - ts and ts - tc depend on x; tc - tf is constant and dropped.
    assert_eq!(t.n_inequalities(), 2);
}

#[test]
fn test_missing_phase_parameter_is_linking_error() {
    let err = Transcription::new(Arc::new(switched()), with_phase_parameters(&["ts", "t_missing"]))
        .unwrap_err();
    assert!(matches!(err, DoptError::Linking { name } if name == "t_missing"));

    // A state is not a parameter.
    let err = Transcription::new(Arc::new(switched()), with_phase_parameters(&["x"])).unwrap_err();
    assert!(matches!(err, DoptError::Linking { name } if name == "x"));
}

#[test]
fn test_phase_parameter_count_must_match_boundaries() {
    let mut options = with_phase_parameters(&["ts"]);
    options.n_e = 3;
    let err = Transcription::new(Arc::new(switched()), options).unwrap_err();
    assert!(matches!(err, DoptError::Configuration(_)));
}

/// `dx = 1`, `x(0) = 0`, `min ∫ t² dt` on [0, 1]; layout `[dx, x, t]`.
fn clock() -> Model {
    let description = DescriptionBuilder::new()
        .state(Variable::new("x"))
        .build()
        .unwrap();
    let dae = FnFunction::new(3, 1, |z, out| out[0] = z[0] - 1.0);
    Model::new(description, TimeHorizon::fixed(0.0, 1.0), dae)
        .with_initial(FnFunction::new(3, 1, |z, out| out[0] = z[1]))
        .with_lagrange(FnFunction::new(3, 1, |z, out| out[0] = z[2] * z[2]))
}

#[test]
fn test_solver_places_free_boundary() {
    // One Radau point per element collocates at the element end, so the
    // quadrature of t² is t1·t1² + (1 - t1)·1, minimal at t1 = 1/√3.
    let t = Transcription::new(Arc::new(clock()), free_phases(Scheme::Radau, 2, 1)).unwrap();
    let mut solver = AugmentedLagrangianSolver::new(SolverOptions {
        max_iter: 5000,
        tolerance: 1e-6,
        ..Default::default()
    });
    let solution = solver.solve(&t, t.bounds()).unwrap();
    assert!(matches!(solution.status, SolveStatus::Optimal | SolveStatus::Acceptable));

    let t1 = solution.x[t.index().phase_boundary(1).unwrap()];
    let expected = 1.0 / 3f64.sqrt();
    assert!((t1 - expected).abs() < 1e-3, "boundary at {t1}");
    assert!((solution.objective - (t1.powi(3) + 1.0 - t1)).abs() < 1e-4);

    let trajectories = t.extract(&solution.x).unwrap();
    assert_eq!(trajectories.time.len(), 3);
    assert!((trajectories.time[1] - t1).abs() < 1e-12);
    assert!((trajectories.x[1][0] - t1).abs() < 1e-4);
}
