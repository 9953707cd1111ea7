//! Collocation residuals vanish on an exact solution.

use dopt_algo::{Scheme, Transcription, TranscriptionOptions, VarType};
use dopt_core::{DescriptionBuilder, FnFunction, Model, TimeHorizon, Variable};
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

fn exact_point(t: &Transcription) -> Vec<f64> {
    let mut x = vec![0.0; t.n_xx()];
    for element in 0..t.mesh().n_e() {
        for node in 0..=t.basis().exit_node() {
            let time = t.node_time(element, node).constant;
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
fn test_residuals_vanish_on_exact_trajectory() {
    for scheme in [Scheme::Radau, Scheme::Gauss, Scheme::GaussLobatto] {
        let options = TranscriptionOptions {
            scheme,
            n_e: 10,
            n_cp: 5,
            ..Default::default()
        };
        let t = Transcription::new(Arc::new(exponential_growth()), options).unwrap();
        let x = exact_point(&t);
        let g = t.constraints(&x);
        let worst = g.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(worst < 1e-8, "{scheme:?}: max residual {worst:e}");
    }
}

#[test]
fn test_residuals_detect_wrong_trajectory() {
    let options = TranscriptionOptions {
        n_e: 10,
        n_cp: 3,
        ..Default::default()
    };
    let t = Transcription::new(Arc::new(exponential_growth()), options).unwrap();
    let mut x = exact_point(&t);
    // Replace the states by e^{2t}, keep the derivatives.
    for element in 0..t.mesh().n_e() {
        for node in 0..=t.basis().exit_node() {
            if let Some(i) = t.index().index(element, node, VarType::X, 0) {
                x[i] = (2.0 * t.node_time(element, node).constant).exp();
            }
        }
    }
    assert!(t.constraint_violation(&x) > 1e-3);
}

#[test]
fn test_nonuniform_mesh_still_consistent() {
    let options = TranscriptionOptions {
        n_e: 4,
        n_cp: 5,
        element_lengths: Some(vec![0.1, 0.2, 0.3, 0.4]),
        ..Default::default()
    };
    let t = Transcription::new(Arc::new(exponential_growth()), options).unwrap();
    let g = t.constraints(&exact_point(&t));
    assert!(g.iter().all(|v| v.abs() < 1e-5));
}
