//! Built-in demonstration models.

use clap::ValueEnum;
use dopt_core::{DescriptionBuilder, DoptResult, FnFunction, Model, TimeHorizon, Variable};

/// Feed concentration of the reactor.
pub const C_IN: f64 = 2.0;
/// Rate constant of the reactor plant.
pub const REACTOR_RATE: f64 = 0.8;
/// Concentration set point.
pub const C_REF: f64 = 0.6;
/// Initial concentration of the reactor plant.
pub const C_START: f64 = 1.0;
pub const REACTOR_HORIZON: f64 = 3.0;
pub const VDP_HORIZON: f64 = 20.0;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoModel {
    VanDerPol,
    Reactor,
}

impl DemoModel {
    pub fn build(self) -> DoptResult<Model> {
        match self {
            DemoModel::VanDerPol => van_der_pol(),
            DemoModel::Reactor => reactor(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DemoModel::VanDerPol => "van_der_pol",
            DemoModel::Reactor => "reactor",
        }
    }
}

/// Van der Pol oscillator driven to rest with minimum energy.
///
/// ```text
/// der(x1) = (1 - x2²) x1 - x2 + u      x1(0) = 0
/// der(x2) = x1                         x2(0) = 1
/// min ∫ x1² + x2² + u² dt,  -1 <= u <= 0.75
/// ```
pub fn van_der_pol() -> DoptResult<Model> {
    let description = DescriptionBuilder::new()
        .state(Variable::new("x1").with_start(0.0).with_description("velocity"))
        .state(Variable::new("x2").with_start(1.0).with_description("position"))
        .control(Variable::new("u").with_bounds(-1.0, 0.75).with_description("force"))
        .build()?;
    // z = [dx1, dx2, x1, x2, u, t]
    let dae = FnFunction::new(6, 2, |z, out| {
        out[0] = z[0] - ((1.0 - z[3] * z[3]) * z[2] - z[3] + z[4]);
        out[1] = z[1] - z[2];
    });
    let initial = FnFunction::new(6, 2, |z, out| {
        out[0] = z[2];
        out[1] = z[3] - 1.0;
    });
    let lagrange = FnFunction::new(6, 1, |z, out| {
        out[0] = z[2] * z[2] + z[3] * z[3] + z[4] * z[4];
    });
    Ok(Model::new(description, TimeHorizon::fixed(0.0, VDP_HORIZON), dae)
        .with_initial(initial)
        .with_lagrange(lagrange))
}

/// Concentration balance of a continuously fed reactor with first-order decay.
pub fn reactor_rhs(c: f64, q: f64, k: f64) -> f64 {
    q * (C_IN - c) - k * c
}

/// Feed rate that holds the set point.
pub fn reactor_steady_feed() -> f64 {
    REACTOR_RATE * C_REF / (C_IN - C_REF)
}

/// Reactor tracking problem; `c0` carries the measured concentration.
///
/// ```text
/// der(c) = q (c_in - c) - k c          c(t0) = c0
/// min ∫ (c - c_ref)² + 0.1 (q - q_ref)² dt,  0 <= q <= 2
/// ```
pub fn reactor() -> DoptResult<Model> {
    let q_ref = reactor_steady_feed();
    let description = DescriptionBuilder::new()
        .state(Variable::new("c").with_start(C_START).with_description("concentration"))
        .control(
            Variable::new("q")
                .with_bounds(0.0, 2.0)
                .with_start(q_ref)
                .with_description("feed rate"),
        )
        .free_parameter(Variable::new("c0").with_start(C_START).with_description("measured concentration"))
        .build()?;
    // z = [c0, dc, c, q, t]
    let dae = FnFunction::new(5, 1, |z, out| out[0] = z[1] - reactor_rhs(z[2], z[3], REACTOR_RATE));
    let initial = FnFunction::new(5, 1, |z, out| out[0] = z[2] - z[0]);
    let lagrange = FnFunction::new(5, 1, move |z, out| {
        let (e_c, e_q) = (z[2] - C_REF, z[3] - q_ref);
        out[0] = e_c * e_c + 0.1 * e_q * e_q;
    });
    Ok(Model::new(description, TimeHorizon::fixed(0.0, REACTOR_HORIZON), dae)
        .with_initial(initial)
        .with_lagrange(lagrange))
}

/// Reactor with the rate constant `k` as the unknown.
pub fn reactor_estimation() -> DoptResult<Model> {
    let description = DescriptionBuilder::new()
        .state(Variable::new("c").with_start(C_START).with_description("concentration"))
        .control(Variable::new("q").with_bounds(0.0, 2.0).with_description("feed rate"))
        .free_parameter(
            Variable::new("k")
                .with_bounds(0.0, 5.0)
                .with_start(0.5)
                .with_description("rate constant"),
        )
        .build()?;
    // z = [k, dc, c, q, t]
    let dae = FnFunction::new(5, 1, |z, out| out[0] = z[1] - reactor_rhs(z[2], z[3], z[0]));
    Ok(Model::new(description, TimeHorizon::fixed(0.0, REACTOR_HORIZON), dae))
}

/// Advance the reactor plant by `dt` with constant feed (classic RK4).
pub fn simulate_reactor(c: f64, q: f64, dt: f64) -> f64 {
    const STEPS: usize = 20;
    let h = dt / STEPS as f64;
    let f = |c: f64| reactor_rhs(c, q, REACTOR_RATE);
    (0..STEPS).fold(c, |c, _| {
        let k1 = f(c);
        let k2 = f(c + 0.5 * h * k1);
        let k3 = f(c + 0.5 * h * k2);
        let k4 = f(c + h * k3);
        c + h / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dopt_core::{validate_evaluator, ModelEvaluator};

    #[test]
    fn test_models_are_consistent() {
        for model in [van_der_pol().unwrap(), reactor().unwrap(), reactor_estimation().unwrap()] {
            validate_evaluator(&model).unwrap();
        }
    }

    #[test]
    fn test_steady_feed_holds_set_point() {
        assert!(reactor_rhs(C_REF, reactor_steady_feed(), REACTOR_RATE).abs() < 1e-15);
        let c = simulate_reactor(C_REF, reactor_steady_feed(), 1.0);
        assert!((c - C_REF).abs() < 1e-12);
    }

    #[test]
    fn test_simulation_matches_closed_form() {
        // dc = q (c_in - c) - k c relaxes to q c_in / (q + k) at rate q + k.
        let (q, dt) = (0.5, 0.7);
        let a = q + REACTOR_RATE;
        let steady = q * C_IN / a;
        let exact = steady + (C_START - steady) * (-a * dt).exp();
        assert!((simulate_reactor(C_START, q, dt) - exact).abs() < 1e-9);
    }

    #[test]
    fn test_reactor_layout() {
        let model = reactor().unwrap();
        let description = model.description();
        assert_eq!(description.n_p(), 1);
        assert_eq!(model.layout().len(), 5);
        assert_eq!(DemoModel::Reactor.name(), "reactor");
    }
}
