// SPDX-License-Identifier: AGPL-3.0-only

//! Integration tests: configuration file to verified `M†M` solution on the
//! host backend.

mod common;

use common::Fixture;
use latmg::accel::{HostAccelerator, TBoundary};
use latmg::error::SolverError;
use latmg::lattice::gauge::{GaugeField, Subset};
use latmg::lattice::spinor::SpinorField;
use latmg::solver::{LastSolutionPredictor, Predictor, SolverConfiguration, ZeroGuessPredictor};

const ANISO_JSON: &str = r#"{
    "mass": 0.3,
    "clov_coeff_r": 1.05,
    "clov_coeff_t": 0.95,
    "aniso": { "aniso_p": true, "t_dir": 3, "xi_0": 1.4, "nu": 0.9 },
    "max_iter": 800,
    "rsd_target": 1e-9,
    "rsd_tolerance_factor": 100,
    "antiperiodic_t": true,
    "axial_gauge": true,
    "subspace_id": "aniso",
    "multigrid": {
        "mg_levels": 2,
        "blocking": [[2, 2, 2, 2]],
        "prec": "HALF"
    }
}"#;

fn host(config: SolverConfiguration) -> Fixture<HostAccelerator> {
    Fixture::new(HostAccelerator::new(), config)
}

#[test]
fn configuration_file_drives_a_verified_solve() {
    let path = std::env::temp_dir().join(format!("latmg_config_{}.json", std::process::id()));
    std::fs::write(&path, ANISO_JSON).expect("write config");
    let config = SolverConfiguration::from_json_file(&path).expect("config");
    std::fs::remove_file(&path).ok();

    let mut gauge = GaugeField::random(common::geometry(), 78, 0.5);
    gauge.apply_antiperiodic_time();
    let f = Fixture::with_gauge(HostAccelerator::new(), config, gauge);
    let s = f.solver();
    {
        let acc = f.acc.borrow();
        let gp = acc.gauge_param().expect("gauge staged");
        assert_eq!(gp.t_boundary, TBoundary::AntiPeriodic);
        assert!(gp.gauge_fixed);
        assert!((gp.anisotropy - 1.4 / 0.9).abs() < 1e-12);
    }

    let chi = f.source(11);
    let mut psi = SpinorField::zeros(f.gauge.geometry());
    let res = s.solve(&mut psi, &chi).expect("solve");
    assert!(res.iterations > 0);
    assert!(f.relative_residual(&psi, &chi) < f.config.max_tolerated());
}

#[test]
fn missing_configuration_file_is_an_io_error() {
    let err = SolverConfiguration::from_json_file("/nonexistent/latmg.json").expect_err("missing");
    assert!(matches!(err, SolverError::ConfigIo { .. }));
}

#[test]
fn zero_source_gives_zero_solution() {
    let f = host(common::config());
    let s = f.solver();
    let chi = SpinorField::zeros(f.gauge.geometry());
    let mut psi = SpinorField::random(f.gauge.geometry(), 3);
    let res = s.solve(&mut psi, &chi).expect("solve");
    assert_eq!(res.iterations, 0);
    assert!(res.residual.abs() < 1e-30);
    assert!(psi.norm_sq(Subset::Odd) < 1e-30);
}

#[test]
fn last_solution_guess_converges_immediately() {
    let config = SolverConfiguration {
        rsd_tolerance_factor: 100.0,
        ..common::config()
    };
    let f = host(config);
    let s = f.solver();
    let chi = f.source(12);
    let mut last = LastSolutionPredictor::new();

    let mut psi = SpinorField::zeros(f.gauge.geometry());
    let first = s.solve_with(&mut psi, &chi, Predictor::TwoStep(&mut last)).expect("first");
    let mut again = SpinorField::zeros(f.gauge.geometry());
    let second = s.solve_with(&mut again, &chi, Predictor::TwoStep(&mut last)).expect("second");

    assert!(second.iterations < first.iterations);
    assert!(f.relative_residual(&again, &chi) < f.config.max_tolerated());
}

#[test]
fn zero_guess_predictor_matches_plain_solve() {
    let config = SolverConfiguration {
        rsd_tolerance_factor: 100.0,
        ..common::config()
    };
    let f = host(config);
    let s = f.solver();
    let chi = f.source(13);

    let mut plain = SpinorField::zeros(f.gauge.geometry());
    let a = s.solve(&mut plain, &chi).expect("plain");
    let mut zero = ZeroGuessPredictor;
    let mut guessed = SpinorField::zeros(f.gauge.geometry());
    let b = s.solve_with(&mut guessed, &chi, Predictor::TwoStep(&mut zero)).expect("zero guess");

    assert!(a.iterations.abs_diff(b.iterations) <= 1);
    assert!(f.relative_residual(&plain, &chi) < f.config.max_tolerated());
    assert!(f.relative_residual(&guessed, &chi) < f.config.max_tolerated());
}
