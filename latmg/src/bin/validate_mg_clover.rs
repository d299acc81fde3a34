// SPDX-License-Identifier: AGPL-3.0-only

//! Multigrid clover `M†M` solver validation on the host backend.
//!
//! Checks, on a 4⁴ random gauge field:
//!   - staged links and clover reproduce the anisotropic operator
//!   - the axial-gauge staged operator is gauge covariant
//!   - `M` is `γ5`-Hermitian, so the Y/X decomposition is exact
//!   - two-stage solves meet the tolerated `M†M` residual for every predictor
//!   - a second solver on the same key recovers the subspace
//!   - a configuration without multigrid parameters is rejected

use std::cell::RefCell;
use std::rc::Rc;

use latmg::accel::{Accelerator, HostAccelerator};
use latmg::error::{abort, SolverError};
use latmg::lattice::clover::CloverTerm;
use latmg::lattice::complex_f64::Complex64;
use latmg::lattice::dslash::WilsonDslash;
use latmg::lattice::gauge::{GaugeField, Geometry, Parity, Subset};
use latmg::lattice::spinor::SpinorField;
use latmg::linop::{AnisoParams, CloverParams, EvenOddPrecCloverOperator, LinearOperator, MdagMOperator, Sign};
use latmg::solver::stager::StagedFields;
use latmg::solver::{
    MdagMMultigridCloverSolver, MinimalResidualPredictor, MultigridParams, NamedObjectMap, Predictor,
    ResidentChronoPredictor, SolverConfiguration,
};
use latmg::tolerances::{
    CLOVER_INVERSE_ABS, GAMMA5_HERMITICITY_REL, GAUGE_COVARIANCE_REL, STAGED_OPERATOR_PARITY, VALIDATION_MAX_ITER,
    VALIDATION_RSD_TARGET, VALIDATION_TOLERANCE_FACTOR,
};
use latmg::validation::ValidationHarness;

const DIMS: [usize; 4] = [4, 4, 4, 4];

fn clover_params() -> CloverParams {
    CloverParams {
        mass: 0.2,
        clov_coeff_r: 1.0,
        clov_coeff_t: 0.95,
        aniso: AnisoParams {
            aniso_p: true,
            t_dir: 3,
            xi_0: 1.5,
            nu: 0.95,
        },
    }
}

fn config(axial_gauge: bool) -> SolverConfiguration {
    SolverConfiguration {
        clover: clover_params(),
        max_iter: VALIDATION_MAX_ITER,
        rsd_target: VALIDATION_RSD_TARGET,
        rsd_tolerance_factor: VALIDATION_TOLERANCE_FACTOR,
        axial_gauge,
        subspace_id: "validate_mg".to_string(),
        multigrid: Some(MultigridParams {
            blocking: vec![[2, 2, 2, 2]],
            ..MultigridParams::default()
        }),
        ..SolverConfiguration::default()
    }
}

fn relative_difference(a: &SpinorField, b: &SpinorField) -> f64 {
    let mut d = a.clone();
    d.axpy(Complex64::real(-1.0), b, Subset::Odd);
    (d.norm_sq(Subset::Odd) / b.norm_sq(Subset::Odd)).sqrt()
}

fn mdagm_relative_residual(op: &dyn LinearOperator, psi: &SpinorField, chi: &SpinorField) -> f64 {
    let mut r = SpinorField::zeros(chi.geometry());
    MdagMOperator::new(op).apply(&mut r, psi, Sign::Plus);
    r.xpby(chi, Complex64::real(-1.0), Subset::Odd);
    (r.norm_sq(Subset::Odd) / chi.norm_sq(Subset::Odd)).sqrt()
}

/// Host operator on the staged fields, as the accelerator sees them.
fn staged_operator(staged: &StagedFields) -> Option<EvenOddPrecCloverOperator> {
    let geom = staged.gauge().geometry();
    let clover = CloverTerm::from_packed(geom, staged.clover())?;
    let inverse = CloverTerm::from_packed(geom, staged.inverse())?;
    Some(EvenOddPrecCloverOperator::from_parts(
        staged.gauge().clone(),
        WilsonDslash::isotropic(),
        clover,
        inverse,
    ))
}

fn check_staging(harness: &mut ValidationHarness, gauge: &GaugeField, op: &EvenOddPrecCloverOperator) -> Result<(), SolverError> {
    println!("═══ Field staging ═══");
    let geom = gauge.geometry();
    let psi = SpinorField::random(geom, 11);
    let mut reference = SpinorField::zeros(geom);
    op.apply(&mut reference, &psi, Sign::Plus);

    let staged = StagedFields::stage(gauge, &clover_params(), false)?;
    let fixed = StagedFields::stage(gauge, &clover_params(), true)?;
    let (Some(plain_op), Some(fixed_op)) = (staged_operator(&staged), staged_operator(&fixed)) else {
        harness.check_bool("staged clover layout", false);
        return Ok(());
    };

    let mut host = SpinorField::zeros(geom);
    plain_op.apply(&mut host, &psi, Sign::Plus);
    let err = relative_difference(&host, &reference);
    println!("  rescaled links, isotropic dslash: {err:.3e}");
    harness.check_upper("staged operator = anisotropic operator", err, STAGED_OPERATOR_PARITY);

    let mut rotated = SpinorField::zeros(geom);
    fixed_op.apply(&mut rotated, &fixed.to_device(&psi), Sign::Plus);
    fixed.from_device(&mut rotated);
    let err = relative_difference(&rotated, &reference);
    println!("  axial gauge, g† M_g g: {err:.3e}");
    harness.check_upper("axial gauge covariance", err, GAUGE_COVARIANCE_REL);

    let mut a_psi = SpinorField::zeros(geom);
    let mut back = SpinorField::zeros(geom);
    for cb in [Parity::Even, Parity::Odd] {
        op.clover().apply(&mut a_psi, &psi, cb);
        op.inverse_clover().apply(&mut back, &a_psi, cb);
    }
    back.axpy(Complex64::real(-1.0), &psi, Subset::All);
    let err = (back.norm_sq(Subset::All) / psi.norm_sq(Subset::All)).sqrt();
    println!("  A⁻¹ A ψ − ψ: {err:.3e}");
    harness.check_upper("clover inverse", err, CLOVER_INVERSE_ABS);

    let x = SpinorField::random(geom, 12);
    let mut m_g5x = SpinorField::zeros(geom);
    let mut mdx = SpinorField::zeros(geom);
    op.apply(&mut m_g5x, &x.gamma5(), Sign::Plus);
    op.apply(&mut mdx, &x, Sign::Minus);
    let err = relative_difference(&mdx, &m_g5x.gamma5());
    harness.check_upper("M† = γ5 M γ5", err, GAMMA5_HERMITICITY_REL);
    println!();
    Ok(())
}

fn new_solver(
    op: &Rc<EvenOddPrecCloverOperator>,
    gauge: &GaugeField,
    config: &SolverConfiguration,
    acc: &Rc<RefCell<HostAccelerator>>,
    registry: &Rc<RefCell<NamedObjectMap>>,
) -> Result<MdagMMultigridCloverSolver<HostAccelerator>, SolverError> {
    let op: Rc<dyn LinearOperator> = op.clone();
    MdagMMultigridCloverSolver::new(op, gauge, config.clone(), acc.clone(), registry.clone())
}

fn check_solves(
    harness: &mut ValidationHarness,
    gauge: &GaugeField,
    op: &Rc<EvenOddPrecCloverOperator>,
    axial_gauge: bool,
) -> Result<(), SolverError> {
    let label = if axial_gauge { "axial gauge" } else { "no gauge fixing" };
    println!("═══ Two-stage solve ({label}) ═══");
    let cfg = config(axial_gauge);
    let acc = Rc::new(RefCell::new(HostAccelerator::new()));
    let registry = Rc::new(RefCell::new(NamedObjectMap::new()));
    let solver = new_solver(op, gauge, &cfg, &acc, &registry)?;
    let geom = gauge.geometry();
    let chi = SpinorField::random(geom, 21);

    let mut psi = SpinorField::zeros(geom);
    let plain = solver.solve(&mut psi, &chi)?;
    let rel = mdagm_relative_residual(op.as_ref(), &psi, &chi);
    println!("  no predictor: {} iterations, relative residual {rel:.3e}", plain.iterations);
    harness.check_upper(&format!("{label}: M†M residual"), rel, cfg.max_tolerated());
    harness.check_rel(
        &format!("{label}: reported residual"),
        plain.residual,
        rel * chi.norm_sq(Subset::Odd).sqrt(),
        1e-6,
    );

    let mut mre = MinimalResidualPredictor::new(4);
    let mut first = SpinorField::zeros(geom);
    let cold = solver.solve_with(&mut first, &chi, Predictor::TwoStep(&mut mre))?;
    let mut second = SpinorField::zeros(geom);
    let warm = solver.solve_with(&mut second, &chi, Predictor::TwoStep(&mut mre))?;
    let rel = mdagm_relative_residual(op.as_ref(), &second, &chi);
    println!(
        "  minimal residual predictor: {} then {} iterations, relative residual {rel:.3e}",
        cold.iterations, warm.iterations
    );
    harness.check_upper(&format!("{label}: MRE residual"), rel, cfg.max_tolerated());
    harness.check_bool(&format!("{label}: MRE guess saves iterations"), warm.iterations < cold.iterations);

    let resident = ResidentChronoPredictor::new(3, 0, 1);
    let mut psi_r = SpinorField::zeros(geom);
    let res = solver.solve_with(&mut psi_r, &chi, Predictor::AcceleratorResident(&resident))?;
    let rel = mdagm_relative_residual(op.as_ref(), &psi_r, &chi);
    println!("  resident chronology: {} iterations, relative residual {rel:.3e}", res.iterations);
    harness.check_upper(&format!("{label}: resident residual"), rel, cfg.max_tolerated());
    harness.check_bool(
        &format!("{label}: base parameters untouched"),
        solver.invert_param().chrono.is_off() && !solver.invert_param().use_init_guess,
    );

    let first_handle = solver.subspace_handle()?;
    drop(solver);
    let again = new_solver(op, gauge, &cfg, &acc, &registry)?;
    let recovered = again.subspace_handle()? == first_handle;
    println!("  second solver recovered subspace: {recovered}");
    harness.check_bool(&format!("{label}: subspace recovered"), recovered);
    harness.check_bool(&format!("{label}: one live subspace"), acc.borrow().live_subspaces() == 1);
    println!();
    Ok(())
}

fn check_rejections(harness: &mut ValidationHarness, gauge: &GaugeField, op: &Rc<EvenOddPrecCloverOperator>) {
    println!("═══ Configuration checks ═══");
    let acc = Rc::new(RefCell::new(HostAccelerator::new()));
    let registry = Rc::new(RefCell::new(NamedObjectMap::new()));
    let cfg = SolverConfiguration {
        multigrid: None,
        ..config(false)
    };
    let rejected = matches!(
        new_solver(op, gauge, &cfg, &acc, &registry),
        Err(SolverError::MissingMultigridParams)
    );
    harness.check_bool("missing multigrid parameters rejected", rejected);
    harness.check_bool("nothing staged on rejection", acc.borrow().live_subspaces() == 0);
    println!();
}

fn run(harness: &mut ValidationHarness) -> Result<(), SolverError> {
    let gauge = GaugeField::random(Geometry::new(DIMS), 4242, 0.45);
    println!("  lattice {DIMS:?}, plaquette = {:.6}", gauge.average_plaquette());
    println!();
    let op = Rc::new(EvenOddPrecCloverOperator::new(&gauge, &clover_params())?);

    check_staging(harness, &gauge, &op)?;
    check_solves(harness, &gauge, &op, false)?;
    check_solves(harness, &gauge, &op, true)?;
    check_rejections(harness, &gauge, &op);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  Multigrid clover M†M solver                                ║");
    println!("║  staging, Y/X stages, predictors, subspace lifecycle        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let mut harness = ValidationHarness::new("mg_clover");
    if let Err(e) = run(&mut harness) {
        abort(&e);
    }
    harness.finish();
}
