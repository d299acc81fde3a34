// SPDX-License-Identifier: AGPL-3.0-only

//! NEF domain-wall diagonal block validation.
//!
//! For several fifth-dimension extents and coefficient sets:
//!   - `A⁻¹ A ψ = ψ` for both orientations
//!   - the two last-pivot corrections agree
//!   - `⟨x, A y⟩ = ⟨A† x, y⟩` for the diagonal block
//!   - `⟨x, M y⟩ = ⟨M† x, y⟩` for the preconditioned Schur complement
//!   - the link derivative of `Re⟨x, M y⟩` against a central difference

use latmg::lattice::complex_f64::Complex64;
use latmg::lattice::constants::N_DIM;
use latmg::lattice::gauge::{GaugeField, Geometry, Parity, Subset};
use latmg::lattice::spinor::SpinorField;
use latmg::lattice::su3::Su3Matrix;
use latmg::linop::{EvenOddPrecNefOperator, LinearOperatorArray, Sign};
use latmg::tolerances::{
    NEF_FORCE_FINITE_DIFFERENCE_REL, NEF_PIVOT_DISCREPANCY_ABS, NEF_ROUND_TRIP_REL, OPERATOR_ADJOINT_REL,
};
use latmg::validation::ValidationHarness;

const HEIGHT: f64 = 1.8;
const QUARK_MASS: f64 = 0.02;

struct Case {
    label: &'static str,
    b5: Vec<f64>,
    c5: Vec<f64>,
}

fn cases() -> Vec<Case> {
    vec![
        Case {
            label: "Shamir N5=2",
            b5: vec![1.0; 2],
            c5: vec![0.0; 2],
        },
        Case {
            label: "Borici N5=8",
            b5: vec![1.0; 8],
            c5: vec![1.0; 8],
        },
        Case {
            label: "Mobius N5=12",
            b5: vec![1.5; 12],
            c5: vec![0.5; 12],
        },
        Case {
            label: "varying N5=6",
            b5: (0..6).map(|s| 1.0 + 0.1 * s as f64).collect(),
            c5: (0..6).map(|s| 0.3 - 0.05 * s as f64).collect(),
        },
    ]
}

fn random_5d(geom: Geometry, n5: usize, seed: u64) -> Vec<SpinorField> {
    (0..n5).map(|s| SpinorField::random(geom, seed + s as u64)).collect()
}

fn dot_5d(x: &[SpinorField], y: &[SpinorField], subset: Subset) -> Complex64 {
    x.iter().zip(y).map(|(a, b)| a.dot(b, subset)).sum()
}

fn rel_diff_5d(x: &[SpinorField], y: &[SpinorField], subset: Subset) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (a, b) in x.iter().zip(y) {
        let mut d = a.clone();
        d.axpy(Complex64::real(-1.0), b, subset);
        num += d.norm_sq(subset);
        den += b.norm_sq(subset);
    }
    (num / den).sqrt()
}

/// `Re⟨x, M y⟩` on links shifted by `eps · delta`.
fn shifted_action(
    gauge: &GaugeField,
    delta: &[Su3Matrix],
    eps: f64,
    case: &Case,
    x: &[SpinorField],
    y: &[SpinorField],
    sign: Sign,
) -> Option<f64> {
    let links = gauge.links().iter().zip(delta).map(|(u, d)| *u + d.scale(eps)).collect();
    let shifted = GaugeField::from_links(gauge.geometry(), links)?;
    let op = EvenOddPrecNefOperator::new(&shifted, HEIGHT, QUARK_MASS, &case.b5, &case.c5).ok()?;
    let mut my = vec![SpinorField::zeros(gauge.geometry()); op.size()];
    LinearOperatorArray::apply(&op, &mut my, y, sign);
    Some(dot_5d(x, &my, Subset::Odd).re)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  NEF domain-wall diagonal block                             ║");
    println!("║  exact inverse, pivot identity, adjoint orientation         ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let mut harness = ValidationHarness::new("nef_diag");
    let geom = Geometry::new([4, 4, 4, 4]);
    let gauge = GaugeField::random(geom, 2024, 0.4);
    let mut link_seed = 4048;
    let delta: Vec<Su3Matrix> = (0..geom.volume() * N_DIM)
        .map(|_| Su3Matrix::random_near_identity(&mut link_seed, 0.5) - Su3Matrix::IDENTITY)
        .collect();

    for (i, case) in cases().iter().enumerate() {
        println!("═══ {} ═══", case.label);
        let op = match EvenOddPrecNefOperator::new(&gauge, HEIGHT, QUARK_MASS, &case.b5, &case.c5) {
            Ok(op) => op,
            Err(e) => {
                harness.check_bool(&format!("{}: construction ({e})", case.label), false);
                continue;
            }
        };
        let n5 = op.size();
        let seed = 100 * i as u64;
        let psi = random_5d(geom, n5, seed);

        for sign in [Sign::Plus, Sign::Minus] {
            let mut a_psi = random_5d(geom, n5, seed + 50);
            let mut back = random_5d(geom, n5, seed + 60);
            op.apply_diag(&mut a_psi, &psi, sign, Parity::Odd);
            op.apply_diag_inv(&mut back, &a_psi, sign, Parity::Odd);
            let err = rel_diff_5d(&back, &psi, Subset::Odd);
            println!("  {sign:?}: |A⁻¹Aψ − ψ|/|ψ| = {err:.3e}");
            harness.check_upper(&format!("{}: round trip {sign:?}", case.label), err, NEF_ROUND_TRIP_REL);
        }

        let pivot = op.coefficients().pivot_discrepancy();
        println!("  pivot discrepancy = {pivot:.3e}");
        harness.check_upper(&format!("{}: pivot identity", case.label), pivot, NEF_PIVOT_DISCREPANCY_ABS);

        let x = random_5d(geom, n5, seed + 10);
        let y = random_5d(geom, n5, seed + 20);
        let mut ay = random_5d(geom, n5, 0);
        let mut adx = random_5d(geom, n5, 0);
        op.apply_diag(&mut ay, &y, Sign::Plus, Parity::Even);
        op.apply_diag(&mut adx, &x, Sign::Minus, Parity::Even);
        let lhs = dot_5d(&x, &ay, Subset::Even);
        let rhs = dot_5d(&adx, &y, Subset::Even);
        harness.check_upper(
            &format!("{}: diagonal adjoint", case.label),
            (lhs - rhs).abs() / lhs.abs(),
            OPERATOR_ADJOINT_REL,
        );

        let mut my = random_5d(geom, n5, 0);
        let mut mdx = random_5d(geom, n5, 0);
        LinearOperatorArray::apply(&op, &mut my, &y, Sign::Plus);
        LinearOperatorArray::apply(&op, &mut mdx, &x, Sign::Minus);
        let lhs = dot_5d(&x, &my, Subset::Odd);
        let rhs = dot_5d(&mdx, &y, Subset::Odd);
        let err = (lhs - rhs).abs() / lhs.abs();
        println!("  Schur complement adjoint error = {err:.3e}");
        harness.check_upper(&format!("{}: preconditioned adjoint", case.label), err, OPERATOR_ADJOINT_REL);

        let eps = 0.05;
        for sign in [Sign::Plus, Sign::Minus] {
            let up = shifted_action(&gauge, &delta, eps, case, &x, &y, sign);
            let down = shifted_action(&gauge, &delta, -eps, case, &x, &y, sign);
            let (Some(up), Some(down)) = (up, down) else {
                harness.check_bool(&format!("{}: shifted operator {sign:?}", case.label), false);
                continue;
            };
            let fd = (up - down) / (2.0 * eps);
            let analytic = op.deriv(&x, &y, sign).contract(&delta);
            let err = (fd - analytic).abs() / analytic.abs();
            println!("  {sign:?}: link derivative vs central difference = {err:.3e}");
            harness.check_upper(
                &format!("{}: link derivative {sign:?}", case.label),
                err,
                NEF_FORCE_FINITE_DIFFERENCE_REL,
            );
        }
        println!();
    }

    harness.finish();
}
