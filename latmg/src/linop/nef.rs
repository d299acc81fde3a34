// SPDX-License-Identifier: AGPL-3.0-only

//! Even-odd preconditioned generalised NEF domain-wall operator.
//!
//! The 5D operator couples `N5` copies of the 4D field through the chiral
//! projectors `P± = (1 ± γ5)/2`:
//!
//! ```text
//! f+[s] = b5[s] (4 − M5) + 1
//! f−[s] = c5[s] (4 − M5) − 1
//! ```
//!
//! The diagonal block (no gauge hopping) is tridiagonal in `s` with
//! corner terms proportional to the quark mass `m_q`, and is inverted
//! exactly by an LU sweep whose coefficients (`l`, `r`, `a`, `b`, `d`) are
//! computed once at construction. The off-diagonal block applies the 4D
//! Wilson hopping term between checkerboards. The preconditioned operator
//! acts on the odd checkerboard:
//!
//! ```text
//! M = A_oo − D_oe A_ee⁻¹ D_eo
//! ```
//!
//! Only the hopping blocks depend on the links, so the link derivative of
//! `Re⟨χ, M ψ⟩` is assembled from two off-diagonal derivatives:
//!
//! ```text
//! δ⟨χ, M ψ⟩ = −⟨χ, δD_oe A_ee⁻¹ D_eo ψ⟩ − ⟨A_ee⁻¹(−s) D_eo(−s) χ, δD_eo ψ⟩
//! ```
//!
//! # References
//!
//! - Edwards & Heller, Phys. Rev. D 63, 094505 (2001)
//! - Brower, Neff & Orginos, Nucl. Phys. Proc. Suppl. 140, 686 (2005)

use rayon::prelude::*;

use super::{LinearOperatorArray, Sign};
use crate::error::NefError;
use crate::lattice::complex_f64::Complex64;
use crate::lattice::constants::{LATTICE_DIVISION_GUARD, N_DIM};
use crate::lattice::dslash::WilsonDslash;
use crate::lattice::gauge::{GaugeField, GaugeForce, Geometry, Parity, Subset};
use crate::lattice::spinor::{Spinor, SpinorField};

/// Fifth-dimension coefficients and the LU factors of the diagonal block.
#[derive(Clone, Debug, PartialEq)]
pub struct NefCoefficients {
    n5: usize,
    m_q: f64,
    b5: Vec<f64>,
    c5: Vec<f64>,
    f_plus: Vec<f64>,
    f_minus: Vec<f64>,
    l: Vec<f64>,
    r: Vec<f64>,
    a: Vec<f64>,
    b: Vec<f64>,
    d: Vec<f64>,
}

impl NefCoefficients {
    /// # Errors
    ///
    /// [`NefError::ExtentTooSmall`] for `N5 < 2`,
    /// [`NefError::CoefficientLength`] when `b5` and `c5` differ in length,
    /// [`NefError::SingularPivot`] when a diagonal pivot vanishes.
    pub fn new(b5: &[f64], c5: &[f64], height: f64, m_q: f64) -> Result<Self, NefError> {
        let n5 = b5.len();
        if c5.len() != n5 {
            return Err(NefError::CoefficientLength {
                n5,
                b5: b5.len(),
                c5: c5.len(),
            });
        }
        if n5 < 2 {
            return Err(NefError::ExtentTooSmall(n5));
        }

        let nd_minus_m5 = N_DIM as f64 - height;
        let f_plus: Vec<f64> = b5.iter().map(|&b| b * nd_minus_m5 + 1.0).collect();
        let f_minus: Vec<f64> = c5.iter().map(|&c| c * nd_minus_m5 - 1.0).collect();
        if let Some(slice) = f_plus.iter().position(|f| f.abs() < LATTICE_DIVISION_GUARD) {
            return Err(NefError::SingularPivot { slice });
        }

        let mut l = vec![0.0; n5 - 1];
        let mut r = vec![0.0; n5 - 1];
        l[0] = -m_q * f_minus[n5 - 1] / f_plus[0];
        r[0] = -m_q * f_minus[0] / f_plus[0];
        for i in 1..n5 - 1 {
            l[i] = -(f_minus[i - 1] / f_plus[i]) * l[i - 1];
            r[i] = -(f_minus[i] / f_plus[i]) * r[i - 1];
        }

        let a: Vec<f64> = (0..n5 - 1).map(|i| f_minus[i + 1] / f_plus[i]).collect();
        let b: Vec<f64> = (0..n5 - 1).map(|i| f_minus[i] / f_plus[i]).collect();

        let mut d = f_plus.clone();
        d[n5 - 1] -= f_minus[n5 - 2] * l[n5 - 2];
        if d[n5 - 1].abs() < LATTICE_DIVISION_GUARD {
            return Err(NefError::SingularPivot { slice: n5 - 1 });
        }

        Ok(Self {
            n5,
            m_q,
            b5: b5.to_vec(),
            c5: c5.to_vec(),
            f_plus,
            f_minus,
            l,
            r,
            a,
            b,
            d,
        })
    }

    #[must_use]
    pub const fn n5(&self) -> usize {
        self.n5
    }

    #[must_use]
    pub const fn quark_mass(&self) -> f64 {
        self.m_q
    }

    #[must_use]
    pub fn f_plus(&self) -> &[f64] {
        &self.f_plus
    }

    #[must_use]
    pub fn f_minus(&self) -> &[f64] {
        &self.f_minus
    }

    /// Last pivot correction computed from the left and from the right
    /// factor; the two agree analytically, so this measures roundoff.
    #[must_use]
    pub fn pivot_discrepancy(&self) -> f64 {
        let n = self.n5;
        (self.f_minus[n - 2] * self.l[n - 2] - self.f_minus[n - 1] * self.r[n - 2]).abs()
    }

    /// `A ψ` on one site's fifth-dimension column.
    fn diag_site(&self, psi: &[Spinor], sign: Sign) -> Vec<Spinor> {
        let n = self.n5;
        let m = self.m_q;
        let (fp, fm) = (&self.f_plus, &self.f_minus);
        let mut chi = Vec::with_capacity(n);
        match sign {
            Sign::Plus => {
                let t1 = psi[1] - psi[n - 1] * m;
                let t2 = psi[1] + psi[n - 1] * m;
                chi.push(psi[0] * fp[0] + (t1 - t2.gamma5()) * (0.5 * fm[0]));
                for s in 1..n - 1 {
                    let t1 = psi[s - 1] + psi[s + 1];
                    let t2 = psi[s - 1] - psi[s + 1];
                    chi.push(psi[s] * fp[s] + (t1 + t2.gamma5()) * (0.5 * fm[s]));
                }
                let t1 = psi[n - 2] - psi[0] * m;
                let t2 = psi[n - 2] + psi[0] * m;
                chi.push(psi[n - 1] * fp[n - 1] + (t1 + t2.gamma5()) * (0.5 * fm[n - 1]));
            }
            Sign::Minus => {
                let t1 = psi[1] * fm[1] - psi[n - 1] * (m * fm[n - 1]);
                let t2 = psi[1] * fm[1] + psi[n - 1] * (m * fm[n - 1]);
                chi.push(psi[0] * fp[0] + (t1 + t2.gamma5()) * 0.5);
                for s in 1..n - 1 {
                    let t1 = psi[s - 1] * fm[s - 1] + psi[s + 1] * fm[s + 1];
                    let t2 = psi[s - 1] * fm[s - 1] - psi[s + 1] * fm[s + 1];
                    chi.push(psi[s] * fp[s] + (t1 - t2.gamma5()) * 0.5);
                }
                let t1 = psi[n - 2] * fm[n - 2] - psi[0] * (m * fm[0]);
                let t2 = psi[n - 2] * fm[n - 2] + psi[0] * (m * fm[0]);
                chi.push(psi[n - 1] * fp[n - 1] + (t1 - t2.gamma5()) * 0.5);
            }
        }
        chi
    }

    /// `A⁻¹ ψ` on one site's column: forward sweep, pivot division,
    /// backward sweep, then the corner correction.
    fn diag_inv_site(&self, psi: &[Spinor], sign: Sign) -> Vec<Spinor> {
        let n = self.n5;
        // Factors for (first corner, forward, backward, last corner) and the
        // γ5 sign of the projector each one multiplies.
        let (corner_in, fwd, bwd, corner_out, g5_in, g5_fwd, g5_bwd, g5_out) = match sign {
            Sign::Plus => (&self.l, &self.a, &self.b, &self.r, -1.0, 1.0, -1.0, 1.0),
            Sign::Minus => (&self.r, &self.b, &self.a, &self.l, 1.0, -1.0, 1.0, -1.0),
        };
        let proj = |v: Spinor, g: f64| v + v.gamma5() * g;

        let mut z = psi.to_vec();
        for s in 0..n - 1 {
            z[n - 1] -= proj(psi[s], g5_in) * (0.5 * corner_in[s]);
        }

        let mut zp = vec![Spinor::ZERO; n];
        zp[0] = z[0];
        for s in 0..n - 1 {
            zp[s + 1] = z[s + 1] - proj(zp[s], g5_fwd) * (0.5 * fwd[s]);
        }

        for s in 0..n {
            z[s] = zp[s] * (1.0 / self.d[s]);
        }

        zp[n - 1] = z[n - 1];
        for s in (0..n - 1).rev() {
            zp[s] = z[s] - proj(zp[s + 1], g5_bwd) * (0.5 * bwd[s]);
        }

        let last = zp[n - 1];
        let mut chi = zp;
        for s in 0..n - 1 {
            chi[s] -= proj(last, g5_out) * (0.5 * corner_out[s]);
        }
        chi
    }

    /// Fifth-dimension part of the off-diagonal block, applied before the
    /// hopping term (`Plus`) or after it (`Minus`).
    fn hop_site(&self, psi: &[Spinor], sign: Sign) -> Vec<Spinor> {
        let n = self.n5;
        let m = self.m_q;
        let (b5, c5) = (&self.b5, &self.c5);
        let mut chi = Vec::with_capacity(n);
        match sign {
            Sign::Plus => {
                let t1 = psi[1] - psi[n - 1] * m;
                let t2 = psi[1] + psi[n - 1] * m;
                chi.push(psi[0] * (-0.5 * b5[0]) + (t1 - t2.gamma5()) * (-0.25 * c5[0]));
                for s in 1..n - 1 {
                    let t1 = psi[s - 1] + psi[s + 1];
                    let t2 = psi[s - 1] - psi[s + 1];
                    chi.push(psi[s] * (-0.5 * b5[s]) + (t1 + t2.gamma5()) * (-0.25 * c5[s]));
                }
                let t1 = psi[n - 2] - psi[0] * m;
                let t2 = psi[n - 2] + psi[0] * m;
                chi.push(psi[n - 1] * (-0.5 * b5[n - 1]) + (t1 + t2.gamma5()) * (-0.25 * c5[n - 1]));
            }
            Sign::Minus => {
                let t1 = psi[1] * c5[1] - psi[n - 1] * (m * c5[n - 1]);
                let t2 = psi[1] * c5[1] + psi[n - 1] * (m * c5[n - 1]);
                chi.push(psi[0] * (-0.5 * b5[0]) - (t1 + t2.gamma5()) * 0.25);
                for s in 1..n - 1 {
                    let t1 = psi[s - 1] * c5[s - 1] + psi[s + 1] * c5[s + 1];
                    let t2 = psi[s - 1] * c5[s - 1] - psi[s + 1] * c5[s + 1];
                    chi.push(psi[s] * (-0.5 * b5[s]) - (t1 - t2.gamma5()) * 0.25);
                }
                let t1 = psi[n - 2] * c5[n - 2] - psi[0] * (m * c5[0]);
                let t2 = psi[n - 2] * c5[n - 2] + psi[0] * (m * c5[0]);
                chi.push(psi[n - 1] * (-0.5 * b5[n - 1]) - (t1 - t2.gamma5()) * 0.25);
            }
        }
        chi
    }
}

/// Run `kernel` on every fifth-dimension column at sites of parity `cb`
/// and scatter the result into `chi`.
fn map_columns<F>(chi: &mut [SpinorField], psi: &[SpinorField], cb: Parity, kernel: F)
where
    F: Fn(&[Spinor]) -> Vec<Spinor> + Sync,
{
    let Some(first) = psi.first() else {
        return;
    };
    let geom = first.geometry();
    let columns: Vec<(usize, Vec<Spinor>)> = geom
        .sites(Subset::from(cb))
        .into_par_iter()
        .map(|idx| {
            let column: Vec<Spinor> = psi.iter().map(|f| f.data()[idx]).collect();
            (idx, kernel(&column))
        })
        .collect();
    for (idx, column) in columns {
        for (field, v) in chi.iter_mut().zip(column) {
            field.data_mut()[idx] = v;
        }
    }
}

/// `M = A_oo − D_oe A_ee⁻¹ D_eo` for generalised NEF domain-wall fermions.
#[derive(Clone, Debug)]
pub struct EvenOddPrecNefOperator {
    gauge: GaugeField,
    dslash: WilsonDslash,
    coeffs: NefCoefficients,
}

impl EvenOddPrecNefOperator {
    /// # Errors
    ///
    /// See [`NefCoefficients::new`].
    pub fn new(gauge: &GaugeField, height: f64, m_q: f64, b5: &[f64], c5: &[f64]) -> Result<Self, NefError> {
        let coeffs = NefCoefficients::new(b5, c5, height, m_q)?;
        Ok(Self {
            gauge: gauge.clone(),
            dslash: WilsonDslash::isotropic(),
            coeffs,
        })
    }

    #[must_use]
    pub const fn coefficients(&self) -> &NefCoefficients {
        &self.coeffs
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.gauge.geometry()
    }

    fn zeros(&self) -> Vec<SpinorField> {
        vec![SpinorField::zeros(self.gauge.geometry()); self.coeffs.n5]
    }

    /// Diagonal block on the sites of parity `cb`.
    pub fn apply_diag(&self, chi: &mut [SpinorField], psi: &[SpinorField], sign: Sign, cb: Parity) {
        debug_assert_eq!(psi.len(), self.coeffs.n5);
        map_columns(chi, psi, cb, |col| self.coeffs.diag_site(col, sign));
    }

    /// Exact inverse of the diagonal block on the sites of parity `cb`.
    pub fn apply_diag_inv(&self, chi: &mut [SpinorField], psi: &[SpinorField], sign: Sign, cb: Parity) {
        debug_assert_eq!(psi.len(), self.coeffs.n5);
        map_columns(chi, psi, cb, |col| self.coeffs.diag_inv_site(col, sign));
    }

    /// Off-diagonal block: reads `cb.other()` sites of `psi`, writes `cb`.
    pub fn apply_off_diag(&self, chi: &mut [SpinorField], psi: &[SpinorField], sign: Sign, cb: Parity) {
        debug_assert_eq!(psi.len(), self.coeffs.n5);
        match sign {
            Sign::Plus => {
                let mut tmp = self.zeros();
                map_columns(&mut tmp, psi, cb.other(), |col| self.coeffs.hop_site(col, sign));
                for (out, t) in chi.iter_mut().zip(&tmp) {
                    self.dslash.apply(&self.gauge, out, t, sign, cb);
                }
            }
            Sign::Minus => {
                let mut hopped = self.zeros();
                for (h, p) in hopped.iter_mut().zip(psi) {
                    self.dslash.apply(&self.gauge, h, p, sign, cb);
                }
                map_columns(chi, &hopped, cb, |col| self.coeffs.hop_site(col, sign));
            }
        }
    }

    /// Link derivative of `Re Σ_s ⟨χ_s, (D(sign) ψ)_s⟩` for the
    /// off-diagonal block writing parity `cb`. `chi` is read on `cb`,
    /// `psi` on `cb.other()`.
    ///
    /// The fifth-dimension weights sit on `psi` for `Plus`; for `Minus` they
    /// are moved onto `chi` through the adjoint, which is the `Plus` weight.
    #[must_use]
    pub fn apply_deriv_off_diag(&self, chi: &[SpinorField], psi: &[SpinorField], sign: Sign, cb: Parity) -> GaugeForce {
        debug_assert_eq!(chi.len(), self.coeffs.n5);
        debug_assert_eq!(psi.len(), self.coeffs.n5);
        let mut force = GaugeForce::zeros(self.gauge.geometry());
        let mut tmp = self.zeros();
        match sign {
            Sign::Plus => {
                map_columns(&mut tmp, psi, cb.other(), |col| self.coeffs.hop_site(col, Sign::Plus));
                for (c, t) in chi.iter().zip(&tmp) {
                    force.accumulate(1.0, &self.dslash.deriv(&self.gauge, c, t, sign, cb));
                }
            }
            Sign::Minus => {
                map_columns(&mut tmp, chi, cb, |col| self.coeffs.hop_site(col, Sign::Plus));
                for (t, p) in tmp.iter().zip(psi) {
                    force.accumulate(1.0, &self.dslash.deriv(&self.gauge, t, p, sign, cb));
                }
            }
        }
        force
    }

    /// Link derivative of `Re Σ_s ⟨χ_s, (M(sign) ψ)_s⟩` with `χ`, `ψ` on
    /// the odd checkerboard.
    #[must_use]
    pub fn deriv(&self, chi: &[SpinorField], psi: &[SpinorField], sign: Sign) -> GaugeForce {
        let msign = sign.flip();

        let mut hopped = self.zeros();
        let mut solved = self.zeros();
        self.apply_off_diag(&mut hopped, psi, sign, Parity::Even);
        self.apply_diag_inv(&mut solved, &hopped, sign, Parity::Even);
        let mut force = self.apply_deriv_off_diag(chi, &solved, sign, Parity::Odd);

        let mut hopped = self.zeros();
        let mut solved = self.zeros();
        self.apply_off_diag(&mut hopped, chi, msign, Parity::Even);
        self.apply_diag_inv(&mut solved, &hopped, msign, Parity::Even);
        force.accumulate(1.0, &self.apply_deriv_off_diag(&solved, psi, sign, Parity::Even));

        force.scale(-1.0);
        force
    }

    /// `D−(s) ψ = f−[s] ψ − ½ c5[s] D ψ` on the full lattice.
    pub fn apply_dminus(&self, chi: &mut SpinorField, psi: &SpinorField, sign: Sign, s5: usize) {
        let mut hop = SpinorField::zeros(self.gauge.geometry());
        self.dslash.apply(&self.gauge, &mut hop, psi, sign, Parity::Even);
        self.dslash.apply(&self.gauge, &mut hop, psi, sign, Parity::Odd);
        chi.assign(psi, Subset::All);
        chi.scale(Complex64::real(self.coeffs.f_minus[s5]), Subset::All);
        chi.axpy(Complex64::real(-0.5 * self.coeffs.c5[s5]), &hop, Subset::All);
    }
}

impl LinearOperatorArray for EvenOddPrecNefOperator {
    fn size(&self) -> usize {
        self.coeffs.n5
    }

    fn apply(&self, chi: &mut [SpinorField], psi: &[SpinorField], sign: Sign) {
        let mut t1 = self.zeros();
        let mut t2 = self.zeros();
        let mut t3 = self.zeros();

        self.apply_off_diag(&mut t1, psi, sign, Parity::Even);
        self.apply_diag_inv(&mut t2, &t1, sign, Parity::Even);
        self.apply_off_diag(&mut t3, &t2, sign, Parity::Odd);

        self.apply_diag(chi, psi, sign, Parity::Odd);
        for (c, t) in chi.iter_mut().zip(&t3) {
            c.axpy(Complex64::real(-1.0), t, Subset::Odd);
        }
    }

    fn subset(&self) -> Subset {
        Subset::Odd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::su3::Su3Matrix;

    const HEIGHT: f64 = 1.5;
    const MQ: f64 = 0.05;

    fn random_5d(geom: Geometry, n5: usize, seed: u64) -> Vec<SpinorField> {
        (0..n5).map(|s| SpinorField::random(geom, seed + s as u64)).collect()
    }

    fn dot_5d(x: &[SpinorField], y: &[SpinorField], subset: Subset) -> Complex64 {
        x.iter().zip(y).map(|(a, b)| a.dot(b, subset)).sum()
    }

    fn operator(b5: &[f64], c5: &[f64]) -> EvenOddPrecNefOperator {
        let geom = Geometry::new([4, 4, 4, 4]);
        let gauge = GaugeField::random(geom, 31, 0.5);
        EvenOddPrecNefOperator::new(&gauge, HEIGHT, MQ, b5, c5).expect("valid NEF coefficients")
    }

    #[test]
    fn rejects_short_extent() {
        assert_eq!(NefCoefficients::new(&[1.0], &[0.0], HEIGHT, MQ), Err(NefError::ExtentTooSmall(1)));
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let err = NefCoefficients::new(&[1.0; 4], &[0.0; 3], HEIGHT, MQ).unwrap_err();
        assert_eq!(err, NefError::CoefficientLength { n5: 4, b5: 4, c5: 3 });
    }

    #[test]
    fn rejects_zero_pivot() {
        // f+ = b5 (4 − M5) + 1 vanishes for b5 = −½ at M5 = 2
        let err = NefCoefficients::new(&[1.0, -0.5, 1.0], &[0.0; 3], 2.0, MQ).unwrap_err();
        assert_eq!(err, NefError::SingularPivot { slice: 1 });
    }

    #[test]
    fn pivot_corrections_agree() {
        let b5 = [1.2, 0.9, 1.1, 1.0, 0.8, 1.3];
        let c5 = [0.1, 0.3, 0.2, 0.0, 0.25, 0.15];
        let k = NefCoefficients::new(&b5, &c5, HEIGHT, 0.3).expect("coefficients");
        let scale = (k.f_minus()[4] * k.l[4]).abs().max(1e-300);
        assert!(k.pivot_discrepancy() <= 1e-13 * scale, "discrepancy {}", k.pivot_discrepancy());
    }

    #[test]
    fn diag_inverse_round_trip() {
        let b5 = [1.0, 1.1, 0.9, 1.2];
        let c5 = [0.2, 0.1, 0.3, 0.0];
        let op = operator(&b5, &c5);
        let geom = op.geometry();
        let psi = random_5d(geom, 4, 100);
        for sign in [Sign::Plus, Sign::Minus] {
            let mut a = op.zeros();
            let mut back = op.zeros();
            op.apply_diag(&mut a, &psi, sign, Parity::Odd);
            op.apply_diag_inv(&mut back, &a, sign, Parity::Odd);
            for (x, y) in back.iter().zip(&psi) {
                let mut diff = x.clone();
                diff.axpy(Complex64::real(-1.0), y, Subset::Odd);
                assert!(diff.norm_sq(Subset::Odd) < 1e-20 * y.norm_sq(Subset::Odd), "{sign:?}");
            }
        }
    }

    #[test]
    fn diag_minus_is_adjoint() {
        let op = operator(&[1.0, 1.1, 0.9], &[0.2, 0.1, 0.3]);
        let geom = op.geometry();
        let x = random_5d(geom, 3, 200);
        let y = random_5d(geom, 3, 300);
        let mut ay = op.zeros();
        let mut adx = op.zeros();
        op.apply_diag(&mut ay, &y, Sign::Plus, Parity::Even);
        op.apply_diag(&mut adx, &x, Sign::Minus, Parity::Even);
        let lhs = dot_5d(&x, &ay, Subset::Even);
        let rhs = dot_5d(&adx, &y, Subset::Even);
        assert!((lhs - rhs).abs() < 1e-10 * lhs.abs(), "{lhs} vs {rhs}");
    }

    #[test]
    fn off_diag_minus_is_adjoint() {
        let op = operator(&[1.0, 1.1, 0.9, 1.05], &[0.2, 0.1, 0.3, 0.05]);
        let geom = op.geometry();
        let x = random_5d(geom, 4, 400);
        let y = random_5d(geom, 4, 500);
        let mut dy = op.zeros();
        let mut ddx = op.zeros();
        op.apply_off_diag(&mut dy, &y, Sign::Plus, Parity::Odd);
        op.apply_off_diag(&mut ddx, &x, Sign::Minus, Parity::Even);
        let lhs = dot_5d(&x, &dy, Subset::Odd);
        let rhs = dot_5d(&ddx, &y, Subset::Even);
        assert!((lhs - rhs).abs() < 1e-10 * lhs.abs(), "{lhs} vs {rhs}");
    }

    #[test]
    fn preconditioned_minus_is_adjoint() {
        let op = operator(&[1.0; 4], &[0.0; 4]);
        let geom = op.geometry();
        let x = random_5d(geom, 4, 600);
        let y = random_5d(geom, 4, 700);
        let mut my = op.zeros();
        let mut mdx = op.zeros();
        op.apply(&mut my, &y, Sign::Plus);
        op.apply(&mut mdx, &x, Sign::Minus);
        let lhs = dot_5d(&x, &my, Subset::Odd);
        let rhs = dot_5d(&mdx, &y, Subset::Odd);
        assert!((lhs - rhs).abs() < 1e-10 * lhs.abs(), "{lhs} vs {rhs}");
    }

    fn perturbed(gauge: &GaugeField, delta: &[Su3Matrix], eps: f64) -> GaugeField {
        let links = gauge.links().iter().zip(delta).map(|(u, d)| *u + d.scale(eps)).collect();
        GaugeField::from_links(gauge.geometry(), links).expect("same layout")
    }

    #[test]
    fn off_diag_deriv_matches_finite_difference() {
        let geom = Geometry::new([4, 4, 2, 4]);
        let gauge = GaugeField::random(geom, 37, 0.5);
        let (b5, c5) = ([1.2, 0.9, 1.1], [0.3, 0.1, 0.2]);
        let chi = random_5d(geom, 3, 800);
        let psi = random_5d(geom, 3, 900);
        let mut seed = 1000;
        let delta: Vec<Su3Matrix> = (0..geom.volume() * N_DIM)
            .map(|_| Su3Matrix::random_near_identity(&mut seed, 0.5) - Su3Matrix::IDENTITY)
            .collect();

        let eps = 0.1;
        let at = |e: f64| {
            EvenOddPrecNefOperator::new(&perturbed(&gauge, &delta, e), HEIGHT, 0.2, &b5, &c5).expect("coefficients")
        };
        let (op, up, down) = (at(0.0), at(eps), at(-eps));

        for sign in [Sign::Plus, Sign::Minus] {
            for cb in [Parity::Even, Parity::Odd] {
                let action = |o: &EvenOddPrecNefOperator| {
                    let mut out = o.zeros();
                    o.apply_off_diag(&mut out, &psi, sign, cb);
                    dot_5d(&chi, &out, Subset::from(cb)).re
                };
                let fd = (action(&up) - action(&down)) / (2.0 * eps);
                let analytic = op.apply_deriv_off_diag(&chi, &psi, sign, cb).contract(&delta);
                assert!(
                    (fd - analytic).abs() < 1e-10 * analytic.abs(),
                    "{sign:?} {cb:?}: {fd} vs {analytic}"
                );
            }
        }
    }

    #[test]
    fn dminus_on_cold_links_is_local() {
        let geom = Geometry::new([4, 4, 4, 4]);
        let gauge = GaugeField::cold_start(geom);
        let op = EvenOddPrecNefOperator::new(&gauge, HEIGHT, MQ, &[1.0, 1.0], &[0.0, 0.0]).expect("coefficients");
        let psi = SpinorField::random(geom, 9);
        let mut chi = SpinorField::zeros(geom);
        op.apply_dminus(&mut chi, &psi, Sign::Plus, 0);
        // c5 = 0 leaves D−(s) = f−[s] = −1
        let mut diff = chi;
        diff.axpy(Complex64::ONE, &psi, Subset::All);
        assert!(diff.norm_sq(Subset::All) < 1e-24);
    }
}
