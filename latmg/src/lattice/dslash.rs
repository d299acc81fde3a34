// SPDX-License-Identifier: AGPL-3.0-only

//! Wilson hopping term restricted to one checkerboard.
//!
//! ```text
//! D(+) ψ(x) = Σ_μ c_μ [ (1 − γ_μ) U_μ(x) ψ(x+μ) + (1 + γ_μ) U_μ†(x−μ) ψ(x−μ) ]
//! D(−) ψ(x) = Σ_μ c_μ [ (1 + γ_μ) U_μ(x) ψ(x+μ) + (1 − γ_μ) U_μ†(x−μ) ψ(x−μ) ]
//! ```
//!
//! `c_μ` are the anisotropy coefficients (all 1 on an isotropic lattice).
//! No factor ½ is included; the clover operator supplies `−¼ D A⁻¹ D`.
//! `D(−) = γ5 D(+) γ5 = D(+)†`.
//!
//! [`WilsonDslash::deriv`] differentiates `Re⟨χ, D(sign) ψ⟩` with respect to
//! the links. A link `U_μ(x)` with `x` on the output checkerboard enters
//! through the forward hop, and a link based on the other checkerboard
//! through the backward hop of its neighbour:
//!
//! ```text
//! F_μ(x) = c_μ Tr_spin[ (1 ∓ γ_μ) ψ(x+μ) ⊗ χ(x)† ]     x on cb
//! F_μ(y) = c_μ Tr_spin[ (1 ± γ_μ) χ(y+μ) ⊗ ψ(y)† ]     y on the other cb
//! ```
//!
//! # References
//!
//! - Gattringer & Lang, "QCD on the Lattice" (2010), Ch. 5

use rayon::prelude::*;

use super::constants::N_DIM;
use super::gamma::GAMMA;
use super::gauge::{GaugeField, GaugeForce, Parity};
use super::spinor::{Spinor, SpinorField};
use super::su3::Su3Matrix;

/// Orientation of an operator application: `M` or `M†`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::Plus => Self::Minus,
            Self::Minus => Self::Plus,
        }
    }
}

/// Wilson hopping operator with per-direction coefficients.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WilsonDslash {
    coeffs: [f64; N_DIM],
}

impl WilsonDslash {
    #[must_use]
    pub const fn new(coeffs: [f64; N_DIM]) -> Self {
        Self { coeffs }
    }

    #[must_use]
    pub const fn isotropic() -> Self {
        Self::new([1.0; N_DIM])
    }

    #[must_use]
    pub const fn coeffs(&self) -> [f64; N_DIM] {
        self.coeffs
    }

    /// Write `D(sign) ψ` onto the sites of parity `cb`; other sites of
    /// `chi` are not touched. Only the `cb.other()` sites of `psi` are read.
    pub fn apply(&self, gauge: &GaugeField, chi: &mut SpinorField, psi: &SpinorField, sign: Sign, cb: Parity) {
        let geom = gauge.geometry();
        let input = psi.data();
        chi.data_mut()
            .par_iter_mut()
            .enumerate()
            .filter(|(idx, _)| geom.site_parity(*idx) == cb)
            .for_each(|(idx, out)| {
                let mut acc = Spinor::ZERO;
                for mu in 0..N_DIM {
                    let fwd = geom.neighbor_index(idx, mu, true);
                    let bwd = geom.neighbor_index(idx, mu, false);

                    let up = input[fwd].color_mul(&gauge.link(idx, mu));
                    let down = input[bwd].color_adj_mul(&gauge.link(bwd, mu));
                    let g_up = GAMMA[mu].apply(&up);
                    let g_down = GAMMA[mu].apply(&down);

                    let hop = match sign {
                        Sign::Plus => (up - g_up) + (down + g_down),
                        Sign::Minus => (up + g_up) + (down - g_down),
                    };
                    acc += hop * self.coeffs[mu];
                }
                *out = acc;
            });
    }

    /// Link derivative of `Re⟨χ, D(sign) ψ⟩` where `χ` is read on the
    /// sites of parity `cb` and `ψ` on `cb.other()`.
    #[must_use]
    pub fn deriv(&self, gauge: &GaugeField, chi: &SpinorField, psi: &SpinorField, sign: Sign, cb: Parity) -> GaugeForce {
        let geom = gauge.geometry();
        let (chi, psi) = (chi.data(), psi.data());
        // γ_μ sign of the projector on the forward hop.
        let fwd_gamma = match sign {
            Sign::Plus => -1.0,
            Sign::Minus => 1.0,
        };
        let sites: Vec<[Su3Matrix; N_DIM]> = (0..geom.volume())
            .into_par_iter()
            .map(|idx| {
                let on_cb = geom.site_parity(idx) == cb;
                std::array::from_fn(|mu| {
                    let next = geom.neighbor_index(idx, mu, true);
                    let f = if on_cb {
                        let p = psi[next];
                        (p + GAMMA[mu].apply(&p) * fwd_gamma).outer(&chi[idx])
                    } else {
                        let c = chi[next];
                        (c - GAMMA[mu].apply(&c) * fwd_gamma).outer(&psi[idx])
                    };
                    f.scale(self.coeffs[mu])
                })
            })
            .collect();
        GaugeForce::from_sites(geom, &sites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::complex_f64::Complex64;
    use crate::lattice::gauge::{Geometry, Subset};

    fn perturbation(len: usize, seed: u64) -> Vec<Su3Matrix> {
        let mut seed = seed;
        (0..len)
            .map(|_| Su3Matrix::random_near_identity(&mut seed, 0.6) - Su3Matrix::IDENTITY)
            .collect()
    }

    fn shifted(gauge: &GaugeField, delta: &[Su3Matrix], eps: f64) -> GaugeField {
        let links = gauge.links().iter().zip(delta).map(|(u, d)| *u + d.scale(eps)).collect();
        GaugeField::from_links(gauge.geometry(), links).expect("same layout")
    }

    #[test]
    fn deriv_matches_finite_difference() {
        let geom = Geometry::new([4, 4, 2, 4]);
        let gauge = GaugeField::random(geom, 41, 0.6);
        let d = WilsonDslash::new([0.8, 1.0, 1.1, 0.9]);
        let chi = SpinorField::random(geom, 12);
        let psi = SpinorField::random(geom, 13);
        let delta = perturbation(geom.volume() * N_DIM, 14);
        let eps = 0.1;

        for sign in [Sign::Plus, Sign::Minus] {
            for cb in [Parity::Even, Parity::Odd] {
                let action = |g: &GaugeField| {
                    let mut out = SpinorField::zeros(geom);
                    d.apply(g, &mut out, &psi, sign, cb);
                    chi.dot(&out, Subset::from(cb)).re
                };
                // the action is real-linear in the links, so the central
                // difference is exact up to roundoff
                let fd = (action(&shifted(&gauge, &delta, eps)) - action(&shifted(&gauge, &delta, -eps))) / (2.0 * eps);
                let analytic = d.deriv(&gauge, &chi, &psi, sign, cb).contract(&delta);
                assert!(
                    (fd - analytic).abs() < 1e-10 * analytic.abs().max(1.0),
                    "{sign:?} {cb:?}: {fd} vs {analytic}"
                );
            }
        }
    }

    #[test]
    fn deriv_vanishes_for_zero_source() {
        let geom = Geometry::new([2, 2, 2, 2]);
        let gauge = GaugeField::hot_start(geom, 3);
        let force = WilsonDslash::isotropic().deriv(
            &gauge,
            &SpinorField::zeros(geom),
            &SpinorField::random(geom, 4),
            Sign::Plus,
            Parity::Even,
        );
        assert!(force.norm_sq() < 1e-30);
    }

    #[test]
    fn zero_in_zero_out() {
        let geom = Geometry::new([4, 4, 4, 4]);
        let gauge = GaugeField::hot_start(geom, 1);
        let psi = SpinorField::zeros(geom);
        let mut chi = SpinorField::random(geom, 2);
        WilsonDslash::isotropic().apply(&gauge, &mut chi, &psi, Sign::Plus, Parity::Odd);
        assert!(chi.norm_sq(Subset::Odd) < 1e-30);
        assert!(chi.norm_sq(Subset::Even) > 0.0, "even sites must be untouched");
    }

    #[test]
    fn minus_is_adjoint_of_plus() {
        let geom = Geometry::new([4, 4, 4, 4]);
        let gauge = GaugeField::random(geom, 17, 0.7);
        let d = WilsonDslash::new([0.9, 0.9, 0.9, 1.0]);
        let x = SpinorField::random(geom, 3);
        let y = SpinorField::random(geom, 4);

        // <x_o | D(+) y_e> == <D(−) x_o | y_e>
        let mut dy = SpinorField::zeros(geom);
        d.apply(&gauge, &mut dy, &y, Sign::Plus, Parity::Odd);
        let mut dx = SpinorField::zeros(geom);
        d.apply(&gauge, &mut dx, &x, Sign::Minus, Parity::Even);

        let lhs = x.dot(&dy, Subset::Odd);
        let rhs = dx.dot(&y, Subset::Even);
        assert!((lhs - rhs).abs() < 1e-10 * lhs.abs().max(1.0), "{lhs} vs {rhs}");
    }

    #[test]
    fn gamma5_hermiticity() {
        let geom = Geometry::new([4, 4, 2, 4]);
        let gauge = GaugeField::random(geom, 23, 0.5);
        let d = WilsonDslash::isotropic();
        let psi = SpinorField::random(geom, 8);

        let mut a = SpinorField::zeros(geom);
        d.apply(&gauge, &mut a, &psi.gamma5(), Sign::Plus, Parity::Even);
        let a = a.gamma5();
        let mut b = SpinorField::zeros(geom);
        d.apply(&gauge, &mut b, &psi, Sign::Minus, Parity::Even);

        let mut diff = a;
        diff.axpy(Complex64::real(-1.0), &b, Subset::Even);
        assert!(diff.norm_sq(Subset::Even) < 1e-20 * b.norm_sq(Subset::Even));
    }
}
