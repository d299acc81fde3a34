// SPDX-License-Identifier: AGPL-3.0-only

//! Four-spinor Wilson fermion fields.
//!
//! Each site carries 4 spin × 3 colour complex components. Reductions and
//! updates take a [`Subset`] so that even-odd preconditioned solvers touch
//! only their active checkerboard; the other half of the field is left as is.
//!
//! Site data is `#[repr(C)]` and `Pod`, so a field is viewed as a flat
//! `[f64]` buffer (site, spin, colour, re/im) with `bytemuck::cast_slice`.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use super::complex_f64::Complex64;
use super::constants::{lcg_gaussian, N_SPIN};
use super::gauge::{Geometry, Subset};
use super::su3::{ColorVector, Su3Matrix};

/// Spin-colour vector at a single site.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Spinor {
    pub s: [ColorVector; N_SPIN],
}

impl Spinor {
    pub const ZERO: Self = Self {
        s: [[Complex64::ZERO; 3]; N_SPIN],
    };

    /// `γ5 = diag(1, 1, -1, -1)` in the DeGrand-Rossi basis.
    #[inline]
    #[must_use]
    pub fn gamma5(self) -> Self {
        let mut r = self;
        for c in 0..3 {
            r.s[2][c] = -r.s[2][c];
            r.s[3][c] = -r.s[3][c];
        }
        r
    }

    #[inline]
    #[must_use]
    pub fn scale_complex(self, a: Complex64) -> Self {
        let mut r = self;
        for z in r.s.iter_mut().flatten() {
            *z = *z * a;
        }
        r
    }

    /// Apply a colour matrix to every spin component.
    #[inline]
    #[must_use]
    pub fn color_mul(&self, u: &Su3Matrix) -> Self {
        Self {
            s: [u.mul_vec(&self.s[0]), u.mul_vec(&self.s[1]), u.mul_vec(&self.s[2]), u.mul_vec(&self.s[3])],
        }
    }

    /// Apply `U†` to every spin component.
    #[inline]
    #[must_use]
    pub fn color_adj_mul(&self, u: &Su3Matrix) -> Self {
        Self {
            s: [
                u.adj_mul_vec(&self.s[0]),
                u.adj_mul_vec(&self.s[1]),
                u.adj_mul_vec(&self.s[2]),
                u.adj_mul_vec(&self.s[3]),
            ],
        }
    }

    /// `<self | other>`
    #[inline]
    #[must_use]
    pub fn dot(&self, other: &Self) -> Complex64 {
        self.s
            .iter()
            .flatten()
            .zip(other.s.iter().flatten())
            .map(|(a, b)| a.conj() * *b)
            .sum()
    }

    #[inline]
    #[must_use]
    pub fn norm_sq(&self) -> f64 {
        self.s.iter().flatten().map(|z| z.abs_sq()).sum()
    }

    /// Spin-traced colour outer product `Σ_α self_α ⊗ other_α†`, so that
    /// `other† U self = Tr[U · self.outer(other)]`.
    #[must_use]
    pub fn outer(&self, other: &Self) -> Su3Matrix {
        let mut r = Su3Matrix::ZERO;
        for (a, b) in self.s.iter().zip(&other.s) {
            for i in 0..3 {
                for j in 0..3 {
                    r.m[i][j] += a[i] * b[j].conj();
                }
            }
        }
        r
    }
}

impl Add for Spinor {
    type Output = Self;
    #[inline]
    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl AddAssign for Spinor {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.s.iter_mut().flatten().zip(rhs.s.iter().flatten()) {
            *a += *b;
        }
    }
}

impl Sub for Spinor {
    type Output = Self;
    #[inline]
    fn sub(mut self, rhs: Self) -> Self {
        self -= rhs;
        self
    }
}

impl SubAssign for Spinor {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        for (a, b) in self.s.iter_mut().flatten().zip(rhs.s.iter().flatten()) {
            *a -= *b;
        }
    }
}

impl Mul<f64> for Spinor {
    type Output = Self;
    #[inline]
    fn mul(mut self, rhs: f64) -> Self {
        for z in self.s.iter_mut().flatten() {
            *z = z.scale(rhs);
        }
        self
    }
}

impl Neg for Spinor {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        self * -1.0
    }
}

/// Wilson fermion field: one [`Spinor`] per lattice site.
#[derive(Clone, Debug)]
pub struct SpinorField {
    geometry: Geometry,
    data: Vec<Spinor>,
}

impl SpinorField {
    #[must_use]
    pub fn zeros(geometry: Geometry) -> Self {
        Self {
            geometry,
            data: vec![Spinor::ZERO; geometry.volume()],
        }
    }

    /// Gaussian random field (deterministic LCG stream).
    #[must_use]
    pub fn random(geometry: Geometry, seed: u64) -> Self {
        let mut rng = seed;
        let mut field = Self::zeros(geometry);
        for z in field.data.iter_mut().flat_map(|sp| sp.s.iter_mut().flatten()) {
            let re = lcg_gaussian(&mut rng);
            let im = lcg_gaussian(&mut rng);
            *z = Complex64::new(re, im);
        }
        field
    }

    /// Rebuild from a flat real buffer; `None` on a length mismatch.
    #[must_use]
    pub fn from_reals(geometry: Geometry, reals: &[f64]) -> Option<Self> {
        let sites: &[Spinor] = bytemuck::try_cast_slice(reals).ok()?;
        (sites.len() == geometry.volume()).then(|| Self {
            geometry,
            data: sites.to_vec(),
        })
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub fn data(&self) -> &[Spinor] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [Spinor] {
        &mut self.data
    }

    /// Flat view: (site, spin, colour, re/im).
    #[must_use]
    pub fn as_reals(&self) -> &[f64] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn as_reals_mut(&mut self) -> &mut [f64] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    /// `<self | other>` restricted to `subset`.
    #[must_use]
    pub fn dot(&self, other: &Self, subset: Subset) -> Complex64 {
        let geom = self.geometry;
        self.data
            .par_iter()
            .zip(other.data.par_iter())
            .enumerate()
            .filter(|(i, _)| subset.contains(geom.site_parity(*i)))
            .map(|(_, (a, b))| a.dot(b))
            .sum()
    }

    #[must_use]
    pub fn norm_sq(&self, subset: Subset) -> f64 {
        let geom = self.geometry;
        self.data
            .par_iter()
            .enumerate()
            .filter(|(i, _)| subset.contains(geom.site_parity(*i)))
            .map(|(_, a)| a.norm_sq())
            .sum()
    }

    /// `self += a x` on `subset`.
    pub fn axpy(&mut self, a: Complex64, x: &Self, subset: Subset) {
        let geom = self.geometry;
        self.data
            .par_iter_mut()
            .zip(x.data.par_iter())
            .enumerate()
            .filter(|(i, _)| subset.contains(geom.site_parity(*i)))
            .for_each(|(_, (s, xi))| *s += xi.scale_complex(a));
    }

    /// `self = x + b self` on `subset`.
    pub fn xpby(&mut self, x: &Self, b: Complex64, subset: Subset) {
        let geom = self.geometry;
        self.data
            .par_iter_mut()
            .zip(x.data.par_iter())
            .enumerate()
            .filter(|(i, _)| subset.contains(geom.site_parity(*i)))
            .for_each(|(_, (s, xi))| *s = *xi + s.scale_complex(b));
    }

    /// `self *= a` on `subset`.
    pub fn scale(&mut self, a: Complex64, subset: Subset) {
        let geom = self.geometry;
        self.data
            .par_iter_mut()
            .enumerate()
            .filter(|(i, _)| subset.contains(geom.site_parity(*i)))
            .for_each(|(_, s)| *s = s.scale_complex(a));
    }

    /// Copy `other` into `self` on `subset`.
    pub fn assign(&mut self, other: &Self, subset: Subset) {
        let geom = self.geometry;
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .enumerate()
            .filter(|(i, _)| subset.contains(geom.site_parity(*i)))
            .for_each(|(_, (s, o))| *s = *o);
    }

    /// Zero `self` on `subset`.
    pub fn zero(&mut self, subset: Subset) {
        let geom = self.geometry;
        self.data
            .par_iter_mut()
            .enumerate()
            .filter(|(i, _)| subset.contains(geom.site_parity(*i)))
            .for_each(|(_, s)| *s = Spinor::ZERO);
    }

    /// `γ5 ψ` on every site.
    #[must_use]
    pub fn gamma5(&self) -> Self {
        Self {
            geometry: self.geometry,
            data: self.data.par_iter().map(|s| s.gamma5()).collect(),
        }
    }

    /// `ψ(x) → g(x) ψ(x)`, or `g†(x) ψ(x)` when `dagger` is set.
    pub fn gauge_rotate(&mut self, g: &[Su3Matrix], dagger: bool) {
        self.data.par_iter_mut().zip(g.par_iter()).for_each(|(s, gx)| {
            *s = if dagger { s.color_adj_mul(gx) } else { s.color_mul(gx) };
        });
    }
}
