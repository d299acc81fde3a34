// SPDX-License-Identifier: AGPL-3.0-only

//! SU(3) matrix operations for lattice gauge theory.
//!
//! Each link variable `U_μ(x)` is a 3×3 unitary matrix with unit
//! determinant, the parallel transporter from `x` to `x+μ`. Matrices act on
//! [`ColorVector`]s, the colour part of a quark field at one site.
//!
//! Storage: row-major, 9 Complex64 values (18 f64), `#[repr(C)]` so that
//! a slice of links is a flat staging buffer.
//!
//! # References
//!
//! - Gattringer & Lang, "QCD on the Lattice" (2010), Ch. 2
//! - Creutz, "Quarks, Gluons and Lattices" (1983), Ch. 8

use std::ops::{Add, Mul, Sub};

use bytemuck::{Pod, Zeroable};

use super::complex_f64::Complex64;
use super::constants::{lcg_gaussian, LATTICE_DIVISION_GUARD};

/// Color vector at a single lattice site: 3 complex components.
pub type ColorVector = [Complex64; 3];

/// 3×3 complex matrix, an SU(3) link variable or a gauge transformation.
///
/// Row-major storage: `m[row][col]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[must_use]
pub struct Su3Matrix {
    /// Matrix elements m[row][col].
    pub m: [[Complex64; 3]; 3],
}

impl Mul for Su3Matrix {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let mut r = Self::ZERO;
        for i in 0..3 {
            for j in 0..3 {
                r.m[i][j] = (0..3).map(|k| self.m[i][k] * rhs.m[k][j]).sum();
            }
        }
        r
    }
}

impl Add for Su3Matrix {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        let mut r = self;
        for (row, rrow) in r.m.iter_mut().zip(rhs.m.iter()) {
            for (a, b) in row.iter_mut().zip(rrow.iter()) {
                *a += *b;
            }
        }
        r
    }
}

impl Sub for Su3Matrix {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        let mut r = self;
        for (row, rrow) in r.m.iter_mut().zip(rhs.m.iter()) {
            for (a, b) in row.iter_mut().zip(rrow.iter()) {
                *a -= *b;
            }
        }
        r
    }
}

impl Su3Matrix {
    /// 3×3 identity matrix.
    pub const IDENTITY: Self = Self {
        m: [
            [Complex64::ONE, Complex64::ZERO, Complex64::ZERO],
            [Complex64::ZERO, Complex64::ONE, Complex64::ZERO],
            [Complex64::ZERO, Complex64::ZERO, Complex64::ONE],
        ],
    };

    /// Zero matrix (all elements 0).
    pub const ZERO: Self = Self {
        m: [[Complex64::ZERO; 3]; 3],
    };

    /// Conjugate transpose (adjoint / dagger).
    pub fn adjoint(self) -> Self {
        let mut r = Self::ZERO;
        for i in 0..3 {
            for j in 0..3 {
                r.m[i][j] = self.m[j][i].conj();
            }
        }
        r
    }

    /// Trace: Tr(U) = sum\_i `U_ii`
    #[must_use]
    pub fn trace(self) -> Complex64 {
        self.m[0][0] + self.m[1][1] + self.m[2][2]
    }

    /// Real part of trace.
    #[must_use]
    pub fn re_trace(self) -> f64 {
        self.m[0][0].re + self.m[1][1].re + self.m[2][2].re
    }

    /// Determinant of a 3×3 complex matrix.
    #[must_use]
    pub fn det(self) -> Complex64 {
        let m = &self.m;
        let a = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1]);
        let b = m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0]);
        let c = m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
        a - b + c
    }

    /// Scale by a real number.
    pub fn scale(self, s: f64) -> Self {
        let mut r = self;
        for row in &mut r.m {
            for z in row.iter_mut() {
                *z = z.scale(s);
            }
        }
        r
    }

    /// Frobenius norm squared: sum |`m_ij`|²
    #[must_use]
    pub fn norm_sq(self) -> f64 {
        self.m.iter().flatten().map(|z| z.abs_sq()).sum()
    }

    /// `U v`
    #[inline]
    #[must_use]
    pub fn mul_vec(&self, v: &ColorVector) -> ColorVector {
        let mut out = [Complex64::ZERO; 3];
        for (c, o) in out.iter_mut().enumerate() {
            *o = self.m[c][0] * v[0] + self.m[c][1] * v[1] + self.m[c][2] * v[2];
        }
        out
    }

    /// `U† v` without forming the adjoint.
    #[inline]
    #[must_use]
    pub fn adj_mul_vec(&self, v: &ColorVector) -> ColorVector {
        let mut out = [Complex64::ZERO; 3];
        for (c, o) in out.iter_mut().enumerate() {
            *o = self.m[0][c].conj() * v[0]
                + self.m[1][c].conj() * v[1]
                + self.m[2][c].conj() * v[2];
        }
        out
    }

    /// Traceless Hermitian part of `(W - W†) / (2i)`.
    ///
    /// For a sum of clover leaves `Q` this is `4 F̂_μν` up to the leaf
    /// normalisation applied by the caller.
    pub fn traceless_hermitian_part(self) -> Self {
        let diff = self - self.adjoint();
        // (W - W†)/(2i) = -i (W - W†)/2
        let mut h = Self::ZERO;
        for i in 0..3 {
            for j in 0..3 {
                h.m[i][j] = (-diff.m[i][j].mul_i()).scale(0.5);
            }
        }
        let tr = h.trace().scale(1.0 / 3.0);
        for i in 0..3 {
            h.m[i][i] -= tr;
        }
        h
    }

    /// Project back onto SU(3) via modified Gram-Schmidt reunitarization.
    pub fn reunitarize(self) -> Self {
        let mut u = self;

        let n0 = row_norm(&u, 0);
        if n0 > LATTICE_DIVISION_GUARD {
            let inv = 1.0 / n0;
            for j in 0..3 {
                u.m[0][j] = u.m[0][j].scale(inv);
            }
        }

        let dot01 = row_dot(&u, 0, 1);
        for j in 0..3 {
            u.m[1][j] -= u.m[0][j] * dot01;
        }
        let n1 = row_norm(&u, 1);
        if n1 > LATTICE_DIVISION_GUARD {
            let inv = 1.0 / n1;
            for j in 0..3 {
                u.m[1][j] = u.m[1][j].scale(inv);
            }
        }

        // Row 2 = conj(row 0 × row 1) to ensure det = 1
        u.m[2][0] = (u.m[0][1] * u.m[1][2] - u.m[0][2] * u.m[1][1]).conj();
        u.m[2][1] = (u.m[0][2] * u.m[1][0] - u.m[0][0] * u.m[1][2]).conj();
        u.m[2][2] = (u.m[0][0] * u.m[1][1] - u.m[0][1] * u.m[1][0]).conj();

        u
    }

    /// Random SU(3) matrix near identity.
    ///
    /// Second-order expansion of exp(i ε H) with H a random traceless
    /// Hermitian matrix, reunitarized.
    pub fn random_near_identity(seed: &mut u64, epsilon: f64) -> Self {
        let mut h = [[Complex64::ZERO; 3]; 3];
        let mut rand_gauss = || -> f64 { lcg_gaussian(seed) };

        let a3 = rand_gauss() * epsilon;
        let a8 = rand_gauss() * epsilon;
        h[0][0] = Complex64::real(a3 + a8 / 3.0_f64.sqrt());
        h[1][1] = Complex64::real(-a3 + a8 / 3.0_f64.sqrt());
        h[2][2] = Complex64::real(-2.0 * a8 / 3.0_f64.sqrt());

        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            let re = rand_gauss() * epsilon;
            let im = rand_gauss() * epsilon;
            h[i][j] = Complex64::new(re, im);
            h[j][i] = Complex64::new(re, -im);
        }

        let mut result = Self::IDENTITY;
        for (i, row) in result.m.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                let h2_ij: Complex64 = (0..3).map(|k| h[i][k] * h[k][j]).sum();
                *cell += h[i][j].mul_i() - h2_ij.scale(0.5);
            }
        }

        result.reunitarize()
    }
}

fn row_norm(u: &Su3Matrix, row: usize) -> f64 {
    u.m[row].iter().map(|z| z.abs_sq()).sum::<f64>().sqrt()
}

fn row_dot(u: &Su3Matrix, r1: usize, r2: usize) -> Complex64 {
    (0..3).map(|j| u.m[r1][j].conj() * u.m[r2][j]).sum()
}
