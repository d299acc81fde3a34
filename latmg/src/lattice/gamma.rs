// SPDX-License-Identifier: AGPL-3.0-only

//! Euclidean Dirac matrices in the DeGrand-Rossi basis.
//!
//! Every `γ_μ` has exactly one non-zero entry per row, a phase in
//! {±1, ±i}, so it is stored as `(column, phase)` pairs and applied without
//! a dense 4×4 product.
//!
//! ```text
//! γ5 = γ1 γ2 γ3 γ4 = diag(1, 1, -1, -1)
//! σ_μν = (i/2) [γ_μ, γ_ν]
//! ```
//!
//! `σ_μν` commutes with `γ5`, so it is block diagonal in the chiral spin
//! pairs {0, 1} and {2, 3}. The clover term inherits that structure.

use super::complex_f64::Complex64;
use super::constants::N_SPIN;
use super::spinor::Spinor;

/// One non-zero `(column, phase)` per row.
#[derive(Clone, Copy, Debug)]
pub struct SparseGamma {
    rows: [(usize, Complex64); N_SPIN],
}

const P1: Complex64 = Complex64::ONE;
const M1: Complex64 = Complex64::new(-1.0, 0.0);
const PI: Complex64 = Complex64::I;
const MI: Complex64 = Complex64::new(0.0, -1.0);

/// `γ_1 .. γ_4`, indexed by direction `mu = 0..4` (x, y, z, t).
pub const GAMMA: [SparseGamma; 4] = [
    SparseGamma {
        rows: [(3, PI), (2, PI), (1, MI), (0, MI)],
    },
    SparseGamma {
        rows: [(3, M1), (2, P1), (1, P1), (0, M1)],
    },
    SparseGamma {
        rows: [(2, PI), (3, MI), (0, MI), (1, PI)],
    },
    SparseGamma {
        rows: [(2, P1), (3, P1), (0, P1), (1, P1)],
    },
];

/// Dense 4×4 spin matrix.
pub type SpinMatrix = [[Complex64; N_SPIN]; N_SPIN];

impl SparseGamma {
    /// `γ ψ`
    #[inline]
    #[must_use]
    pub fn apply(&self, psi: &Spinor) -> Spinor {
        let mut out = Spinor::ZERO;
        for (row, &(col, phase)) in self.rows.iter().enumerate() {
            for c in 0..3 {
                out.s[row][c] = phase * psi.s[col][c];
            }
        }
        out
    }

    #[must_use]
    pub fn dense(&self) -> SpinMatrix {
        let mut m = [[Complex64::ZERO; N_SPIN]; N_SPIN];
        for (row, &(col, phase)) in self.rows.iter().enumerate() {
            m[row][col] = phase;
        }
        m
    }
}

/// Dense matrix product.
#[must_use]
pub fn spin_mul(a: &SpinMatrix, b: &SpinMatrix) -> SpinMatrix {
    let mut r = [[Complex64::ZERO; N_SPIN]; N_SPIN];
    for i in 0..N_SPIN {
        for j in 0..N_SPIN {
            r[i][j] = (0..N_SPIN).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    r
}

/// `σ_μν = (i/2)(γ_μ γ_ν − γ_ν γ_μ)`
#[must_use]
pub fn sigma(mu: usize, nu: usize) -> SpinMatrix {
    let gm = GAMMA[mu].dense();
    let gn = GAMMA[nu].dense();
    let ab = spin_mul(&gm, &gn);
    let ba = spin_mul(&gn, &gm);
    let mut r = [[Complex64::ZERO; N_SPIN]; N_SPIN];
    for i in 0..N_SPIN {
        for j in 0..N_SPIN {
            r[i][j] = (ab[i][j] - ba[i][j]).mul_i().scale(0.5);
        }
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> SpinMatrix {
        let mut m = [[Complex64::ZERO; N_SPIN]; N_SPIN];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = Complex64::ONE;
        }
        m
    }

    fn max_diff(a: &SpinMatrix, b: &SpinMatrix) -> f64 {
        let mut d: f64 = 0.0;
        for i in 0..N_SPIN {
            for j in 0..N_SPIN {
                d = d.max((a[i][j] - b[i][j]).abs());
            }
        }
        d
    }

    #[test]
    fn clifford_algebra() {
        let one = identity();
        for mu in 0..4 {
            for nu in 0..4 {
                let gm = GAMMA[mu].dense();
                let gn = GAMMA[nu].dense();
                let ab = spin_mul(&gm, &gn);
                let ba = spin_mul(&gn, &gm);
                let mut anti = ab;
                for i in 0..N_SPIN {
                    for j in 0..N_SPIN {
                        anti[i][j] += ba[i][j];
                    }
                }
                let mut expect = [[Complex64::ZERO; N_SPIN]; N_SPIN];
                if mu == nu {
                    for i in 0..N_SPIN {
                        expect[i][i] = Complex64::real(2.0);
                    }
                }
                assert!(max_diff(&anti, &expect) < 1e-15, "{{γ{mu}, γ{nu}}} wrong");
            }
            assert!(max_diff(&spin_mul(&GAMMA[mu].dense(), &GAMMA[mu].dense()), &one) < 1e-15);
        }
    }

    #[test]
    fn gamma5_is_product_of_gammas() {
        let g = spin_mul(
            &spin_mul(&GAMMA[0].dense(), &GAMMA[1].dense()),
            &spin_mul(&GAMMA[2].dense(), &GAMMA[3].dense()),
        );
        let mut expect = identity();
        expect[2][2] = M1;
        expect[3][3] = M1;
        assert!(max_diff(&g, &expect) < 1e-15, "γ1γ2γ3γ4 != diag(1,1,-1,-1)");
    }

    #[test]
    fn sigma_is_chirally_block_diagonal_and_hermitian() {
        for mu in 0..4 {
            for nu in 0..4 {
                let s = sigma(mu, nu);
                for i in 0..N_SPIN {
                    for j in 0..N_SPIN {
                        if (i < 2) != (j < 2) {
                            assert!(s[i][j].abs() < 1e-15, "σ{mu}{nu} mixes chiralities");
                        }
                        assert!((s[i][j] - s[j][i].conj()).abs() < 1e-15);
                    }
                }
            }
        }
    }

    #[test]
    fn sparse_apply_matches_dense() {
        let mut psi = Spinor::ZERO;
        for sp in 0..N_SPIN {
            for c in 0..3 {
                psi.s[sp][c] = Complex64::new((sp * 3 + c) as f64, 1.0 - c as f64);
            }
        }
        for g in &GAMMA {
            let out = g.apply(&psi);
            let d = g.dense();
            for i in 0..N_SPIN {
                for c in 0..3 {
                    let expect: Complex64 = (0..N_SPIN).map(|k| d[i][k] * psi.s[k][c]).sum();
                    assert!((out.s[i][c] - expect).abs() < 1e-15);
                }
            }
        }
    }
}
