// SPDX-License-Identifier: AGPL-3.0-only

//! Sheikholeslami-Wohlert clover term.
//!
//! ```text
//! A(x) = d_m − Σ_{μ<ν} k_μν σ_μν ⊗ F̂_μν(x)
//! d_m  = Σ_μ c_μ + m
//! F̂_μν = traceless part of (Q_μν − Q_μν†) / (8i)
//! ```
//!
//! `Q_μν` is the sum of the four plaquette leaves around `x`, `c_μ` the
//! fermion anisotropy coefficients and `k_μν` the clover coefficient for
//! the plane (temporal planes take `k_t`, spatial planes `k_r`).
//!
//! In the chiral basis `A(x)` is two 6×6 Hermitian blocks, one per spin
//! pair {0,1}, {2,3}. The inverse is formed per block by Cholesky
//! factorisation, which doubles as the positivity check and gives
//! `tr ln A` for free.
//!
//! # References
//!
//! - Sheikholeslami & Wohlert, Nucl. Phys. B259, 572 (1985)
//! - Lüscher, Sint, Sommer, Weisz, Nucl. Phys. B478, 365 (1996)

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use super::complex_f64::Complex64;
use super::constants::{CLOVER_BLOCK_DIM, N_DIM};
use super::gamma::sigma;
use super::gauge::{GaugeField, Geometry, Parity};
use super::spinor::SpinorField;
use super::su3::Su3Matrix;
use crate::error::CloverError;

/// One 6×6 chiral block, index `spin_in_pair * 3 + colour`.
pub type CloverBlock = [[Complex64; CLOVER_BLOCK_DIM]; CLOVER_BLOCK_DIM];

/// Number of strictly-lower-triangle entries in a 6×6 block.
const OFFDIAG: usize = CLOVER_BLOCK_DIM * (CLOVER_BLOCK_DIM - 1) / 2;

/// Coefficients entering the clover construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CloverCoefficients {
    /// `Σ_μ c_μ + m`
    pub diag_mass: f64,
    /// `k` for planes without the time direction.
    pub spatial: f64,
    /// `k` for planes containing the time direction.
    pub temporal: f64,
    pub t_dir: usize,
}

impl CloverCoefficients {
    const fn plane(&self, mu: usize, nu: usize) -> f64 {
        if mu == self.t_dir || nu == self.t_dir {
            self.temporal
        } else {
            self.spatial
        }
    }
}

/// Packed accelerator layout for one site.
///
/// Per chiral block: 6 real diagonal entries, then the 15 strictly lower
/// entries in row-major order `(i, j<i)` as interleaved (re, im).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PackedCloverSite {
    pub diag1: [f64; CLOVER_BLOCK_DIM],
    pub offd1: [f64; 2 * OFFDIAG],
    pub diag2: [f64; CLOVER_BLOCK_DIM],
    pub offd2: [f64; 2 * OFFDIAG],
}

/// Site-local clover matrices (or their inverses).
#[derive(Clone, Debug)]
pub struct CloverTerm {
    geometry: Geometry,
    blocks: Vec<[CloverBlock; 2]>,
}

/// Sum of the four plaquette leaves in the `(mu, nu)` plane at `idx`.
fn clover_leaves(gauge: &GaugeField, idx: usize, mu: usize, nu: usize) -> Su3Matrix {
    let g = gauge.geometry();
    let xp_mu = g.neighbor_index(idx, mu, true);
    let xp_nu = g.neighbor_index(idx, nu, true);
    let xm_mu = g.neighbor_index(idx, mu, false);
    let xm_nu = g.neighbor_index(idx, nu, false);
    let xm_mu_p_nu = g.neighbor_index(xm_mu, nu, true);
    let xm_mu_m_nu = g.neighbor_index(xm_mu, nu, false);
    let xp_mu_m_nu = g.neighbor_index(xm_nu, mu, true);

    let u = |site: usize, dir: usize| gauge.link(site, dir);

    let q1 = u(idx, mu) * u(xp_mu, nu) * u(xp_nu, mu).adjoint() * u(idx, nu).adjoint();
    let q2 = u(idx, nu) * u(xm_mu_p_nu, mu).adjoint() * u(xm_mu, nu).adjoint() * u(xm_mu, mu);
    let q3 = u(xm_mu, mu).adjoint() * u(xm_mu_m_nu, nu).adjoint() * u(xm_mu_m_nu, mu) * u(xm_nu, nu);
    let q4 = u(xm_nu, nu).adjoint() * u(xm_nu, mu) * u(xp_mu_m_nu, nu) * u(idx, mu).adjoint();
    q1 + q2 + q3 + q4
}

impl CloverTerm {
    /// Build `A(x)` on every site from (unrescaled) links.
    #[must_use]
    pub fn build(gauge: &GaugeField, coeffs: &CloverCoefficients) -> Self {
        let geometry = gauge.geometry();
        let mut planes = Vec::with_capacity(6);
        for mu in 0..N_DIM {
            for nu in (mu + 1)..N_DIM {
                planes.push((mu, nu, sigma(mu, nu), coeffs.plane(mu, nu)));
            }
        }

        let blocks = (0..geometry.volume())
            .into_par_iter()
            .map(|idx| {
                let mut site = [[[Complex64::ZERO; CLOVER_BLOCK_DIM]; CLOVER_BLOCK_DIM]; 2];
                for block in &mut site {
                    for (i, row) in block.iter_mut().enumerate() {
                        row[i] = Complex64::real(coeffs.diag_mass);
                    }
                }
                for &(mu, nu, sig, k) in &planes {
                    let f = clover_leaves(gauge, idx, mu, nu)
                        .traceless_hermitian_part()
                        .scale(0.25);
                    for (b, block) in site.iter_mut().enumerate() {
                        for s1 in 0..2 {
                            for s2 in 0..2 {
                                let sv = sig[2 * b + s1][2 * b + s2];
                                for c1 in 0..3 {
                                    for c2 in 0..3 {
                                        block[s1 * 3 + c1][s2 * 3 + c2] -= (sv * f.m[c1][c2]).scale(k);
                                    }
                                }
                            }
                        }
                    }
                }
                site
            })
            .collect();
        Self { geometry, blocks }
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub fn blocks(&self) -> &[[CloverBlock; 2]] {
        &self.blocks
    }

    /// `chi(x) = A(x) psi(x)` on sites of parity `cb`.
    pub fn apply(&self, chi: &mut SpinorField, psi: &SpinorField, cb: Parity) {
        let geom = self.geometry;
        let input = psi.data();
        chi.data_mut()
            .par_iter_mut()
            .enumerate()
            .filter(|(idx, _)| geom.site_parity(*idx) == cb)
            .for_each(|(idx, out)| {
                let src = &input[idx];
                for (b, block) in self.blocks[idx].iter().enumerate() {
                    for (i, row) in block.iter().enumerate() {
                        let mut acc = Complex64::ZERO;
                        for (j, a) in row.iter().enumerate() {
                            acc += *a * src.s[2 * b + j / 3][j % 3];
                        }
                        out.s[2 * b + i / 3][i % 3] = acc;
                    }
                }
            });
    }

    /// Site-local inverse via Cholesky.
    ///
    /// # Errors
    ///
    /// [`CloverError::NotPositiveDefinite`] at the first block whose pivot
    /// is not positive.
    pub fn inverse(&self) -> Result<Self, CloverError> {
        let blocks = self
            .blocks
            .par_iter()
            .enumerate()
            .map(|(site, pair)| {
                let l0 = cholesky(&pair[0]).map_err(|pivot| CloverError::NotPositiveDefinite { site, block: 0, pivot })?;
                let l1 = cholesky(&pair[1]).map_err(|pivot| CloverError::NotPositiveDefinite { site, block: 1, pivot })?;
                Ok([cholesky_inverse(&l0), cholesky_inverse(&l1)])
            })
            .collect::<Result<Vec<_>, CloverError>>()?;
        Ok(Self {
            geometry: self.geometry,
            blocks,
        })
    }

    /// `Σ_{x ∈ cb} ln det A(x)` from the Cholesky diagonals.
    ///
    /// # Errors
    ///
    /// [`CloverError::NotPositiveDefinite`] when a block has no factorisation.
    pub fn tr_log_det(&self, cb: Parity) -> Result<f64, CloverError> {
        let geom = self.geometry;
        self.blocks
            .par_iter()
            .enumerate()
            .filter(|(site, _)| geom.site_parity(*site) == cb)
            .map(|(site, pair)| {
                let mut sum = 0.0;
                for (block, a) in pair.iter().enumerate() {
                    let l = cholesky(a).map_err(|pivot| CloverError::NotPositiveDefinite { site, block, pivot })?;
                    sum += (0..CLOVER_BLOCK_DIM).map(|i| 2.0 * l[i][i].re.ln()).sum::<f64>();
                }
                Ok(sum)
            })
            .try_reduce(|| 0.0, |a, b| Ok(a + b))
    }

    /// Pack into the accelerator's per-site layout.
    #[must_use]
    pub fn pack(&self) -> Vec<PackedCloverSite> {
        self.blocks
            .par_iter()
            .map(|pair| {
                let (diag1, offd1) = pack_block(&pair[0]);
                let (diag2, offd2) = pack_block(&pair[1]);
                PackedCloverSite {
                    diag1,
                    offd1,
                    diag2,
                    offd2,
                }
            })
            .collect()
    }

    /// Rebuild Hermitian blocks from packed sites; `None` on a length mismatch.
    #[must_use]
    pub fn from_packed(geometry: Geometry, packed: &[PackedCloverSite]) -> Option<Self> {
        (packed.len() == geometry.volume()).then(|| Self {
            geometry,
            blocks: packed
                .par_iter()
                .map(|p| [unpack_block(&p.diag1, &p.offd1), unpack_block(&p.diag2, &p.offd2)])
                .collect(),
        })
    }
}

fn pack_block(a: &CloverBlock) -> ([f64; CLOVER_BLOCK_DIM], [f64; 2 * OFFDIAG]) {
    let mut diag = [0.0; CLOVER_BLOCK_DIM];
    let mut offd = [0.0; 2 * OFFDIAG];
    let mut k = 0;
    for i in 0..CLOVER_BLOCK_DIM {
        diag[i] = a[i][i].re;
        for j in 0..i {
            offd[2 * k] = a[i][j].re;
            offd[2 * k + 1] = a[i][j].im;
            k += 1;
        }
    }
    (diag, offd)
}

fn unpack_block(diag: &[f64; CLOVER_BLOCK_DIM], offd: &[f64; 2 * OFFDIAG]) -> CloverBlock {
    let mut a = [[Complex64::ZERO; CLOVER_BLOCK_DIM]; CLOVER_BLOCK_DIM];
    let mut k = 0;
    for i in 0..CLOVER_BLOCK_DIM {
        a[i][i] = Complex64::real(diag[i]);
        for j in 0..i {
            let z = Complex64::new(offd[2 * k], offd[2 * k + 1]);
            a[i][j] = z;
            a[j][i] = z.conj();
            k += 1;
        }
    }
    a
}

/// Lower-triangular `L` with `A = L L†`; `Err(pivot)` if `A` is not
/// positive definite.
fn cholesky(a: &CloverBlock) -> Result<CloverBlock, f64> {
    let mut l = [[Complex64::ZERO; CLOVER_BLOCK_DIM]; CLOVER_BLOCK_DIM];
    for j in 0..CLOVER_BLOCK_DIM {
        let pivot = a[j][j].re - (0..j).map(|k| l[j][k].abs_sq()).sum::<f64>();
        if pivot <= 0.0 || !pivot.is_finite() {
            return Err(pivot);
        }
        let ljj = pivot.sqrt();
        l[j][j] = Complex64::real(ljj);
        for i in (j + 1)..CLOVER_BLOCK_DIM {
            let s: Complex64 = (0..j).map(|k| l[i][k] * l[j][k].conj()).sum();
            l[i][j] = (a[i][j] - s).scale(1.0 / ljj);
        }
    }
    Ok(l)
}

/// `(L L†)⁻¹` by forward and back substitution on the unit columns.
fn cholesky_inverse(l: &CloverBlock) -> CloverBlock {
    let n = CLOVER_BLOCK_DIM;
    let mut inv = [[Complex64::ZERO; CLOVER_BLOCK_DIM]; CLOVER_BLOCK_DIM];
    for col in 0..n {
        // L y = e_col
        let mut y = [Complex64::ZERO; CLOVER_BLOCK_DIM];
        for i in 0..n {
            let rhs = if i == col { Complex64::ONE } else { Complex64::ZERO };
            let s: Complex64 = (0..i).map(|k| l[i][k] * y[k]).sum();
            y[i] = (rhs - s).scale(1.0 / l[i][i].re);
        }
        // L† x = y
        let mut x = [Complex64::ZERO; CLOVER_BLOCK_DIM];
        for i in (0..n).rev() {
            let s: Complex64 = ((i + 1)..n).map(|k| l[k][i].conj() * x[k]).sum();
            x[i] = (y[i] - s).scale(1.0 / l[i][i].re);
        }
        for i in 0..n {
            inv[i][col] = x[i];
        }
    }
    inv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::gauge::Subset;

    fn coeffs() -> CloverCoefficients {
        CloverCoefficients {
            diag_mass: 4.1,
            spatial: 0.5,
            temporal: 0.5,
            t_dir: 3,
        }
    }

    #[test]
    fn cold_clover_is_diag_mass() {
        let geom = Geometry::new([4, 4, 4, 4]);
        let clov = CloverTerm::build(&GaugeField::cold_start(geom), &coeffs());
        let psi = SpinorField::random(geom, 1);
        let mut chi = SpinorField::zeros(geom);
        clov.apply(&mut chi, &psi, Parity::Even);
        let mut diff = chi;
        diff.axpy(Complex64::real(-4.1), &psi, Subset::Even);
        assert!(diff.norm_sq(Subset::Even) < 1e-24);
    }

    #[test]
    fn blocks_are_hermitian() {
        let geom = Geometry::new([4, 4, 4, 4]);
        let clov = CloverTerm::build(&GaugeField::hot_start(geom, 3), &coeffs());
        for pair in clov.blocks() {
            for a in pair {
                for i in 0..CLOVER_BLOCK_DIM {
                    for j in 0..CLOVER_BLOCK_DIM {
                        assert!((a[i][j] - a[j][i].conj()).abs() < 1e-13);
                    }
                }
            }
        }
    }

    #[test]
    fn inverse_times_clover_is_identity() {
        let geom = Geometry::new([4, 4, 4, 4]);
        let clov = CloverTerm::build(&GaugeField::hot_start(geom, 9), &coeffs());
        let inv = clov.inverse().expect("hot clover with m=0.1 is positive definite");
        let psi = SpinorField::random(geom, 4);
        let mut t = SpinorField::zeros(geom);
        let mut back = SpinorField::zeros(geom);
        clov.apply(&mut t, &psi, Parity::Odd);
        inv.apply(&mut back, &t, Parity::Odd);
        back.axpy(Complex64::real(-1.0), &psi, Subset::Odd);
        assert!(back.norm_sq(Subset::Odd) < 1e-20 * psi.norm_sq(Subset::Odd));
    }

    #[test]
    fn log_det_of_cold_clover() {
        let geom = Geometry::new([2, 2, 2, 2]);
        let clov = CloverTerm::build(&GaugeField::cold_start(geom), &coeffs());
        let ld = clov.tr_log_det(Parity::Even).expect("positive definite");
        let expected = (geom.volume() / 2) as f64 * 12.0 * 4.1_f64.ln();
        assert!((ld - expected).abs() < 1e-10, "{ld} vs {expected}");
    }

    #[test]
    fn negative_mass_is_rejected() {
        let geom = Geometry::new([2, 2, 2, 2]);
        let mut c = coeffs();
        c.diag_mass = -0.5;
        let clov = CloverTerm::build(&GaugeField::cold_start(geom), &c);
        assert!(matches!(clov.inverse(), Err(CloverError::NotPositiveDefinite { .. })));
    }

    #[test]
    fn pack_roundtrip() {
        let geom = Geometry::new([2, 2, 2, 4]);
        let clov = CloverTerm::build(&GaugeField::hot_start(geom, 12), &coeffs());
        let packed = clov.pack();
        let flat: &[f64] = bytemuck::cast_slice(&packed);
        assert_eq!(flat.len(), geom.volume() * 72);
        let back = CloverTerm::from_packed(geom, &packed).expect("length matches");
        for (a, b) in clov.blocks().iter().zip(back.blocks()) {
            for k in 0..2 {
                for i in 0..CLOVER_BLOCK_DIM {
                    for j in 0..CLOVER_BLOCK_DIM {
                        assert!((a[k][i][j] - b[k][i][j]).abs() < 1e-14);
                    }
                }
            }
        }
    }
}
