// SPDX-License-Identifier: AGPL-3.0-only

//! Lattice geometry, checkerboarding and the SU(3) gauge field.
//!
//! The smallest closed loop of links is the plaquette
//!
//!   `P_μν`(x) = `U_μ`(x) `U_ν`(x+μ) `U_μ`†(x+ν) `U_ν`†(x)
//!
//! whose average trace tracks the roughness of a configuration. Sites carry
//! a parity `(x + y + z + t) mod 2`; even-odd preconditioned operators act
//! on one parity at a time.
//!
//! # References
//!
//! - Wilson, PRD 10, 2445 (1974)
//! - Gattringer & Lang, "QCD on the Lattice" (2010), Ch. 3

use super::constants::{HOT_START_EPSILON, N_DIM};
use super::su3::Su3Matrix;

/// Checkerboard parity of a site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    /// The other checkerboard.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Even => Self::Odd,
            Self::Odd => Self::Even,
        }
    }

    /// 0 for even, 1 for odd.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Even => 0,
            Self::Odd => 1,
        }
    }
}

/// Set of sites an operation is restricted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subset {
    All,
    Even,
    Odd,
}

impl Subset {
    #[must_use]
    pub const fn contains(self, parity: Parity) -> bool {
        matches!(
            (self, parity),
            (Self::All, _) | (Self::Even, Parity::Even) | (Self::Odd, Parity::Odd)
        )
    }
}

impl From<Parity> for Subset {
    fn from(p: Parity) -> Self {
        match p {
            Parity::Even => Self::Even,
            Parity::Odd => Self::Odd,
        }
    }
}

/// 4D lattice extents and site indexing.
///
/// Convention: `dims = [Nx, Ny, Nz, Nt]`, z fastest, t slowest:
/// `idx = t*NxNyNz + x*NyNz + y*Nz + z`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    dims: [usize; N_DIM],
}

impl Geometry {
    #[must_use]
    pub const fn new(dims: [usize; N_DIM]) -> Self {
        Self { dims }
    }

    #[must_use]
    pub const fn dims(&self) -> [usize; N_DIM] {
        self.dims
    }

    /// Total number of lattice sites.
    #[must_use]
    pub const fn volume(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2] * self.dims[3]
    }

    /// Every extent even, so the two checkerboards have equal size and
    /// nearest neighbours always have opposite parity.
    #[must_use]
    pub const fn is_checkerboardable(&self) -> bool {
        self.dims[0] % 2 == 0 && self.dims[1] % 2 == 0 && self.dims[2] % 2 == 0 && self.dims[3] % 2 == 0
    }

    /// Number of sites orthogonal to direction `mu`.
    #[must_use]
    pub const fn face_volume(&self, mu: usize) -> usize {
        self.volume() / self.dims[mu]
    }

    #[must_use]
    pub const fn site_index(&self, x: [usize; N_DIM]) -> usize {
        x[3] * (self.dims[0] * self.dims[1] * self.dims[2])
            + x[0] * (self.dims[1] * self.dims[2])
            + x[1] * self.dims[2]
            + x[2]
    }

    /// Returns `[x, y, z, t]`.
    #[must_use]
    pub const fn site_coords(&self, idx: usize) -> [usize; N_DIM] {
        let nxyz = self.dims[0] * self.dims[1] * self.dims[2];
        let t = idx / nxyz;
        let rem = idx % nxyz;
        let x0 = rem / (self.dims[1] * self.dims[2]);
        let rem2 = rem % (self.dims[1] * self.dims[2]);
        let x1 = rem2 / self.dims[2];
        let x2 = rem2 % self.dims[2];
        [x0, x1, x2, t]
    }

    /// Neighbor in direction mu with periodic boundary conditions.
    #[must_use]
    pub const fn neighbor(&self, x: [usize; N_DIM], mu: usize, forward: bool) -> [usize; N_DIM] {
        let mut y = x;
        if forward {
            y[mu] = (x[mu] + 1) % self.dims[mu];
        } else {
            y[mu] = (x[mu] + self.dims[mu] - 1) % self.dims[mu];
        }
        y
    }

    #[must_use]
    pub const fn neighbor_index(&self, idx: usize, mu: usize, forward: bool) -> usize {
        self.site_index(self.neighbor(self.site_coords(idx), mu, forward))
    }

    #[must_use]
    pub const fn parity(x: [usize; N_DIM]) -> Parity {
        if (x[0] + x[1] + x[2] + x[3]) % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    #[must_use]
    pub const fn site_parity(&self, idx: usize) -> Parity {
        Self::parity(self.site_coords(idx))
    }

    /// Indices of all sites in `subset`, in lexicographic order.
    #[must_use]
    pub fn sites(&self, subset: Subset) -> Vec<usize> {
        (0..self.volume())
            .filter(|&i| subset.contains(self.site_parity(i)))
            .collect()
    }
}

/// SU(3) link variables on a 4D lattice.
///
/// Links are stored as `links[site * 4 + mu]`.
#[derive(Clone, Debug)]
pub struct GaugeField {
    geometry: Geometry,
    links: Vec<Su3Matrix>,
}

impl GaugeField {
    /// Build from existing links (`links.len() == 4 * volume`).
    #[must_use]
    pub fn from_links(geometry: Geometry, links: Vec<Su3Matrix>) -> Option<Self> {
        (links.len() == N_DIM * geometry.volume()).then_some(Self { geometry, links })
    }

    /// All links = identity.
    #[must_use]
    pub fn cold_start(geometry: Geometry) -> Self {
        Self {
            geometry,
            links: vec![Su3Matrix::IDENTITY; geometry.volume() * N_DIM],
        }
    }

    /// Fully disordered random links.
    #[must_use]
    pub fn hot_start(geometry: Geometry, seed: u64) -> Self {
        Self::random(geometry, seed, HOT_START_EPSILON)
    }

    /// Random links at distance `epsilon` from identity.
    #[must_use]
    pub fn random(geometry: Geometry, seed: u64, epsilon: f64) -> Self {
        let mut rng_seed = seed;
        let links = (0..geometry.volume() * N_DIM)
            .map(|_| Su3Matrix::random_near_identity(&mut rng_seed, epsilon))
            .collect();
        Self { geometry, links }
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub fn links(&self) -> &[Su3Matrix] {
        &self.links
    }

    /// Get link `U_mu`(x) by site index.
    #[inline]
    pub fn link(&self, idx: usize, mu: usize) -> Su3Matrix {
        self.links[idx * N_DIM + mu]
    }

    pub fn set_link(&mut self, idx: usize, mu: usize, u: Su3Matrix) {
        self.links[idx * N_DIM + mu] = u;
    }

    /// Multiply every link in direction `mu` by `factor`.
    pub fn scale_direction(&mut self, mu: usize, factor: f64) {
        for u in self.links.iter_mut().skip(mu).step_by(N_DIM) {
            *u = u.scale(factor);
        }
    }

    /// Fermion boundary phase: negate the links crossing the last time slice.
    pub fn apply_antiperiodic_time(&mut self) {
        let nt = self.geometry.dims()[3];
        for idx in 0..self.geometry.volume() {
            if self.geometry.site_coords(idx)[3] == nt - 1 {
                let u = self.link(idx, 3);
                self.set_link(idx, 3, u.scale(-1.0));
            }
        }
    }

    /// `P_μν`(x) = `U_μ`(x) `U_ν`(x+μ) `U_μ`†(x+ν) `U_ν`†(x)
    pub fn plaquette(&self, idx: usize, mu: usize, nu: usize) -> Su3Matrix {
        let x_mu = self.geometry.neighbor_index(idx, mu, true);
        let x_nu = self.geometry.neighbor_index(idx, nu, true);
        self.link(idx, mu) * self.link(x_mu, nu) * self.link(x_nu, mu).adjoint() * self.link(idx, nu).adjoint()
    }

    /// Average plaquette: <Re Tr P / 3> over all sites and planes.
    #[must_use]
    pub fn average_plaquette(&self) -> f64 {
        let vol = self.geometry.volume();
        let mut sum = 0.0;
        for idx in 0..vol {
            for mu in 0..N_DIM {
                for nu in (mu + 1)..N_DIM {
                    sum += self.plaquette(idx, mu, nu).re_trace() / 3.0;
                }
            }
        }
        sum / (vol * 6) as f64
    }
}

/// Colour-matrix derivative with respect to every link, one entry per
/// direction, stored in the same site order as [`GaugeField`].
///
/// A force `F` for the real functional `S(U)` satisfies
/// `δS = Σ_{x,μ} Re Tr[δU_μ(x) F_μ(x)]` for any complex `δU`.
#[derive(Clone, Debug, PartialEq)]
pub struct GaugeForce {
    geometry: Geometry,
    dirs: [Vec<Su3Matrix>; N_DIM],
}

impl GaugeForce {
    #[must_use]
    pub fn zeros(geometry: Geometry) -> Self {
        Self {
            geometry,
            dirs: std::array::from_fn(|_| vec![Su3Matrix::ZERO; geometry.volume()]),
        }
    }

    /// Build from per-site entries `[F_0(x), .., F_3(x)]`, one per site.
    #[must_use]
    pub fn from_sites(geometry: Geometry, sites: &[[Su3Matrix; N_DIM]]) -> Self {
        debug_assert_eq!(sites.len(), geometry.volume());
        let dirs = std::array::from_fn(|mu| sites.iter().map(|f| f[mu]).collect());
        Self { geometry, dirs }
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// `F_μ(x)` for every site, in site order.
    #[must_use]
    pub fn direction(&self, mu: usize) -> &[Su3Matrix] {
        &self.dirs[mu]
    }

    #[inline]
    pub fn get(&self, idx: usize, mu: usize) -> Su3Matrix {
        self.dirs[mu][idx]
    }

    /// `self += a · other`
    pub fn accumulate(&mut self, a: f64, other: &Self) {
        for (mine, theirs) in self.dirs.iter_mut().zip(&other.dirs) {
            for (f, g) in mine.iter_mut().zip(theirs) {
                *f = *f + g.scale(a);
            }
        }
    }

    pub fn scale(&mut self, a: f64) {
        for f in self.dirs.iter_mut().flatten() {
            *f = f.scale(a);
        }
    }

    /// `Σ_{x,μ} Re Tr[δU_μ(x) F_μ(x)]` for `δU` laid out like
    /// [`GaugeField::links`].
    #[must_use]
    pub fn contract(&self, delta: &[Su3Matrix]) -> f64 {
        delta
            .iter()
            .enumerate()
            .map(|(i, du)| (*du * self.get(i / N_DIM, i % N_DIM)).re_trace())
            .sum()
    }

    #[must_use]
    pub fn norm_sq(&self) -> f64 {
        self.dirs.iter().flatten().map(|f| f.norm_sq()).sum()
    }
}
