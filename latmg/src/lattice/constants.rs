// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized constants for lattice field theory modules.
//!
//! Collects field dimensions, LCG PRNG parameters, and numerical guards
//! used across `su3.rs`, `gauge.rs`, `spinor.rs`, `clover.rs` and the
//! host accelerator's Krylov loop.

/// Number of colors in QCD (SU(3)).
pub const N_COLORS: usize = 3;

/// Number of Dirac spin components.
pub const N_SPIN: usize = 4;

/// Number of spacetime dimensions.
pub const N_DIM: usize = 4;

/// Real words per spinor site: 4 spins × 3 colors × (re, im).
pub const SPINOR_SITE_REALS: usize = N_SPIN * N_COLORS * 2;

/// Real words per link matrix: 3 × 3 × (re, im).
pub const LINK_REALS: usize = N_COLORS * N_COLORS * 2;

/// Dimension of one chiral clover block: 2 spins × 3 colors.
pub const CLOVER_BLOCK_DIM: usize = 6;

/// LCG multiplier (Knuth MMIX).
pub const LCG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;

/// LCG increment (Knuth MMIX).
pub const LCG_INCREMENT: u64 = 1_442_695_040_888_963_407;

/// 53-bit mantissa divisor for LCG → uniform [0, 1) conversion.
pub const LCG_53_DIVISOR: f64 = (1u64 << 53) as f64;

/// Division guard for norms, Gram-Schmidt and reunitarization.
///
/// Well below any physical lattice scale.
pub const LATTICE_DIVISION_GUARD: f64 = 1e-30;

/// Hot-start perturbation scale for SU(3) link matrices.
pub const HOT_START_EPSILON: f64 = 1.5;

/// Advance the LCG state by one step.
#[inline]
pub fn lcg_step(seed: &mut u64) {
    *seed = seed
        .wrapping_mul(LCG_MULTIPLIER)
        .wrapping_add(LCG_INCREMENT);
}

/// Generate a uniform f64 in [0, 1) from 53 bits of LCG state.
#[inline]
pub fn lcg_uniform_f64(seed: &mut u64) -> f64 {
    lcg_step(seed);
    (*seed >> 11) as f64 / LCG_53_DIVISOR
}

/// Box-Muller Gaussian deviate N(0, 1) from two LCG draws.
#[inline]
pub fn lcg_gaussian(seed: &mut u64) -> f64 {
    let u1 = lcg_uniform_f64(seed);
    let u2 = lcg_uniform_f64(seed);
    (-2.0 * u1.max(LATTICE_DIVISION_GUARD).ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcg_uniform_in_range() {
        let mut seed = 12345u64;
        for _ in 0..1000 {
            let v = lcg_uniform_f64(&mut seed);
            assert!((0.0..1.0).contains(&v), "out of range: {v}");
        }
    }

    #[test]
    fn site_word_counts() {
        assert_eq!(SPINOR_SITE_REALS, 24);
        assert_eq!(LINK_REALS, 18);
        assert_eq!(CLOVER_BLOCK_DIM * 2, N_SPIN * N_COLORS);
    }

    #[test]
    fn lcg_gaussian_mean_near_zero() {
        let mut seed = 42u64;
        let n = 10_000;
        let sum: f64 = (0..n).map(|_| lcg_gaussian(&mut seed)).sum();
        let mean = sum / f64::from(n);
        assert!(mean.abs() < 0.1, "mean should be near 0, got {mean}");
    }
}
