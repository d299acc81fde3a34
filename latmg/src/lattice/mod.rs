// SPDX-License-Identifier: AGPL-3.0-only

//! Lattice field substrate for Wilson-clover fermions.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `complex_f64` | Complex f64 arithmetic, `Pod` for flat staging |
//! | `su3` | SU(3) 3×3 complex matrices and colour vectors |
//! | `gauge` | Geometry, checkerboards, gauge links, plaquette |
//! | `spinor` | Four-spinor fields with subset-restricted linear algebra |
//! | `gamma` | DeGrand-Rossi gamma matrices, `σ_μν` |
//! | `dslash` | Wilson hopping term between checkerboards |
//! | `clover` | Clover term, Cholesky inverse, packed layout |
//! | `gauge_fix` | Temporal axial gauge transform |
//!
//! # References
//!
//! - Gattringer & Lang, "Quantum Chromodynamics on the Lattice" (2010)
//! - DeGrand & DeTar, "Lattice Methods for QCD" (2006)

/// Clover term construction, inverse and packing.
pub mod clover;
/// Complex f64 arithmetic (re, im).
pub mod complex_f64;
/// LCG PRNG, field dimensions, and shared numerical guards.
pub mod constants;
/// Wilson hopping term `D(±)` between checkerboards.
pub mod dslash;
/// DeGrand-Rossi gamma matrices.
pub mod gamma;
/// Geometry, parity, subsets and SU(3) gauge links.
pub mod gauge;
/// Temporal axial gauge fixing.
pub mod gauge_fix;
/// Four-spinor fermion fields.
pub mod spinor;
/// SU(3) 3x3 complex matrix operations.
pub mod su3;
