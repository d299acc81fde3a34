// SPDX-License-Identifier: AGPL-3.0-only

//! Solver and predictor tolerances.

/// Skip a history vector in minimal-residual extrapolation when its image
/// keeps less than this fraction of its norm after orthogonalisation.
///
/// Below ~1e-10 the Gram-Schmidt coefficients are dominated by rounding
/// and the extrapolated guess degrades.
pub const MRE_DEPENDENCE_TOLERANCE: f64 = 1e-10;

/// Target relative residual of the validation solves.
pub const VALIDATION_RSD_TARGET: f64 = 1e-10;

/// Accepted stage residual is `factor × target`.
///
/// The X stage bounds `‖M ψ − Y‖`; the verified `M†M` residual picks up a
/// factor up to the condition number of `M`, ~20 on the validation lattice.
pub const VALIDATION_TOLERANCE_FACTOR: f64 = 100.0;

/// Iteration cap for validation solves.
pub const VALIDATION_MAX_ITER: usize = 1000;
