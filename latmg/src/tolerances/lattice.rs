// SPDX-License-Identifier: AGPL-3.0-only

//! Operator-identity tolerances.

// ═══════════════════════════════════════════════════════════════════
// Clover operator
// ═══════════════════════════════════════════════════════════════════

/// `⟨x, M y⟩ = ⟨M† x, y⟩`, relative to `|⟨x, M y⟩|`.
///
/// One preconditioned application is two hops, a clover inverse and a
/// clover multiply on a 4⁴ lattice; ~1e-14 observed.
pub const OPERATOR_ADJOINT_REL: f64 = 1e-10;

/// `‖γ5 M γ5 ψ − M† ψ‖ / ‖M† ψ‖`.
///
/// Both sides apply the same kernels in the same order, so the difference
/// is pure summation-order rounding.
pub const GAMMA5_HERMITICITY_REL: f64 = 1e-10;

/// `‖A A⁻¹ ψ − ψ‖ / ‖ψ‖` per site for the Cholesky inverse.
///
/// 6×6 Hermitian positive blocks with condition number below ~10.
pub const CLOVER_INVERSE_ABS: f64 = 1e-12;

/// Staged (rescaled links, isotropic hop) vs. host (raw links,
/// anisotropic hop) operator.
///
/// The two differ only by where `cf[μ]` is multiplied in.
pub const STAGED_OPERATOR_PARITY: f64 = 1e-12;

/// `g† M' g ψ` vs. `M ψ` after temporal gauge fixing.
///
/// Gauge rotation adds one SU(3) product per link and per site.
pub const GAUGE_COVARIANCE_REL: f64 = 1e-11;

// ═══════════════════════════════════════════════════════════════════
// NEF diagonal block
// ═══════════════════════════════════════════════════════════════════

/// `‖A⁻¹ A ψ − ψ‖ / ‖ψ‖` for the five-dimensional diagonal block.
///
/// Four sequential sweeps over `N5` slices; rounding grows linearly with
/// `N5`, ~1e-15 per slice.
pub const NEF_ROUND_TRIP_REL: f64 = 1e-12;

/// `|f₋[N−2] l[N−2] − f₋[N−1] r[N−2]|`.
///
/// The two last-pivot corrections are algebraically equal; the recurrences
/// behind `l` and `r` accumulate rounding over `N5 − 2` steps.
pub const NEF_PIVOT_DISCREPANCY_ABS: f64 = 1e-12;

/// Central difference of `Re⟨χ, M(U + εδU) ψ⟩` vs. the contracted link
/// derivative, relative to the contraction.
///
/// `M` is at most quadratic in the links, so the central difference has no
/// truncation error; what remains is cancellation in the difference of two
/// sums over the whole lattice, amplified by `1/ε`.
pub const NEF_FORCE_FINITE_DIFFERENCE_REL: f64 = 1e-9;
