// SPDX-License-Identifier: AGPL-3.0-only

//! Named numeric thresholds.
//!
//! Every threshold used by tests and validation binaries is defined here
//! with the reasoning behind its value. No ad-hoc literals.
//!
//! | Category | Basis | Example |
//! |----------|-------|---------|
//! | Operator identity | f64 rounding over one application | 1e-10 for `⟨x, My⟩ = ⟨M†x, y⟩` |
//! | Exact inverse | f64 rounding over a block elimination | 1e-12 for NEF round trip |
//! | Solver | Krylov stopping criterion | `rsd_target` for validation solves |

/// Dirac operator identities, clover and NEF block algebra.
pub mod lattice;
/// Krylov solves, predictors and the two-stage orchestrator.
pub mod solver;

pub use lattice::{
    CLOVER_INVERSE_ABS, GAMMA5_HERMITICITY_REL, GAUGE_COVARIANCE_REL, NEF_FORCE_FINITE_DIFFERENCE_REL,
    NEF_PIVOT_DISCREPANCY_ABS, NEF_ROUND_TRIP_REL, OPERATOR_ADJOINT_REL, STAGED_OPERATOR_PARITY,
};
pub use solver::{
    MRE_DEPENDENCE_TOLERANCE, VALIDATION_MAX_ITER, VALIDATION_RSD_TARGET, VALIDATION_TOLERANCE_FACTOR,
};
