// SPDX-License-Identifier: AGPL-3.0-only

//! latmg: multigrid clover `M†M` solver and NEF domain-wall diagonal block
//!
//! Solves `M†M ψ = χ` for the even-odd preconditioned Wilson-clover
//! operator by two multigrid-preconditioned accelerator solves, verifying
//! each stage on the host and refreshing or rebuilding the multigrid
//! subspace as needed. Also provides the five-dimensional diagonal block
//! of the generalized (NEF) domain-wall operator and its inverse.
//!
//! ## Modules
//!   - `lattice`: geometry, gauge links, spinors, gammas, dslash, clover, gauge fixing
//!   - `linop`: linear-operator traits, preconditioned clover and NEF operators
//!   - `accel`: accelerator contract and the CPU reference backend
//!   - `solver`: configuration, staging, subspace lifecycle, predictors, `M†M` solver
//!   - `error`: typed errors; `abort` for executables
//!   - `tolerances`: named numeric thresholds
//!   - `validation`: pass/fail harness for the `validate_*` binaries
//!
//! ## Validation binaries
//!   - `validate_mg_clover`: staging, two-stage solve, predictors, subspace recovery
//!   - `validate_nef_diag`: NEF diagonal block identities

pub mod accel;
pub mod error;
pub mod lattice;
pub mod linop;
pub mod solver;
pub mod tolerances;
pub mod validation;
