// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for field construction, accelerator calls and solves.
//!
//! Callers can pattern-match on failure modes (non-positive clover,
//! unknown subspace handle, failed re-solve) rather than parsing strings.
//! Conditions that must halt a production run are ordinary variants here;
//! the executable decides to stop via [`abort`].

use thiserror::Error;

use crate::accel::SubspaceHandle;
use crate::solver::Stage;

/// Clover term cannot be inverted.
#[derive(Debug, Error, PartialEq)]
pub enum CloverError {
    #[error("clover block {block} at site {site} is not positive definite (pivot {pivot:.3e})")]
    NotPositiveDefinite { site: usize, block: usize, pivot: f64 },
}

/// Invalid domain-wall fifth-dimension parameters.
#[derive(Debug, Error, PartialEq)]
pub enum NefError {
    #[error("fifth-dimension extent must be at least 2, got {0}")]
    ExtentTooSmall(usize),

    #[error("b5 has {b5} entries and c5 has {c5}; both must equal N5 = {n5}")]
    CoefficientLength { n5: usize, b5: usize, c5: usize },

    #[error("pivot {slice} of the diagonal block vanishes")]
    SingularPivot { slice: usize },
}

/// Failures reported by an accelerator backend.
#[derive(Debug, Error)]
pub enum AcceleratorError {
    #[error("no gauge field loaded")]
    GaugeNotLoaded,

    #[error("no clover field loaded")]
    CloverNotLoaded,

    #[error("buffer of {got} reals does not match the expected {expected}")]
    Layout { expected: usize, got: usize },

    #[error("unknown multigrid subspace handle {0}")]
    UnknownSubspace(SubspaceHandle),

    #[error("multigrid preconditioner requested but none is attached")]
    MissingPreconditioner,

    #[error("loaded clover term rejected: {0}")]
    Clover(#[from] CloverError),
}

/// Named-object store failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("named object '{0}' already exists")]
    AlreadyExists(String),

    #[error("named object '{0}' not found")]
    NotFound(String),

    #[error("named object '{id}' does not hold a {expected}")]
    TypeMismatch { id: String, expected: &'static str },
}

/// Errors from constructing or running the multigrid clover solver.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("multigrid parameters are required for the multigrid clover solver")]
    MissingMultigridParams,

    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read configuration {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(
        "re-solve for {stage} failed after subspace rebuild: rsd = {residual:.6e}, target = {target:.3e}, max tolerated = {tolerance:.3e}"
    )]
    ResolveFailed {
        stage: Stage,
        residual: f64,
        target: f64,
        tolerance: f64,
    },

    #[error("accelerator: {0}")]
    Accelerator(#[from] AcceleratorError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("clover: {0}")]
    Clover(#[from] CloverError),
}

/// Log `err` and terminate the process with status 1.
pub fn abort(err: &SolverError) -> ! {
    log::error!("{err}");
    std::process::exit(1)
}
