// SPDX-License-Identifier: AGPL-3.0-only

//! Multigrid clover `M†M` system solver.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `params` | JSON solver configuration and validation |
//! | `translate` | Configuration → accelerator gauge/invert/multigrid records |
//! | `stager` | Gauge fixing, clover build, anisotropy rescaling, upload |
//! | `registry` | Named-object store holding multigrid subspaces |
//! | `subspace` | Create, recover, refresh, rebuild and destroy subspaces |
//! | `predictor` | Initial-guess predictors for the two solve stages |
//! | `mdagm_mg` | Two-stage `Y`/`X` solve with verification and recovery |

pub mod mdagm_mg;
pub mod params;
pub mod predictor;
pub mod registry;
pub mod stager;
pub mod subspace;
pub mod translate;

use std::fmt;
use std::ops::AddAssign;

pub use mdagm_mg::MdagMMultigridCloverSolver;
pub use params::{MultigridParams, Precision, Reconstruct, Schwarz, SolverConfiguration};
pub use predictor::{
    LastSolutionPredictor, MinimalResidualPredictor, Predictor, ResidentChronoPredictor, TwoStepPredictor,
    ZeroGuessPredictor,
};
pub use registry::NamedObjectMap;
pub use subspace::{MgSubspace, SubspaceManager};

/// Stage of the two-step solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// `M† Y = χ`
    Y,
    /// `M ψ = Y`
    X,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Y => write!(f, "Y"),
            Self::X => write!(f, "X"),
        }
    }
}

/// Iteration count and residual norm of a solve.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SolveResult {
    pub iterations: usize,
    /// Absolute residual norm on the operator's subset.
    pub residual: f64,
}

/// Accumulates iterations; the residual is taken from the later solve.
impl AddAssign for SolveResult {
    fn add_assign(&mut self, rhs: Self) {
        self.iterations += rhs.iterations;
        self.residual = rhs.residual;
    }
}
