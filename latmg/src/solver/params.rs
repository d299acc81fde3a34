// SPDX-License-Identifier: AGPL-3.0-only

//! Solver configuration.
//!
//! Loaded from JSON; every field has a default so partial files work.
//! Enum-valued precision, reconstruction and Schwarz fields accept the
//! upper-case names used by production input files and map anything else
//! to their `Default` variant, which the translator resolves to a fallback.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SolverError;
use crate::lattice::constants::N_DIM;
use crate::linop::CloverParams;

/// Requested floating-point precision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Precision {
    Half,
    Single,
    Double,
    #[default]
    #[serde(other)]
    Default,
}

/// Requested gauge-link compression.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reconstruct {
    #[serde(rename = "RECONS_NONE")]
    None,
    #[serde(rename = "RECONS_8")]
    Recons8,
    #[serde(rename = "RECONS_12")]
    Recons12,
    #[default]
    #[serde(other)]
    Default,
}

/// Requested Schwarz smoother.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schwarz {
    #[serde(rename = "ADDITIVE_SCHWARZ")]
    Additive,
    #[serde(rename = "MULTIPLICATIVE_SCHWARZ")]
    Multiplicative,
    #[default]
    #[serde(other)]
    Default,
}

/// Multigrid preconditioner parameters. Per-level vectors hold one entry
/// per coarsening step (`mg_levels - 1`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultigridParams {
    pub mg_levels: usize,
    pub blocking: Vec<[usize; N_DIM]>,
    pub nvec: Vec<usize>,
    pub nu_pre: Vec<usize>,
    pub nu_post: Vec<usize>,
    pub max_iter_subspace_create: Vec<usize>,
    pub max_iter_subspace_refresh: Vec<usize>,
    pub rsd_target_subspace_create: Vec<f64>,
    pub outer_gcr_nkrylov: usize,
    pub precond_gcr_nkrylov: usize,
    /// Preconditioner solve tolerance.
    pub tol: f64,
    pub max_iterations: usize,
    pub relaxation_omega_mg: f64,
    pub relaxation_omega_outer: f64,
    pub schwarz_type: Schwarz,
    pub prec: Precision,
    pub reconstruct: Reconstruct,
    pub setup_on_device: bool,
    pub check_multigrid_setup: bool,
}

impl Default for MultigridParams {
    fn default() -> Self {
        Self {
            mg_levels: 2,
            blocking: vec![[4, 4, 4, 4]],
            nvec: vec![24],
            nu_pre: vec![2],
            nu_post: vec![2],
            max_iter_subspace_create: vec![500],
            max_iter_subspace_refresh: vec![500],
            rsd_target_subspace_create: vec![5e-6],
            outer_gcr_nkrylov: 12,
            precond_gcr_nkrylov: 12,
            tol: 1e-1,
            max_iterations: 10,
            relaxation_omega_mg: 1.0,
            relaxation_omega_outer: 1.0,
            schwarz_type: Schwarz::Default,
            prec: Precision::Default,
            reconstruct: Reconstruct::Default,
            setup_on_device: true,
            check_multigrid_setup: false,
        }
    }
}

/// Complete configuration of the multigrid clover `M†M` solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfiguration {
    /// Mass, clover coefficients and anisotropy.
    #[serde(flatten)]
    pub clover: CloverParams,
    pub max_iter: usize,
    pub rsd_target: f64,
    /// Reliable-update delta.
    pub delta: f64,
    pub cuda_precision: Precision,
    pub cuda_sloppy_precision: Precision,
    pub cuda_reconstruct: Reconstruct,
    pub cuda_sloppy_reconstruct: Reconstruct,
    pub antiperiodic_t: bool,
    pub asymmetric: bool,
    pub axial_gauge: bool,
    pub silent_fail: bool,
    pub rsd_tolerance_factor: f64,
    /// Stage iteration count at which the subspace is refreshed;
    /// `None` uses `max_iter`.
    pub threshold_count: Option<usize>,
    pub subspace_id: String,
    pub verbose: bool,
    pub multigrid: Option<MultigridParams>,
}

impl Default for SolverConfiguration {
    fn default() -> Self {
        Self {
            clover: CloverParams::default(),
            max_iter: 1000,
            rsd_target: 1e-10,
            delta: 0.1,
            cuda_precision: Precision::Default,
            cuda_sloppy_precision: Precision::Default,
            cuda_reconstruct: Reconstruct::Default,
            cuda_sloppy_reconstruct: Reconstruct::Default,
            antiperiodic_t: false,
            asymmetric: true,
            axial_gauge: false,
            silent_fail: false,
            rsd_tolerance_factor: 10.0,
            threshold_count: None,
            subspace_id: "mg_subspace".to_string(),
            verbose: false,
            multigrid: None,
        }
    }
}

impl SolverConfiguration {
    /// # Errors
    ///
    /// [`SolverError::ConfigParse`] on malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, SolverError> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    ///
    /// [`SolverError::ConfigIo`] when the file cannot be read,
    /// [`SolverError::ConfigParse`] on malformed JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SolverError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SolverError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Multigrid parameters, required by this solver.
    ///
    /// # Errors
    ///
    /// [`SolverError::MissingMultigridParams`] when absent.
    pub fn multigrid(&self) -> Result<&MultigridParams, SolverError> {
        self.multigrid.as_ref().ok_or(SolverError::MissingMultigridParams)
    }

    /// Largest tolerated relative residual.
    #[must_use]
    pub fn max_tolerated(&self) -> f64 {
        self.rsd_tolerance_factor * self.rsd_target
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold_count.unwrap_or(self.max_iter)
    }

    /// # Errors
    ///
    /// [`SolverError::MissingMultigridParams`] without multigrid parameters,
    /// [`SolverError::InvalidConfig`] for anything else this solver cannot run.
    pub fn validate(&self) -> Result<(), SolverError> {
        let mg = self.multigrid()?;
        if mg.mg_levels < 2 {
            return Err(SolverError::InvalidConfig(format!(
                "mg_levels must be at least 2, got {}",
                mg.mg_levels
            )));
        }
        let steps = mg.mg_levels - 1;
        let per_level = [
            ("blocking", mg.blocking.len()),
            ("nvec", mg.nvec.len()),
            ("nu_pre", mg.nu_pre.len()),
            ("nu_post", mg.nu_post.len()),
            ("max_iter_subspace_create", mg.max_iter_subspace_create.len()),
            ("max_iter_subspace_refresh", mg.max_iter_subspace_refresh.len()),
            ("rsd_target_subspace_create", mg.rsd_target_subspace_create.len()),
        ];
        if let Some((name, len)) = per_level.iter().find(|(_, len)| *len < steps) {
            return Err(SolverError::InvalidConfig(format!(
                "{name} has {len} entries, {steps} levels need one each"
            )));
        }
        if self.rsd_target <= 0.0 {
            return Err(SolverError::InvalidConfig(format!(
                "rsd_target must be positive, got {}",
                self.rsd_target
            )));
        }
        if !self.asymmetric {
            return Err(SolverError::InvalidConfig(
                "only asymmetric even-odd preconditioning is supported".to_string(),
            ));
        }
        if self.subspace_id.is_empty() {
            return Err(SolverError::InvalidConfig("subspace_id must not be empty".to_string()));
        }
        Ok(())
    }
}
