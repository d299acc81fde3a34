// SPDX-License-Identifier: AGPL-3.0-only

//! Accelerator contract for the multigrid clover solve.
//!
//! An [`Accelerator`] owns device copies of the gauge links and the clover
//! term, runs the even-odd preconditioned Krylov solve, and manages
//! multigrid subspaces behind opaque [`SubspaceHandle`]s. Every call takes
//! its configuration record by reference; nothing is retained between
//! calls except loaded fields, subspaces and resident chronological
//! history.
//!
//! Buffers are flat `f64` views of the host structures:
//!
//! | Buffer | Layout |
//! |--------|--------|
//! | gauge | `links[site * 4 + mu]`, 18 reals per link |
//! | clover | [`PackedCloverSite`](crate::lattice::clover::PackedCloverSite), 72 reals per site |
//! | spinor | full lattice, 24 reals per site; only odd sites are read or written |

pub mod host;

use std::fmt;

pub use host::HostAccelerator;

use crate::error::AcceleratorError;
use crate::lattice::constants::N_DIM;

/// Opaque reference to accelerator-resident multigrid state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubspaceHandle(u64);

impl SubspaceHandle {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubspaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Floating-point format of device fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DevicePrecision {
    Half,
    Single,
    #[default]
    Double,
}

impl DevicePrecision {
    /// Host base precision from the size of the host real type.
    #[must_use]
    pub const fn from_word_size(bytes: usize) -> Self {
        if bytes == 4 {
            Self::Single
        } else {
            Self::Double
        }
    }
}

/// Number of reals stored per gauge link on the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkReconstruct {
    No,
    Recon8,
    #[default]
    Recon12,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TBoundary {
    #[default]
    Periodic,
    AntiPeriodic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchwarzKind {
    #[default]
    Additive,
    Multiplicative,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    Silent,
    #[default]
    Summarize,
    Verbose,
}

/// Even-odd preconditioning of the clover operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatPcType {
    /// `A_oo − ¼ D_oe A_ee⁻¹ D_eo` on the odd checkerboard.
    #[default]
    OddOdd,
}

/// Preconditioner of the outer Krylov solve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PreconditionerKind {
    None,
    #[default]
    Multigrid,
}

/// Gauge field staging record.
#[derive(Clone, Debug, PartialEq)]
pub struct GaugeParam {
    pub dims: [usize; N_DIM],
    pub anisotropy: f64,
    pub t_boundary: TBoundary,
    pub cpu_prec: DevicePrecision,
    pub cuda_prec: DevicePrecision,
    pub cuda_prec_sloppy: DevicePrecision,
    pub cuda_prec_precondition: DevicePrecision,
    pub reconstruct: LinkReconstruct,
    pub reconstruct_sloppy: LinkReconstruct,
    pub reconstruct_precondition: LinkReconstruct,
    pub gauge_fixed: bool,
    /// Halo padding: largest half-lattice face volume.
    pub ga_pad: usize,
}

/// Accelerator-resident chronological history settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChronoSettings {
    pub max_dim: usize,
    pub index: usize,
    /// Store the solution in the history after the solve.
    pub make_resident: bool,
    /// Build the initial guess from the history.
    pub use_resident: bool,
    /// Overwrite the newest history entry instead of appending.
    pub replace_last: bool,
}

impl ChronoSettings {
    pub const OFF: Self = Self {
        max_dim: 0,
        index: 0,
        make_resident: false,
        use_resident: false,
        replace_last: false,
    };

    #[must_use]
    pub fn is_off(&self) -> bool {
        *self == Self::OFF
    }
}

impl Default for ChronoSettings {
    fn default() -> Self {
        Self::OFF
    }
}

/// Solve configuration passed to every [`Accelerator::invert`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct InvertParam {
    pub kappa: f64,
    pub tol: f64,
    pub maxiter: usize,
    pub reliable_delta: f64,
    pub cpu_prec: DevicePrecision,
    pub cuda_prec: DevicePrecision,
    pub cuda_prec_sloppy: DevicePrecision,
    pub cuda_prec_precondition: DevicePrecision,
    pub clover_cuda_prec: DevicePrecision,
    pub clover_cuda_prec_sloppy: DevicePrecision,
    pub clover_cuda_prec_precondition: DevicePrecision,
    pub matpc: MatPcType,
    pub use_init_guess: bool,
    pub gcr_nkrylov: usize,
    pub omega: f64,
    pub tol_precondition: f64,
    pub maxiter_precondition: usize,
    pub schwarz: SchwarzKind,
    pub verbosity: Verbosity,
    pub verbosity_precondition: Verbosity,
    pub inv_type_precondition: PreconditionerKind,
    pub preconditioner: Option<SubspaceHandle>,
    pub chrono: ChronoSettings,
}

impl Default for InvertParam {
    fn default() -> Self {
        Self {
            kappa: 0.5,
            tol: 1e-10,
            maxiter: 1000,
            reliable_delta: 0.1,
            cpu_prec: DevicePrecision::Double,
            cuda_prec: DevicePrecision::Double,
            cuda_prec_sloppy: DevicePrecision::Double,
            cuda_prec_precondition: DevicePrecision::Half,
            clover_cuda_prec: DevicePrecision::Double,
            clover_cuda_prec_sloppy: DevicePrecision::Double,
            clover_cuda_prec_precondition: DevicePrecision::Half,
            matpc: MatPcType::OddOdd,
            use_init_guess: false,
            gcr_nkrylov: 10,
            omega: 1.0,
            tol_precondition: 0.1,
            maxiter_precondition: 10,
            schwarz: SchwarzKind::Additive,
            verbosity: Verbosity::Summarize,
            verbosity_precondition: Verbosity::Silent,
            inv_type_precondition: PreconditionerKind::Multigrid,
            preconditioner: None,
            chrono: ChronoSettings::OFF,
        }
    }
}

/// Multigrid hierarchy setup record, one entry per coarsening step.
#[derive(Clone, Debug, PartialEq)]
pub struct MultigridSetup {
    pub levels: usize,
    pub blocking: Vec<[usize; N_DIM]>,
    pub nvec: Vec<usize>,
    pub nu_pre: Vec<usize>,
    pub nu_post: Vec<usize>,
    pub setup_maxiter: Vec<usize>,
    /// Iterations spent re-running the null-space setup on update.
    pub setup_maxiter_refresh: Vec<usize>,
    pub setup_tol: Vec<f64>,
    pub coarse_solver_nkrylov: usize,
    pub smoother_omega: f64,
    pub smoother_schwarz: SchwarzKind,
    pub precision: DevicePrecision,
    pub setup_on_device: bool,
    pub check_setup: bool,
}

/// Outcome of one accelerator solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InvertStats {
    pub iterations: usize,
    /// `‖b − M x‖ / ‖b‖` on the active checkerboard.
    pub true_residual: f64,
}

/// Device-side linear solver with multigrid subspace management.
pub trait Accelerator {
    /// Upload gauge links.
    ///
    /// # Errors
    ///
    /// [`AcceleratorError::Layout`] on a buffer of the wrong size.
    fn load_gauge(&mut self, links: &[f64], param: &GaugeParam) -> Result<(), AcceleratorError>;

    /// # Errors
    ///
    /// [`AcceleratorError::GaugeNotLoaded`] when nothing is loaded.
    fn free_gauge(&mut self) -> Result<(), AcceleratorError>;

    /// Upload the packed clover term and its inverse.
    ///
    /// # Errors
    ///
    /// [`AcceleratorError::GaugeNotLoaded`] before [`load_gauge`](Self::load_gauge),
    /// [`AcceleratorError::Layout`] on a buffer of the wrong size.
    fn load_clover(&mut self, clover: &[f64], inverse: &[f64], param: &InvertParam) -> Result<(), AcceleratorError>;

    /// # Errors
    ///
    /// [`AcceleratorError::CloverNotLoaded`] when nothing is loaded.
    fn free_clover(&mut self) -> Result<(), AcceleratorError>;

    /// Solve `M x = b` on the odd checkerboard. `solution` is read as the
    /// initial guess when `param.use_init_guess` is set.
    ///
    /// # Errors
    ///
    /// Missing fields, unknown preconditioner handle or a layout mismatch.
    fn invert(&mut self, solution: &mut [f64], source: &[f64], param: &InvertParam)
        -> Result<InvertStats, AcceleratorError>;

    /// Run the full multigrid setup.
    ///
    /// # Errors
    ///
    /// Missing gauge or clover fields.
    fn new_multigrid(&mut self, setup: &MultigridSetup, param: &InvertParam) -> Result<SubspaceHandle, AcceleratorError>;

    /// Re-attach to loaded fields and re-run `setup_maxiter_refresh` setup
    /// iterations per level.
    ///
    /// # Errors
    ///
    /// [`AcceleratorError::UnknownSubspace`] for a handle not alive here.
    fn update_multigrid(&mut self, handle: SubspaceHandle, setup: &MultigridSetup) -> Result<(), AcceleratorError>;

    /// # Errors
    ///
    /// [`AcceleratorError::UnknownSubspace`] for a handle not alive here.
    fn destroy_multigrid(&mut self, handle: SubspaceHandle) -> Result<(), AcceleratorError>;

    /// Number of subspaces currently alive.
    fn live_subspaces(&self) -> usize;
}
