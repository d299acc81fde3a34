// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration → accelerator records.
//!
//! Pure mapping with no side effects. Unspecified precisions fall back to
//! the next coarser-grained choice (sloppy → device → host word size),
//! unspecified reconstruction to 12 reals per link, unspecified Schwarz
//! smoothers to additive.

use crate::accel::{
    ChronoSettings, DevicePrecision, GaugeParam, InvertParam, LinkReconstruct, MatPcType, MultigridSetup,
    PreconditionerKind, SchwarzKind, TBoundary, Verbosity,
};
use crate::error::SolverError;
use crate::lattice::constants::N_DIM;
use crate::lattice::gauge::Geometry;

use super::params::{Precision, Reconstruct, Schwarz, SolverConfiguration};

/// Kappa handed to the accelerator; the clover term is staged with the
/// mass already folded into its diagonal.
pub const STAGED_KAPPA: f64 = 0.5;

#[must_use]
pub const fn device_precision(p: Precision, fallback: DevicePrecision) -> DevicePrecision {
    match p {
        Precision::Half => DevicePrecision::Half,
        Precision::Single => DevicePrecision::Single,
        Precision::Double => DevicePrecision::Double,
        Precision::Default => fallback,
    }
}

#[must_use]
pub const fn link_reconstruct(r: Reconstruct) -> LinkReconstruct {
    match r {
        Reconstruct::None => LinkReconstruct::No,
        Reconstruct::Recons8 => LinkReconstruct::Recon8,
        Reconstruct::Recons12 | Reconstruct::Default => LinkReconstruct::Recon12,
    }
}

#[must_use]
pub const fn schwarz_kind(s: Schwarz) -> SchwarzKind {
    match s {
        Schwarz::Multiplicative => SchwarzKind::Multiplicative,
        Schwarz::Additive | Schwarz::Default => SchwarzKind::Additive,
    }
}

/// Halo padding: largest face volume over all directions, halved for
/// a single checkerboard.
#[must_use]
pub fn face_padding(dims: [usize; N_DIM]) -> usize {
    let geom = Geometry::new(dims);
    (0..N_DIM).map(|mu| geom.face_volume(mu) / 2).max().unwrap_or(0)
}

/// Accelerator records derived from one [`SolverConfiguration`].
#[derive(Clone, Debug, PartialEq)]
pub struct Translation {
    pub gauge: GaugeParam,
    pub invert: InvertParam,
    pub multigrid: MultigridSetup,
}

/// Build the gauge, invert and multigrid records for a lattice of `dims`.
///
/// # Errors
///
/// [`SolverError::MissingMultigridParams`] when the configuration has no
/// multigrid block.
pub fn translate(config: &SolverConfiguration, dims: [usize; N_DIM]) -> Result<Translation, SolverError> {
    let mg = config.multigrid()?;

    let cpu_prec = DevicePrecision::from_word_size(std::mem::size_of::<f64>());
    let cuda_prec = device_precision(config.cuda_precision, cpu_prec);
    let cuda_prec_sloppy = device_precision(config.cuda_sloppy_precision, cuda_prec);
    let cuda_prec_precondition = device_precision(mg.prec, DevicePrecision::Half);

    let gauge = GaugeParam {
        dims,
        anisotropy: config.clover.aniso.gauge_anisotropy(),
        t_boundary: if config.antiperiodic_t {
            TBoundary::AntiPeriodic
        } else {
            TBoundary::Periodic
        },
        cpu_prec,
        cuda_prec,
        cuda_prec_sloppy,
        cuda_prec_precondition,
        reconstruct: link_reconstruct(config.cuda_reconstruct),
        reconstruct_sloppy: link_reconstruct(config.cuda_sloppy_reconstruct),
        reconstruct_precondition: link_reconstruct(mg.reconstruct),
        gauge_fixed: config.axial_gauge,
        ga_pad: face_padding(dims),
    };

    let invert = InvertParam {
        kappa: STAGED_KAPPA,
        tol: config.rsd_target,
        maxiter: config.max_iter,
        reliable_delta: config.delta,
        cpu_prec,
        cuda_prec,
        cuda_prec_sloppy,
        cuda_prec_precondition,
        clover_cuda_prec: cuda_prec,
        clover_cuda_prec_sloppy: cuda_prec_sloppy,
        clover_cuda_prec_precondition: cuda_prec_precondition,
        matpc: MatPcType::OddOdd,
        use_init_guess: false,
        gcr_nkrylov: mg.outer_gcr_nkrylov,
        omega: mg.relaxation_omega_outer,
        tol_precondition: mg.tol,
        maxiter_precondition: mg.max_iterations,
        schwarz: schwarz_kind(mg.schwarz_type),
        verbosity: if config.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Summarize
        },
        verbosity_precondition: Verbosity::Silent,
        inv_type_precondition: PreconditionerKind::Multigrid,
        preconditioner: None,
        chrono: ChronoSettings::OFF,
    };

    let steps = mg.mg_levels.saturating_sub(1);
    let multigrid = MultigridSetup {
        levels: mg.mg_levels,
        blocking: mg.blocking.clone(),
        nvec: mg.nvec.clone(),
        nu_pre: mg.nu_pre.clone(),
        nu_post: mg.nu_post.clone(),
        setup_maxiter: mg.max_iter_subspace_create.clone(),
        setup_maxiter_refresh: vec![0; steps],
        setup_tol: mg.rsd_target_subspace_create.clone(),
        coarse_solver_nkrylov: mg.precond_gcr_nkrylov,
        smoother_omega: mg.relaxation_omega_mg,
        smoother_schwarz: schwarz_kind(mg.schwarz_type),
        precision: cuda_prec_precondition,
        setup_on_device: mg.setup_on_device,
        check_setup: mg.check_multigrid_setup,
    };

    Ok(Translation {
        gauge,
        invert,
        multigrid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linop::{AnisoParams, CloverParams};
    use crate::solver::params::MultigridParams;

    fn config() -> SolverConfiguration {
        SolverConfiguration {
            multigrid: Some(MultigridParams::default()),
            ..SolverConfiguration::default()
        }
    }

    #[test]
    fn unspecified_precisions_fall_back() {
        let t = translate(&config(), [4, 4, 4, 8]).expect("translate");
        assert_eq!(t.gauge.cpu_prec, DevicePrecision::Double);
        assert_eq!(t.gauge.cuda_prec, DevicePrecision::Double);
        assert_eq!(t.gauge.cuda_prec_sloppy, DevicePrecision::Double);
        assert_eq!(t.gauge.cuda_prec_precondition, DevicePrecision::Half);
        assert_eq!(t.gauge.reconstruct, LinkReconstruct::Recon12);
        assert_eq!(t.invert.schwarz, SchwarzKind::Additive);
    }

    #[test]
    fn sloppy_follows_device_precision() {
        let cfg = SolverConfiguration {
            cuda_precision: Precision::Single,
            ..config()
        };
        let t = translate(&cfg, [4, 4, 4, 4]).expect("translate");
        assert_eq!(t.invert.cuda_prec, DevicePrecision::Single);
        assert_eq!(t.invert.cuda_prec_sloppy, DevicePrecision::Single);
        assert_eq!(t.invert.clover_cuda_prec_sloppy, DevicePrecision::Single);
    }

    #[test]
    fn face_padding_is_largest_half_face() {
        // faces: 8·8·16, 4·8·16, 4·8·16, 4·8·8
        assert_eq!(face_padding([4, 8, 8, 16]), 512);
        assert_eq!(face_padding([4, 4, 4, 4]), 32);
    }

    #[test]
    fn solve_fields_mirror_configuration() {
        let mut cfg = config();
        cfg.rsd_target = 1e-9;
        cfg.max_iter = 750;
        cfg.delta = 0.05;
        cfg.verbose = true;
        cfg.antiperiodic_t = true;
        cfg.axial_gauge = true;
        cfg.clover = CloverParams {
            aniso: AnisoParams {
                aniso_p: true,
                xi_0: 3.5,
                nu: 0.875,
                ..AnisoParams::default()
            },
            ..CloverParams::default()
        };
        let t = translate(&cfg, [4, 4, 4, 4]).expect("translate");
        assert!((t.invert.kappa - 0.5).abs() < 1e-15);
        assert!((t.invert.tol - 1e-9).abs() < 1e-24);
        assert_eq!(t.invert.maxiter, 750);
        assert!((t.invert.reliable_delta - 0.05).abs() < 1e-15);
        assert_eq!(t.invert.verbosity, Verbosity::Verbose);
        assert_eq!(t.invert.verbosity_precondition, Verbosity::Silent);
        assert_eq!(t.invert.inv_type_precondition, PreconditionerKind::Multigrid);
        assert!(t.invert.chrono.is_off());
        assert!(!t.invert.use_init_guess);
        assert_eq!(t.gauge.t_boundary, TBoundary::AntiPeriodic);
        assert!(t.gauge.gauge_fixed);
        assert!((t.gauge.anisotropy - 4.0).abs() < 1e-12);
    }

    #[test]
    fn multigrid_refresh_counts_start_at_zero() {
        let mut cfg = config();
        cfg.multigrid = Some(MultigridParams {
            mg_levels: 3,
            blocking: vec![[2, 2, 2, 2]; 2],
            nvec: vec![24, 32],
            nu_pre: vec![0, 0],
            nu_post: vec![4, 4],
            max_iter_subspace_create: vec![500, 500],
            max_iter_subspace_refresh: vec![50, 50],
            rsd_target_subspace_create: vec![5e-6, 5e-6],
            schwarz_type: Schwarz::Multiplicative,
            ..MultigridParams::default()
        });
        let t = translate(&cfg, [8, 8, 8, 8]).expect("translate");
        assert_eq!(t.multigrid.levels, 3);
        assert_eq!(t.multigrid.setup_maxiter_refresh, vec![0, 0]);
        assert_eq!(t.multigrid.setup_maxiter, vec![500, 500]);
        assert_eq!(t.multigrid.smoother_schwarz, SchwarzKind::Multiplicative);
    }

    #[test]
    fn missing_multigrid_is_reported() {
        let err = translate(&SolverConfiguration::default(), [4, 4, 4, 4]).unwrap_err();
        assert!(matches!(err, SolverError::MissingMultigridParams));
    }
}
