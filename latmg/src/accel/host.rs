// SPDX-License-Identifier: AGPL-3.0-only

//! CPU reference accelerator in f64.
//!
//! Rebuilds the odd-odd preconditioned clover operator from the staged
//! buffers and solves with restarted flexible GCR. When a multigrid
//! subspace is attached its record supplies a minimal-residual smoother
//! (`nu_pre + nu_post` relaxed MR steps) used as the right preconditioner;
//! device precisions are accepted but all arithmetic stays in f64.

use std::collections::{BTreeMap, HashMap};

use crate::accel::{
    Accelerator, GaugeParam, InvertParam, InvertStats, MultigridSetup, PreconditionerKind, SubspaceHandle,
    Verbosity,
};
use crate::error::AcceleratorError;
use crate::lattice::clover::{CloverTerm, PackedCloverSite};
use crate::lattice::complex_f64::Complex64;
use crate::lattice::constants::{LATTICE_DIVISION_GUARD, N_DIM, SPINOR_SITE_REALS};
use crate::lattice::dslash::WilsonDslash;
use crate::lattice::gauge::{GaugeField, Geometry, Subset};
use crate::lattice::spinor::SpinorField;
use crate::lattice::su3::Su3Matrix;
use crate::linop::{EvenOddPrecCloverOperator, LinearOperator, Sign};
use crate::solver::predictor::minimal_residual_guess;

/// Live multigrid subspace: its setup record and how often it was updated.
#[derive(Clone, Debug)]
struct SubspaceRecord {
    setup: MultigridSetup,
    updates: usize,
}

/// CPU backend implementing [`Accelerator`].
#[derive(Debug, Default)]
pub struct HostAccelerator {
    gauge: Option<GaugeField>,
    gauge_param: Option<GaugeParam>,
    clover: Option<(CloverTerm, CloverTerm)>,
    subspaces: BTreeMap<SubspaceHandle, SubspaceRecord>,
    next_handle: u64,
    chrono: HashMap<usize, Vec<SpinorField>>,
}

impl HostAccelerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gauge staging record of the loaded links.
    #[must_use]
    pub fn gauge_param(&self) -> Option<&GaugeParam> {
        self.gauge_param.as_ref()
    }

    /// Number of vectors held in chronological channel `index`.
    #[must_use]
    pub fn chrono_depth(&self, index: usize) -> usize {
        self.chrono.get(&index).map_or(0, Vec::len)
    }

    /// Times `update_multigrid` ran on `handle`.
    #[must_use]
    pub fn subspace_updates(&self, handle: SubspaceHandle) -> Option<usize> {
        self.subspaces.get(&handle).map(|r| r.updates)
    }

    fn geometry(&self) -> Result<Geometry, AcceleratorError> {
        self.gauge.as_ref().map(GaugeField::geometry).ok_or(AcceleratorError::GaugeNotLoaded)
    }

    fn operator(&self) -> Result<EvenOddPrecCloverOperator, AcceleratorError> {
        let gauge = self.gauge.clone().ok_or(AcceleratorError::GaugeNotLoaded)?;
        let (clover, inverse) = self.clover.clone().ok_or(AcceleratorError::CloverNotLoaded)?;
        // Anisotropy is already folded into the staged links.
        Ok(EvenOddPrecCloverOperator::from_parts(gauge, WilsonDslash::isotropic(), clover, inverse))
    }

    fn unpack_clover(geometry: Geometry, buffer: &[f64]) -> Result<CloverTerm, AcceleratorError> {
        let expected = geometry.volume() * std::mem::size_of::<PackedCloverSite>() / std::mem::size_of::<f64>();
        let layout = || AcceleratorError::Layout {
            expected,
            got: buffer.len(),
        };
        let sites: &[PackedCloverSite] = bytemuck::try_cast_slice(buffer).map_err(|_| layout())?;
        CloverTerm::from_packed(geometry, sites).ok_or_else(layout)
    }

    fn smoother(&self, param: &InvertParam) -> Result<Option<MrSmoother>, AcceleratorError> {
        if param.inv_type_precondition == PreconditionerKind::None {
            return Ok(None);
        }
        let handle = param.preconditioner.ok_or(AcceleratorError::MissingPreconditioner)?;
        let record = self.subspaces.get(&handle).ok_or(AcceleratorError::UnknownSubspace(handle))?;
        let steps = record.setup.nu_pre.first().copied().unwrap_or(0) + record.setup.nu_post.first().copied().unwrap_or(0);
        Ok(Some(MrSmoother {
            steps: steps.max(1),
            omega: record.setup.smoother_omega,
        }))
    }

    fn initial_guess(
        &self,
        op: &EvenOddPrecCloverOperator,
        solution: &[f64],
        source: &SpinorField,
        param: &InvertParam,
    ) -> Result<SpinorField, AcceleratorError> {
        let geometry = op.geometry();
        if param.chrono.use_resident {
            if let Some(history) = self.chrono.get(&param.chrono.index).filter(|h| !h.is_empty()) {
                return Ok(minimal_residual_guess(op, history, source, Sign::Plus));
            }
        }
        if param.use_init_guess {
            return spinor_from(geometry, solution);
        }
        Ok(SpinorField::zeros(geometry))
    }

    fn record_chrono(&mut self, solution: &SpinorField, param: &InvertParam) {
        let chrono = param.chrono;
        if !chrono.make_resident || chrono.max_dim == 0 {
            return;
        }
        let history = self.chrono.entry(chrono.index).or_default();
        if chrono.replace_last && !history.is_empty() {
            let last = history.len() - 1;
            history[last] = solution.clone();
        } else {
            history.push(solution.clone());
        }
        if history.len() > chrono.max_dim {
            let excess = history.len() - chrono.max_dim;
            history.drain(..excess);
        }
    }
}

fn spinor_from(geometry: Geometry, reals: &[f64]) -> Result<SpinorField, AcceleratorError> {
    SpinorField::from_reals(geometry, reals).ok_or(AcceleratorError::Layout {
        expected: geometry.volume() * SPINOR_SITE_REALS,
        got: reals.len(),
    })
}

/// Relaxed minimal-residual smoother approximating `M⁻¹ r`.
#[derive(Clone, Copy, Debug)]
struct MrSmoother {
    steps: usize,
    omega: f64,
}

impl MrSmoother {
    fn apply(&self, op: &dyn LinearOperator, r: &SpinorField) -> SpinorField {
        let subset = op.subset();
        let mut z = SpinorField::zeros(op.geometry());
        let mut res = r.clone();
        let mut ar = SpinorField::zeros(op.geometry());
        for _ in 0..self.steps {
            op.apply(&mut ar, &res, Sign::Plus);
            let denom = ar.norm_sq(subset);
            if denom < LATTICE_DIVISION_GUARD {
                break;
            }
            let a = ar.dot(&res, subset).scale(self.omega / denom);
            z.axpy(a, &res, subset);
            res.axpy(-a, &ar, subset);
        }
        z
    }
}

/// Restarted flexible GCR settings.
#[derive(Clone, Copy, Debug)]
struct Fgcr {
    tol: f64,
    maxiter: usize,
    nkrylov: usize,
    precond: Option<MrSmoother>,
    verbose: bool,
}

impl Fgcr {
    /// Solve `op x = b` in place; returns the number of Krylov steps.
    fn solve(&self, op: &dyn LinearOperator, x: &mut SpinorField, b: &SpinorField) -> usize {
        let subset = op.subset();
        let geometry = op.geometry();
        let target = self.tol * b.norm_sq(subset).sqrt();

        let mut r = SpinorField::zeros(geometry);
        op.apply(&mut r, x, Sign::Plus);
        r.xpby(b, Complex64::real(-1.0), subset);

        let mut iterations = 0;
        let mut r_norm = r.norm_sq(subset).sqrt();
        while r_norm > target && iterations < self.maxiter {
            let mut directions: Vec<SpinorField> = Vec::with_capacity(self.nkrylov);
            let mut images: Vec<SpinorField> = Vec::with_capacity(self.nkrylov);
            for _ in 0..self.nkrylov.max(1) {
                let mut z = match self.precond {
                    Some(k) => k.apply(op, &r),
                    None => r.clone(),
                };
                let mut az = SpinorField::zeros(geometry);
                op.apply(&mut az, &z, Sign::Plus);
                for (p, ap) in directions.iter().zip(&images) {
                    let beta = ap.dot(&az, subset);
                    az.axpy(-beta, ap, subset);
                    z.axpy(-beta, p, subset);
                }
                let norm = az.norm_sq(subset).sqrt();
                if norm < LATTICE_DIVISION_GUARD {
                    break;
                }
                let inv = Complex64::real(1.0 / norm);
                az.scale(inv, subset);
                z.scale(inv, subset);

                let alpha = az.dot(&r, subset);
                x.axpy(alpha, &z, subset);
                r.axpy(-alpha, &az, subset);
                directions.push(z);
                images.push(az);

                iterations += 1;
                r_norm = r.norm_sq(subset).sqrt();
                if self.verbose {
                    log::debug!("GCR: {iterations} iterations, <r,r> = {:.6e}", r_norm * r_norm);
                }
                if r_norm <= target || iterations >= self.maxiter {
                    break;
                }
            }
            if directions.is_empty() {
                break;
            }
            // Restart from the true residual.
            op.apply(&mut r, x, Sign::Plus);
            r.xpby(b, Complex64::real(-1.0), subset);
            r_norm = r.norm_sq(subset).sqrt();
        }
        iterations
    }
}

impl Accelerator for HostAccelerator {
    fn load_gauge(&mut self, links: &[f64], param: &GaugeParam) -> Result<(), AcceleratorError> {
        let geometry = Geometry::new(param.dims);
        let expected = geometry.volume() * N_DIM * std::mem::size_of::<Su3Matrix>() / std::mem::size_of::<f64>();
        let layout = || AcceleratorError::Layout {
            expected,
            got: links.len(),
        };
        let matrices: &[Su3Matrix] = bytemuck::try_cast_slice(links).map_err(|_| layout())?;
        let gauge = GaugeField::from_links(geometry, matrices.to_vec()).ok_or_else(layout)?;
        log::debug!(
            "host: gauge {:?} loaded, anisotropy {}, ga_pad {}",
            param.dims,
            param.anisotropy,
            param.ga_pad
        );
        self.gauge = Some(gauge);
        self.gauge_param = Some(param.clone());
        Ok(())
    }

    fn free_gauge(&mut self) -> Result<(), AcceleratorError> {
        self.gauge_param = None;
        self.gauge.take().map(|_| ()).ok_or(AcceleratorError::GaugeNotLoaded)
    }

    fn load_clover(&mut self, clover: &[f64], inverse: &[f64], _param: &InvertParam) -> Result<(), AcceleratorError> {
        let geometry = self.geometry()?;
        let term = Self::unpack_clover(geometry, clover)?;
        let inv = Self::unpack_clover(geometry, inverse)?;
        self.clover = Some((term, inv));
        Ok(())
    }

    fn free_clover(&mut self) -> Result<(), AcceleratorError> {
        self.clover.take().map(|_| ()).ok_or(AcceleratorError::CloverNotLoaded)
    }

    fn invert(
        &mut self,
        solution: &mut [f64],
        source: &[f64],
        param: &InvertParam,
    ) -> Result<InvertStats, AcceleratorError> {
        let op = self.operator()?;
        let geometry = op.geometry();
        let b = spinor_from(geometry, source)?;
        let precond = self.smoother(param)?;
        let mut x = self.initial_guess(&op, solution, &b, param)?;

        let b_norm = b.norm_sq(Subset::Odd).sqrt();
        let iterations = if b_norm > 0.0 {
            let gcr = Fgcr {
                tol: param.tol,
                maxiter: param.maxiter,
                nkrylov: param.gcr_nkrylov,
                precond,
                verbose: param.verbosity == Verbosity::Verbose,
            };
            gcr.solve(&op, &mut x, &b)
        } else {
            x.zero(Subset::All);
            0
        };

        let mut r = SpinorField::zeros(geometry);
        op.apply(&mut r, &x, Sign::Plus);
        r.xpby(&b, Complex64::real(-1.0), Subset::Odd);
        let true_residual = if b_norm > 0.0 {
            r.norm_sq(Subset::Odd).sqrt() / b_norm
        } else {
            0.0
        };

        self.record_chrono(&x, param);

        let out = x.as_reals();
        if solution.len() != out.len() {
            return Err(AcceleratorError::Layout {
                expected: out.len(),
                got: solution.len(),
            });
        }
        solution.copy_from_slice(out);

        if param.verbosity != Verbosity::Silent {
            log::debug!("host GCR: converged in {iterations} iterations, true residual {true_residual:.6e}");
        }
        Ok(InvertStats {
            iterations,
            true_residual,
        })
    }

    fn new_multigrid(&mut self, setup: &MultigridSetup, _param: &InvertParam) -> Result<SubspaceHandle, AcceleratorError> {
        self.geometry()?;
        if self.clover.is_none() {
            return Err(AcceleratorError::CloverNotLoaded);
        }
        self.next_handle += 1;
        let handle = SubspaceHandle::new(self.next_handle);
        self.subspaces.insert(
            handle,
            SubspaceRecord {
                setup: setup.clone(),
                updates: 0,
            },
        );
        log::debug!("host: multigrid subspace {handle} with {} levels", setup.levels);
        Ok(handle)
    }

    fn update_multigrid(&mut self, handle: SubspaceHandle, setup: &MultigridSetup) -> Result<(), AcceleratorError> {
        let record = self.subspaces.get_mut(&handle).ok_or(AcceleratorError::UnknownSubspace(handle))?;
        record.setup = setup.clone();
        record.updates += 1;
        Ok(())
    }

    fn destroy_multigrid(&mut self, handle: SubspaceHandle) -> Result<(), AcceleratorError> {
        self.subspaces
            .remove(&handle)
            .map(|_| ())
            .ok_or(AcceleratorError::UnknownSubspace(handle))
    }

    fn live_subspaces(&self) -> usize {
        self.subspaces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{ChronoSettings, DevicePrecision, LinkReconstruct, SchwarzKind, TBoundary};
    use crate::linop::CloverParams;

    fn geom() -> Geometry {
        Geometry::new([4, 4, 4, 4])
    }

    fn gauge_param() -> GaugeParam {
        GaugeParam {
            dims: [4, 4, 4, 4],
            anisotropy: 1.0,
            t_boundary: TBoundary::Periodic,
            cpu_prec: DevicePrecision::Double,
            cuda_prec: DevicePrecision::Double,
            cuda_prec_sloppy: DevicePrecision::Double,
            cuda_prec_precondition: DevicePrecision::Half,
            reconstruct: LinkReconstruct::Recon12,
            reconstruct_sloppy: LinkReconstruct::Recon12,
            reconstruct_precondition: LinkReconstruct::Recon12,
            gauge_fixed: false,
            ga_pad: 32,
        }
    }

    fn setup() -> MultigridSetup {
        MultigridSetup {
            levels: 2,
            blocking: vec![[2, 2, 2, 2]],
            nvec: vec![24],
            nu_pre: vec![2],
            nu_post: vec![2],
            setup_maxiter: vec![100],
            setup_maxiter_refresh: vec![0],
            setup_tol: vec![5e-6],
            coarse_solver_nkrylov: 8,
            smoother_omega: 0.85,
            smoother_schwarz: SchwarzKind::Additive,
            precision: DevicePrecision::Half,
            setup_on_device: true,
            check_setup: false,
        }
    }

    fn loaded() -> (HostAccelerator, EvenOddPrecCloverOperator) {
        let gauge = GaugeField::random(geom(), 21, 0.5);
        let params = CloverParams {
            mass: 0.2,
            ..CloverParams::default()
        };
        let op = EvenOddPrecCloverOperator::new(&gauge, &params).expect("clover");
        let mut acc = HostAccelerator::new();
        acc.load_gauge(bytemuck::cast_slice(gauge.links()), &gauge_param()).expect("gauge");
        let packed = op.clover().pack();
        let packed_inv = op.inverse_clover().pack();
        acc.load_clover(
            bytemuck::cast_slice(&packed),
            bytemuck::cast_slice(&packed_inv),
            &InvertParam::default(),
        )
        .expect("clover");
        (acc, op)
    }

    #[test]
    fn clover_before_gauge_is_rejected() {
        let mut acc = HostAccelerator::new();
        let err = acc.load_clover(&[], &[], &InvertParam::default()).unwrap_err();
        assert!(matches!(err, AcceleratorError::GaugeNotLoaded));
    }

    #[test]
    fn wrong_gauge_length_is_layout_error() {
        let mut acc = HostAccelerator::new();
        let err = acc.load_gauge(&[0.0; 10], &gauge_param()).unwrap_err();
        assert!(matches!(err, AcceleratorError::Layout { got: 10, .. }));
    }

    #[test]
    fn gcr_with_smoother_converges() {
        let (mut acc, op) = loaded();
        let handle = acc.new_multigrid(&setup(), &InvertParam::default()).expect("subspace");
        let param = InvertParam {
            tol: 1e-9,
            preconditioner: Some(handle),
            ..InvertParam::default()
        };
        let b = SpinorField::random(geom(), 5);
        let mut x = SpinorField::zeros(geom());
        let stats = acc.invert(x.as_reals_mut(), b.as_reals(), &param).expect("invert");
        assert!(stats.true_residual < 1e-8, "residual {}", stats.true_residual);
        assert!(stats.iterations > 0);

        let mut r = SpinorField::zeros(geom());
        op.apply(&mut r, &x, Sign::Plus);
        r.axpy(Complex64::real(-1.0), &b, Subset::Odd);
        let rel = (r.norm_sq(Subset::Odd) / b.norm_sq(Subset::Odd)).sqrt();
        assert!((rel - stats.true_residual).abs() < 1e-10);
    }

    #[test]
    fn unpreconditioned_gcr_converges() {
        let (mut acc, _) = loaded();
        let param = InvertParam {
            tol: 1e-9,
            inv_type_precondition: PreconditionerKind::None,
            ..InvertParam::default()
        };
        let b = SpinorField::random(geom(), 6);
        let mut x = SpinorField::zeros(geom());
        let stats = acc.invert(x.as_reals_mut(), b.as_reals(), &param).expect("invert");
        assert!(stats.true_residual < 1e-8);
    }

    #[test]
    fn missing_preconditioner_is_reported() {
        let (mut acc, _) = loaded();
        let b = SpinorField::random(geom(), 7);
        let mut x = SpinorField::zeros(geom());
        let err = acc.invert(x.as_reals_mut(), b.as_reals(), &InvertParam::default()).unwrap_err();
        assert!(matches!(err, AcceleratorError::MissingPreconditioner));
    }

    #[test]
    fn destroy_twice_is_rejected() {
        let (mut acc, _) = loaded();
        let h = acc.new_multigrid(&setup(), &InvertParam::default()).expect("subspace");
        assert_eq!(acc.live_subspaces(), 1);
        acc.destroy_multigrid(h).expect("first destroy");
        assert!(matches!(acc.destroy_multigrid(h), Err(AcceleratorError::UnknownSubspace(_))));
        assert_eq!(acc.live_subspaces(), 0);
    }

    #[test]
    fn resident_history_replaces_last() {
        let (mut acc, _) = loaded();
        let h = acc.new_multigrid(&setup(), &InvertParam::default()).expect("subspace");
        let chrono = ChronoSettings {
            max_dim: 2,
            index: 3,
            make_resident: true,
            use_resident: true,
            replace_last: false,
        };
        let mut param = InvertParam {
            tol: 1e-8,
            preconditioner: Some(h),
            chrono,
            ..InvertParam::default()
        };
        for seed in 0..3 {
            let b = SpinorField::random(geom(), 40 + seed);
            let mut x = SpinorField::zeros(geom());
            acc.invert(x.as_reals_mut(), b.as_reals(), &param).expect("invert");
        }
        assert_eq!(acc.chrono_depth(3), 2, "history capped at max_dim");

        param.chrono.replace_last = true;
        let b = SpinorField::random(geom(), 50);
        let mut x = SpinorField::zeros(geom());
        acc.invert(x.as_reals_mut(), b.as_reals(), &param).expect("invert");
        assert_eq!(acc.chrono_depth(3), 2);
        assert_eq!(acc.chrono_depth(0), 0);
    }

    #[test]
    fn resident_guess_repeats_solution_cheaply() {
        let (mut acc, _) = loaded();
        let h = acc.new_multigrid(&setup(), &InvertParam::default()).expect("subspace");
        let param = InvertParam {
            tol: 1e-9,
            preconditioner: Some(h),
            chrono: ChronoSettings {
                max_dim: 4,
                index: 0,
                make_resident: true,
                use_resident: true,
                replace_last: false,
            },
            ..InvertParam::default()
        };
        let b = SpinorField::random(geom(), 60);
        let mut x = SpinorField::zeros(geom());
        let first = acc.invert(x.as_reals_mut(), b.as_reals(), &param).expect("first");
        let mut y = SpinorField::zeros(geom());
        let second = acc.invert(y.as_reals_mut(), b.as_reals(), &param).expect("second");
        assert!(second.iterations < first.iterations, "{} vs {}", second.iterations, first.iterations);
    }
}
