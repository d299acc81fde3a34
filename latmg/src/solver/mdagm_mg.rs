// SPDX-License-Identifier: AGPL-3.0-only

//! Multigrid clover `M†M` solver.
//!
//! `M†M ψ = χ` is solved as two accelerator solves with the unsquared,
//! `γ5`-Hermitian operator:
//!
//! ```text
//! Y stage:  M Y' = γ5 χ,  Y = γ5 Y'     (so M† Y = χ)
//! X stage:  M ψ  = Y
//! ```
//!
//! Each stage is checked on the host: `‖χ − M† Y‖ / ‖χ‖` for `Y` and
//! `‖χ − M†M ψ‖ / ‖χ‖` for `ψ`, against `rsd_tolerance_factor · rsd_target`.
//! A stage that passes after at least `threshold_count` iterations
//! refreshes the multigrid subspace. A stage that fails rebuilds the
//! subspace and is solved once more from a zero guess; a second failure is
//! [`SolverError::ResolveFailed`].
//!
//! The base [`InvertParam`] is never modified by a solve: every call works
//! on a clone with its guess and chronology flags set, so nothing leaks
//! into the next solve.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use super::params::SolverConfiguration;
use super::predictor::{Predictor, ResidentChronoPredictor, TwoStepPredictor};
use super::registry::NamedObjectMap;
use super::stager::StagedFields;
use super::subspace::SubspaceManager;
use super::translate::translate;
use super::{SolveResult, Stage};
use crate::accel::{Accelerator, ChronoSettings, InvertParam, SubspaceHandle};
use crate::error::SolverError;
use crate::lattice::complex_f64::Complex64;
use crate::lattice::gauge::{GaugeField, Subset};
use crate::lattice::spinor::SpinorField;
use crate::linop::{LinearOperator, MdagMOperator, Sign};

/// Log prefix identifying one solver instance.
#[must_use]
pub fn solver_string(mass: f64, id: &str) -> String {
    format!("QUDA_MULTIGRID_CLOVER_MDAGM_SOLVER( Mass = {mass} , Id = {id} ): ")
}

/// Residual of a stage: absolute norm and norm relative to `‖χ‖`.
#[derive(Clone, Copy, Debug)]
struct Check {
    residual: f64,
    relative: f64,
}

/// A finished stage; `converged` is false only when a failed re-solve was
/// let through by `silent_fail`.
#[derive(Clone, Copy, Debug)]
struct StageOutcome {
    result: SolveResult,
    converged: bool,
}

/// `M†M` solver for the even-odd preconditioned clover operator with a
/// multigrid-preconditioned accelerator.
///
/// Gauge and clover are staged at construction and released on drop. The
/// subspace stays registered under `subspace_id` so a later solver on the
/// same key recovers it instead of running the setup again.
pub struct MdagMMultigridCloverSolver<A: Accelerator> {
    accelerator: Rc<RefCell<A>>,
    registry: Rc<RefCell<NamedObjectMap>>,
    op: Rc<dyn LinearOperator>,
    config: SolverConfiguration,
    invert: InvertParam,
    subspaces: SubspaceManager,
    staged: StagedFields,
    solver_string: String,
}

impl<A: Accelerator> MdagMMultigridCloverSolver<A> {
    /// Stage `gauge` (fermion-state links) and attach a multigrid subspace.
    ///
    /// `op` is the host operator `M` on the same links, used to verify
    /// both stages.
    ///
    /// # Errors
    ///
    /// [`SolverError::MissingMultigridParams`] and
    /// [`SolverError::InvalidConfig`] before anything is staged; clover,
    /// accelerator or registry failures afterwards. A failure after the
    /// upload releases the loaded fields again.
    pub fn new(
        op: Rc<dyn LinearOperator>,
        gauge: &GaugeField,
        config: SolverConfiguration,
        accelerator: Rc<RefCell<A>>,
        registry: Rc<RefCell<NamedObjectMap>>,
    ) -> Result<Self, SolverError> {
        let start = Instant::now();
        config.validate()?;
        let prefix = solver_string(config.clover.mass, &config.subspace_id);
        log::info!("{prefix}Initializing");

        let t = translate(&config, gauge.geometry().dims())?;
        log::debug!(
            "{prefix}ga_pad = {}, anisotropy = {}, cuda_prec = {:?}, sloppy = {:?}",
            t.gauge.ga_pad,
            t.gauge.anisotropy,
            t.invert.cuda_prec,
            t.invert.cuda_prec_sloppy
        );

        log::info!("{prefix}Creating CloverTerm");
        let staged = StagedFields::stage(gauge, &config.clover, config.axial_gauge)?;
        staged.upload(&mut *accelerator.borrow_mut(), &t.gauge, &t.invert)?;

        let mg = config.multigrid()?;
        let refresh = mg.max_iter_subspace_refresh[..mg.mg_levels - 1].to_vec();
        let subspaces = SubspaceManager::new(&config.subspace_id, t.multigrid, refresh, &prefix);
        let attached = subspaces.acquire_or_create(&mut *accelerator.borrow_mut(), &mut registry.borrow_mut(), &t.invert);
        let handle = match attached {
            Ok(h) => h,
            Err(e) => {
                release_fields(&mut *accelerator.borrow_mut(), &prefix);
                return Err(e);
            }
        };

        let mut invert = t.invert;
        invert.preconditioner = Some(handle);
        log::info!("{prefix}init_time = {:.6} secs", start.elapsed().as_secs_f64());

        Ok(Self {
            accelerator,
            registry,
            op,
            config,
            invert,
            subspaces,
            staged,
            solver_string: prefix,
        })
    }

    #[must_use]
    pub fn solver_string(&self) -> &str {
        &self.solver_string
    }

    #[must_use]
    pub fn config(&self) -> &SolverConfiguration {
        &self.config
    }

    /// Invert configuration every solve starts from.
    #[must_use]
    pub fn invert_param(&self) -> &InvertParam {
        &self.invert
    }

    #[must_use]
    pub fn staged(&self) -> &StagedFields {
        &self.staged
    }

    /// Handle of the subspace currently registered for this solver.
    ///
    /// # Errors
    ///
    /// [`SolverError::Registry`] when the entry was removed externally.
    pub fn subspace_handle(&self) -> Result<SubspaceHandle, SolverError> {
        self.subspaces.handle(&self.registry.borrow())
    }

    /// Solve `M†M ψ = χ` from zero guesses.
    ///
    /// # Errors
    ///
    /// [`SolverError::ResolveFailed`] when a stage fails twice, or an
    /// accelerator/registry failure.
    pub fn solve(&self, psi: &mut SpinorField, chi: &SpinorField) -> Result<SolveResult, SolverError> {
        self.solve_with(psi, chi, Predictor::None)
    }

    /// Solve with the predictor chosen by the caller.
    ///
    /// # Errors
    ///
    /// As [`solve`](Self::solve).
    pub fn solve_with(
        &self,
        psi: &mut SpinorField,
        chi: &SpinorField,
        predictor: Predictor<'_>,
    ) -> Result<SolveResult, SolverError> {
        let start = Instant::now();
        let (y, x) = match predictor {
            Predictor::None => self.solve_no_predictor(psi, chi)?,
            Predictor::TwoStep(p) => self.solve_two_step(psi, chi, p)?,
            Predictor::AcceleratorResident(r) => self.solve_resident(psi, chi, r)?,
        };
        Ok(self.summarize(y, x, chi, start))
    }

    /// Host-side chronology: predicted guesses, verified vectors recorded.
    fn solve_two_step(
        &self,
        psi: &mut SpinorField,
        chi: &SpinorField,
        predictor: &mut dyn TwoStepPredictor,
    ) -> Result<(SolveResult, SolveResult), SolverError> {
        let param = InvertParam {
            use_init_guess: true,
            ..self.invert.clone()
        };
        let retry = self.zero_guess(&self.invert);

        let mut tmp = psi.clone();
        predictor.predict_y(&mut tmp, self.op.as_ref(), chi);
        let mut y_prime = tmp.gamma5();
        let res_y = self.run_stage(Stage::Y, &mut y_prime, &chi.gamma5(), chi, &param, &retry)?;
        let y = y_prime.gamma5();
        if res_y.converged {
            predictor.new_y_vector(&y);
        }

        let mdagm = MdagMOperator::new(self.op.as_ref());
        predictor.predict_x(psi, &mdagm, chi);
        let res_x = self.run_stage(Stage::X, psi, &y, chi, &param, &retry)?;
        if res_x.converged {
            predictor.new_x_vector(psi);
        }
        Ok((res_y.result, res_x.result))
    }

    /// Accelerator-resident chronology on the predictor's two channels.
    fn solve_resident(
        &self,
        psi: &mut SpinorField,
        chi: &SpinorField,
        predictor: &ResidentChronoPredictor,
    ) -> Result<(SolveResult, SolveResult), SolverError> {
        let (y_index, x_index) = predictor.channel_indices();
        let resident = |index| InvertParam {
            use_init_guess: false,
            chrono: ChronoSettings {
                max_dim: predictor.max_history(),
                index,
                make_resident: true,
                use_resident: true,
                replace_last: false,
            },
            ..self.invert.clone()
        };
        let replace = |param: &InvertParam| InvertParam {
            chrono: ChronoSettings {
                use_resident: false,
                replace_last: true,
                ..param.chrono
            },
            ..self.zero_guess(param)
        };

        let y_param = resident(y_index);
        let mut y_prime = SpinorField::zeros(chi.geometry());
        let res_y = self.run_stage(Stage::Y, &mut y_prime, &chi.gamma5(), chi, &y_param, &replace(&y_param))?;
        let y = y_prime.gamma5();

        let x_param = resident(x_index);
        psi.zero(Subset::All);
        let res_x = self.run_stage(Stage::X, psi, &y, chi, &x_param, &replace(&x_param))?;
        Ok((res_y.result, res_x.result))
    }

    fn solve_no_predictor(
        &self,
        psi: &mut SpinorField,
        chi: &SpinorField,
    ) -> Result<(SolveResult, SolveResult), SolverError> {
        let param = self.zero_guess(&self.invert);
        let mut y_prime = SpinorField::zeros(chi.geometry());
        let res_y = self.run_stage(Stage::Y, &mut y_prime, &chi.gamma5(), chi, &param, &param)?;
        let y = y_prime.gamma5();

        psi.zero(Subset::All);
        let res_x = self.run_stage(Stage::X, psi, &y, chi, &param, &param)?;
        Ok((res_y.result, res_x.result))
    }

    fn zero_guess(&self, param: &InvertParam) -> InvertParam {
        InvertParam {
            use_init_guess: false,
            ..param.clone()
        }
    }

    /// Solve, check and, if needed, refresh or rebuild-and-retry one stage.
    ///
    /// For `Stage::Y`, `x` holds `Y' = γ5 Y`.
    fn run_stage(
        &self,
        stage: Stage,
        x: &mut SpinorField,
        b: &SpinorField,
        chi: &SpinorField,
        param: &InvertParam,
        retry: &InvertParam,
    ) -> Result<StageOutcome, SolverError> {
        let prefix = &self.solver_string;
        let tolerance = self.config.max_tolerated();
        let threshold = self.config.threshold();

        let mut iterations = self.invert(x, b, param)?;
        let mut check = self.check(stage, x, chi);

        if check.relative > tolerance {
            log::warn!(
                "{prefix}{stage} solve failed: rsd = {:.6e} > {tolerance:.3e} after {iterations} iterations; rebuilding subspace",
                check.relative
            );
            self.subspaces.rebuild(
                &mut *self.accelerator.borrow_mut(),
                &mut self.registry.borrow_mut(),
                &self.invert,
            )?;
            x.zero(Subset::All);
            iterations += self.invert(x, b, retry)?;
            check = self.check(stage, x, chi);
            if check.relative > tolerance {
                let err = SolverError::ResolveFailed {
                    stage,
                    residual: check.relative,
                    target: self.config.rsd_target,
                    tolerance,
                };
                if !self.config.silent_fail {
                    log::error!("{prefix}{err}");
                    return Err(err);
                }
                log::error!("{prefix}{err}; continuing");
            }
        } else if iterations >= threshold {
            log::warn!("{prefix}{stage} solve took {iterations} iterations (threshold {threshold}); refreshing subspace");
            self.subspaces
                .refresh(&mut *self.accelerator.borrow_mut(), &mut self.registry.borrow_mut())?;
        }

        Ok(StageOutcome {
            result: SolveResult {
                iterations,
                residual: check.residual,
            },
            converged: check.relative <= tolerance,
        })
    }

    /// One accelerator solve of `M x = b` on the staged fields.
    fn invert(&self, x: &mut SpinorField, b: &SpinorField, param: &InvertParam) -> Result<usize, SolverError> {
        let param = InvertParam {
            preconditioner: Some(self.subspace_handle()?),
            ..param.clone()
        };
        let source = self.staged.to_device(b);
        let mut solution = self.staged.to_device(x);
        let stats = self
            .accelerator
            .borrow_mut()
            .invert(solution.as_reals_mut(), source.as_reals(), &param)?;
        self.staged.from_device(&mut solution);
        x.assign(&solution, self.op.subset());
        Ok(stats.iterations)
    }

    fn check(&self, stage: Stage, x: &SpinorField, chi: &SpinorField) -> Check {
        let subset = self.op.subset();
        let mut r = SpinorField::zeros(chi.geometry());
        match stage {
            Stage::Y => self.op.apply(&mut r, &x.gamma5(), Sign::Minus),
            Stage::X => MdagMOperator::new(self.op.as_ref()).apply(&mut r, x, Sign::Plus),
        }
        r.xpby(chi, Complex64::real(-1.0), subset);
        let residual = r.norm_sq(subset).sqrt();
        let chi_norm = chi.norm_sq(subset).sqrt();
        let relative = if chi_norm > 0.0 { residual / chi_norm } else { residual };
        Check { residual, relative }
    }

    fn summarize(&self, y: SolveResult, x: SolveResult, chi: &SpinorField, start: Instant) -> SolveResult {
        let chi_norm = chi.norm_sq(self.op.subset()).sqrt();
        let relative = if chi_norm > 0.0 { x.residual / chi_norm } else { x.residual };
        let mut total = y;
        total += x;
        log::info!(
            "{}iterations: {} + {} = {} Rsd = {:.6e} Relative Rsd = {:.6e}",
            self.solver_string,
            y.iterations,
            x.iterations,
            total.iterations,
            total.residual,
            relative
        );
        log::info!("{}total_time = {:.6} secs", self.solver_string, start.elapsed().as_secs_f64());
        total
    }
}

fn release_fields<A: Accelerator + ?Sized>(acc: &mut A, prefix: &str) {
    if let Err(e) = acc.free_clover() {
        log::warn!("{prefix}freeing clover: {e}");
    }
    if let Err(e) = acc.free_gauge() {
        log::warn!("{prefix}freeing gauge: {e}");
    }
}

impl<A: Accelerator> Drop for MdagMMultigridCloverSolver<A> {
    fn drop(&mut self) {
        match self.accelerator.try_borrow_mut() {
            Ok(mut acc) => release_fields(&mut *acc, &self.solver_string),
            Err(_) => log::warn!("{}accelerator busy at drop; fields not released", self.solver_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::HostAccelerator;
    use crate::lattice::gauge::Geometry;
    use crate::linop::{CloverParams, EvenOddPrecCloverOperator};
    use crate::solver::params::MultigridParams;
    use crate::solver::predictor::MinimalResidualPredictor;

    struct Fixture {
        acc: Rc<RefCell<HostAccelerator>>,
        registry: Rc<RefCell<NamedObjectMap>>,
        op: Rc<EvenOddPrecCloverOperator>,
        gauge: GaugeField,
        config: SolverConfiguration,
    }

    fn fixture(axial_gauge: bool) -> Fixture {
        let gauge = GaugeField::random(Geometry::new([4, 4, 4, 4]), 91, 0.5);
        let config = SolverConfiguration {
            clover: CloverParams {
                mass: 0.25,
                ..CloverParams::default()
            },
            rsd_target: 1e-9,
            rsd_tolerance_factor: 100.0,
            max_iter: 500,
            axial_gauge,
            subspace_id: "light".to_string(),
            multigrid: Some(MultigridParams {
                blocking: vec![[2, 2, 2, 2]],
                ..MultigridParams::default()
            }),
            ..SolverConfiguration::default()
        };
        let op = Rc::new(EvenOddPrecCloverOperator::new(&gauge, &config.clover).expect("clover"));
        Fixture {
            acc: Rc::new(RefCell::new(HostAccelerator::new())),
            registry: Rc::new(RefCell::new(NamedObjectMap::new())),
            op,
            gauge,
            config,
        }
    }

    fn solver(f: &Fixture) -> MdagMMultigridCloverSolver<HostAccelerator> {
        MdagMMultigridCloverSolver::new(
            f.op.clone(),
            &f.gauge,
            f.config.clone(),
            f.acc.clone(),
            f.registry.clone(),
        )
        .expect("solver")
    }

    fn mdagm_relative_residual(op: &dyn LinearOperator, psi: &SpinorField, chi: &SpinorField) -> f64 {
        let mut r = SpinorField::zeros(chi.geometry());
        MdagMOperator::new(op).apply(&mut r, psi, Sign::Plus);
        r.xpby(chi, Complex64::real(-1.0), Subset::Odd);
        (r.norm_sq(Subset::Odd) / chi.norm_sq(Subset::Odd)).sqrt()
    }

    #[test]
    fn solver_string_format() {
        assert_eq!(
            solver_string(0.1, "mg"),
            "QUDA_MULTIGRID_CLOVER_MDAGM_SOLVER( Mass = 0.1 , Id = mg ): "
        );
    }

    #[test]
    fn solves_mdagm_system() {
        let f = fixture(false);
        let s = solver(&f);
        let chi = SpinorField::random(f.gauge.geometry(), 1);
        let mut psi = SpinorField::zeros(f.gauge.geometry());
        let res = s.solve(&mut psi, &chi).expect("solve");
        assert!(res.iterations > 0);
        let rel = mdagm_relative_residual(f.op.as_ref(), &psi, &chi);
        assert!(rel < f.config.max_tolerated(), "relative residual {rel}");
        let abs = rel * chi.norm_sq(Subset::Odd).sqrt();
        assert!((res.residual - abs).abs() < 1e-10 * chi.norm_sq(Subset::Odd).sqrt());
    }

    #[test]
    fn axial_gauge_solve_matches() {
        let f = fixture(true);
        let s = solver(&f);
        assert!(s.staged().gauge_fix().is_some());
        let chi = SpinorField::random(f.gauge.geometry(), 2);
        let mut psi = SpinorField::zeros(f.gauge.geometry());
        s.solve(&mut psi, &chi).expect("solve");
        assert!(mdagm_relative_residual(f.op.as_ref(), &psi, &chi) < f.config.max_tolerated());
    }

    #[test]
    fn second_solver_recovers_subspace() {
        let f = fixture(false);
        let h1 = solver(&f).subspace_handle().expect("handle");
        let s2 = solver(&f);
        assert_eq!(s2.subspace_handle().expect("handle"), h1);
        assert_eq!(f.acc.borrow().subspace_updates(h1), Some(1));
        assert_eq!(f.acc.borrow().live_subspaces(), 1);
    }

    #[test]
    fn drop_releases_fields_but_keeps_subspace() {
        let f = fixture(false);
        drop(solver(&f));
        assert!(f.acc.borrow().gauge_param().is_none());
        assert_eq!(f.acc.borrow().live_subspaces(), 1);
        assert!(f.registry.borrow().exists("light"));
    }

    #[test]
    fn predictors_reach_same_solution() {
        let f = fixture(false);
        let s = solver(&f);
        let chi = SpinorField::random(f.gauge.geometry(), 3);

        let mut mre = MinimalResidualPredictor::new(3);
        let mut psi = SpinorField::zeros(f.gauge.geometry());
        let first = s.solve_with(&mut psi, &chi, Predictor::TwoStep(&mut mre)).expect("first");
        let mut psi2 = SpinorField::zeros(f.gauge.geometry());
        let second = s.solve_with(&mut psi2, &chi, Predictor::TwoStep(&mut mre)).expect("second");
        assert!(second.iterations < first.iterations);
        assert!(mdagm_relative_residual(f.op.as_ref(), &psi2, &chi) < f.config.max_tolerated());

        let resident = ResidentChronoPredictor::new(2, 0, 1);
        let mut psi3 = SpinorField::zeros(f.gauge.geometry());
        s.solve_with(&mut psi3, &chi, Predictor::AcceleratorResident(&resident))
            .expect("resident");
        assert!(mdagm_relative_residual(f.op.as_ref(), &psi3, &chi) < f.config.max_tolerated());
        assert_eq!(f.acc.borrow().chrono_depth(0), 1);
        assert_eq!(f.acc.borrow().chrono_depth(1), 1);
        assert!(s.invert_param().chrono.is_off());
        assert!(!s.invert_param().use_init_guess);
    }
}
