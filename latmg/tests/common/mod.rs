// SPDX-License-Identifier: AGPL-3.0-only

//! Shared fixtures for the integration tests.
//!
//! [`ScriptedAccelerator`] wraps the host backend and lets a test decide,
//! call by call, whether a solve converges and how many iterations it
//! reports. Every call's parameters are recorded.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use latmg::accel::{Accelerator, GaugeParam, HostAccelerator, InvertParam, InvertStats, MultigridSetup, SubspaceHandle};
use latmg::error::{AcceleratorError, SolverError};
use latmg::lattice::complex_f64::Complex64;
use latmg::lattice::gauge::{GaugeField, Geometry, Subset};
use latmg::lattice::spinor::SpinorField;
use latmg::linop::{CloverParams, EvenOddPrecCloverOperator, LinearOperator, MdagMOperator, Sign};
use latmg::solver::{MdagMMultigridCloverSolver, MultigridParams, NamedObjectMap, SolverConfiguration};

/// Scripted result of one `invert` call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    /// Solve to full precision and report this many iterations.
    Converge(usize),
    /// Return a zero solution and report this many iterations.
    Stall(usize),
    /// Solve to full precision, then scale the solution by `1 + relative`,
    /// which leaves a relative residual of `relative` on this solve.
    Residual { iterations: usize, relative: f64 },
}

/// Host backend with scripted solve outcomes.
#[derive(Debug, Default)]
pub struct ScriptedAccelerator {
    inner: HostAccelerator,
    script: VecDeque<Outcome>,
    pub calls: Vec<InvertParam>,
    pub created: usize,
    pub updated: usize,
    pub destroyed: usize,
}

/// Outcome used once the script runs out.
const DEFAULT_OUTCOME: Outcome = Outcome::Converge(10);

impl ScriptedAccelerator {
    pub fn new(script: &[Outcome]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, outcome: Outcome) {
        self.script.push_back(outcome);
    }

    pub fn inner(&self) -> &HostAccelerator {
        &self.inner
    }
}

impl Accelerator for ScriptedAccelerator {
    fn load_gauge(&mut self, links: &[f64], param: &GaugeParam) -> Result<(), AcceleratorError> {
        self.inner.load_gauge(links, param)
    }

    fn free_gauge(&mut self) -> Result<(), AcceleratorError> {
        self.inner.free_gauge()
    }

    fn load_clover(&mut self, clover: &[f64], inverse: &[f64], param: &InvertParam) -> Result<(), AcceleratorError> {
        self.inner.load_clover(clover, inverse, param)
    }

    fn free_clover(&mut self) -> Result<(), AcceleratorError> {
        self.inner.free_clover()
    }

    fn invert(&mut self, solution: &mut [f64], source: &[f64], param: &InvertParam) -> Result<InvertStats, AcceleratorError> {
        self.calls.push(param.clone());
        let exact = InvertParam {
            tol: 1e-13,
            maxiter: 5000,
            ..param.clone()
        };
        match self.script.pop_front().unwrap_or(DEFAULT_OUTCOME) {
            Outcome::Converge(iterations) => {
                let stats = self.inner.invert(solution, source, &exact)?;
                Ok(InvertStats { iterations, ..stats })
            }
            Outcome::Residual { iterations, relative } => {
                self.inner.invert(solution, source, &exact)?;
                solution.iter_mut().for_each(|v| *v *= 1.0 + relative);
                Ok(InvertStats {
                    iterations,
                    true_residual: relative,
                })
            }
            Outcome::Stall(iterations) => {
                solution.iter_mut().for_each(|v| *v = 0.0);
                Ok(InvertStats {
                    iterations,
                    true_residual: 1.0,
                })
            }
        }
    }

    fn new_multigrid(&mut self, setup: &MultigridSetup, param: &InvertParam) -> Result<SubspaceHandle, AcceleratorError> {
        let handle = self.inner.new_multigrid(setup, param)?;
        self.created += 1;
        Ok(handle)
    }

    fn update_multigrid(&mut self, handle: SubspaceHandle, setup: &MultigridSetup) -> Result<(), AcceleratorError> {
        self.inner.update_multigrid(handle, setup)?;
        self.updated += 1;
        Ok(())
    }

    fn destroy_multigrid(&mut self, handle: SubspaceHandle) -> Result<(), AcceleratorError> {
        self.inner.destroy_multigrid(handle)?;
        self.destroyed += 1;
        Ok(())
    }

    fn live_subspaces(&self) -> usize {
        self.inner.live_subspaces()
    }
}

pub fn geometry() -> Geometry {
    Geometry::new([4, 4, 4, 4])
}

pub fn config() -> SolverConfiguration {
    SolverConfiguration {
        clover: CloverParams {
            mass: 0.25,
            ..CloverParams::default()
        },
        max_iter: 500,
        rsd_target: 1e-9,
        rsd_tolerance_factor: 10.0,
        threshold_count: Some(100),
        subspace_id: "light".to_string(),
        multigrid: Some(MultigridParams {
            blocking: vec![[2, 2, 2, 2]],
            ..MultigridParams::default()
        }),
        ..SolverConfiguration::default()
    }
}

/// Gauge field, host operator, accelerator and registry for one test.
pub struct Fixture<A> {
    pub gauge: GaugeField,
    pub op: Rc<EvenOddPrecCloverOperator>,
    pub acc: Rc<RefCell<A>>,
    pub registry: Rc<RefCell<NamedObjectMap>>,
    pub config: SolverConfiguration,
}

impl<A: Accelerator> Fixture<A> {
    pub fn new(acc: A, config: SolverConfiguration) -> Self {
        Self::with_gauge(acc, config, GaugeField::random(geometry(), 77, 0.5))
    }

    /// `gauge` holds the fermion-state links, boundary phases included.
    pub fn with_gauge(acc: A, config: SolverConfiguration, gauge: GaugeField) -> Self {
        let op = Rc::new(EvenOddPrecCloverOperator::new(&gauge, &config.clover).expect("clover"));
        Self {
            gauge,
            op,
            acc: Rc::new(RefCell::new(acc)),
            registry: Rc::new(RefCell::new(NamedObjectMap::new())),
            config,
        }
    }

    pub fn try_solver(&self) -> Result<MdagMMultigridCloverSolver<A>, SolverError> {
        let op: Rc<dyn LinearOperator> = self.op.clone();
        MdagMMultigridCloverSolver::new(
            op,
            &self.gauge,
            self.config.clone(),
            self.acc.clone(),
            self.registry.clone(),
        )
    }

    pub fn solver(&self) -> MdagMMultigridCloverSolver<A> {
        self.try_solver().expect("solver")
    }

    pub fn source(&self, seed: u64) -> SpinorField {
        SpinorField::random(self.gauge.geometry(), seed)
    }

    /// `‖χ − M†M ψ‖ / ‖χ‖` on the odd checkerboard.
    pub fn relative_residual(&self, psi: &SpinorField, chi: &SpinorField) -> f64 {
        let mut r = SpinorField::zeros(chi.geometry());
        MdagMOperator::new(self.op.as_ref()).apply(&mut r, psi, Sign::Plus);
        r.xpby(chi, Complex64::real(-1.0), Subset::Odd);
        (r.norm_sq(Subset::Odd) / chi.norm_sq(Subset::Odd)).sqrt()
    }
}
