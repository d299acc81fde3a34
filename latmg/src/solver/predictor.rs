// SPDX-License-Identifier: AGPL-3.0-only

//! Initial-guess predictors for the two solve stages.
//!
//! The caller picks the variant through [`Predictor`]:
//!
//! | Variant | Guess source | History |
//! |---------|--------------|---------|
//! | `None` | zero | none |
//! | `TwoStep` | host-side [`TwoStepPredictor`] | kept by the predictor |
//! | `AcceleratorResident` | accelerator channel | kept on the accelerator |

use std::collections::VecDeque;

use crate::lattice::complex_f64::Complex64;
use crate::lattice::constants::LATTICE_DIVISION_GUARD;
use crate::lattice::spinor::SpinorField;
use crate::linop::{LinearOperator, Sign};
use crate::tolerances::MRE_DEPENDENCE_TOLERANCE;

/// Host-side chronological predictor for `M† Y = χ` followed by
/// `M†M ψ = χ`.
///
/// `predict_y` receives the unsquared operator and must use its `Minus`
/// orientation; `predict_x` receives `M†M`.
pub trait TwoStepPredictor {
    fn predict_y(&mut self, y: &mut SpinorField, op: &dyn LinearOperator, chi: &SpinorField);

    fn predict_x(&mut self, psi: &mut SpinorField, op: &dyn LinearOperator, chi: &SpinorField);

    /// Record a verified `Y`.
    fn new_y_vector(&mut self, y: &SpinorField);

    /// Record a verified `ψ`.
    fn new_x_vector(&mut self, psi: &SpinorField);

    /// Drop all history.
    fn reset(&mut self);
}

/// Always predicts zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroGuessPredictor;

impl TwoStepPredictor for ZeroGuessPredictor {
    fn predict_y(&mut self, y: &mut SpinorField, op: &dyn LinearOperator, _chi: &SpinorField) {
        y.zero(op.subset());
    }

    fn predict_x(&mut self, psi: &mut SpinorField, op: &dyn LinearOperator, _chi: &SpinorField) {
        psi.zero(op.subset());
    }

    fn new_y_vector(&mut self, _y: &SpinorField) {}

    fn new_x_vector(&mut self, _psi: &SpinorField) {}

    fn reset(&mut self) {}
}

/// Reuses the previous solution of each stage.
#[derive(Clone, Debug, Default)]
pub struct LastSolutionPredictor {
    y: Option<SpinorField>,
    x: Option<SpinorField>,
}

impl LastSolutionPredictor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn last_or_zero(out: &mut SpinorField, last: Option<&SpinorField>, op: &dyn LinearOperator) {
    match last {
        Some(v) => out.assign(v, op.subset()),
        None => out.zero(op.subset()),
    }
}

impl TwoStepPredictor for LastSolutionPredictor {
    fn predict_y(&mut self, y: &mut SpinorField, op: &dyn LinearOperator, _chi: &SpinorField) {
        last_or_zero(y, self.y.as_ref(), op);
    }

    fn predict_x(&mut self, psi: &mut SpinorField, op: &dyn LinearOperator, _chi: &SpinorField) {
        last_or_zero(psi, self.x.as_ref(), op);
    }

    fn new_y_vector(&mut self, y: &SpinorField) {
        self.y = Some(y.clone());
    }

    fn new_x_vector(&mut self, psi: &SpinorField) {
        self.x = Some(psi.clone());
    }

    fn reset(&mut self) {
        self.y = None;
        self.x = None;
    }
}

/// Minimal-residual extrapolation over the last `max_chrono` solutions
/// of each stage.
#[derive(Clone, Debug)]
pub struct MinimalResidualPredictor {
    max_chrono: usize,
    y: VecDeque<SpinorField>,
    x: VecDeque<SpinorField>,
}

impl MinimalResidualPredictor {
    #[must_use]
    pub fn new(max_chrono: usize) -> Self {
        Self {
            max_chrono,
            y: VecDeque::with_capacity(max_chrono),
            x: VecDeque::with_capacity(max_chrono),
        }
    }

    #[must_use]
    pub fn max_chrono(&self) -> usize {
        self.max_chrono
    }

    #[must_use]
    pub fn history_len(&self) -> (usize, usize) {
        (self.y.len(), self.x.len())
    }

    fn push(history: &mut VecDeque<SpinorField>, v: &SpinorField, max: usize) {
        if max == 0 {
            return;
        }
        if history.len() == max {
            history.pop_front();
        }
        history.push_back(v.clone());
    }
}

impl TwoStepPredictor for MinimalResidualPredictor {
    fn predict_y(&mut self, y: &mut SpinorField, op: &dyn LinearOperator, chi: &SpinorField) {
        let guess = minimal_residual_guess(op, self.y.make_contiguous(), chi, Sign::Minus);
        y.assign(&guess, op.subset());
    }

    fn predict_x(&mut self, psi: &mut SpinorField, op: &dyn LinearOperator, chi: &SpinorField) {
        let guess = minimal_residual_guess(op, self.x.make_contiguous(), chi, Sign::Plus);
        psi.assign(&guess, op.subset());
    }

    fn new_y_vector(&mut self, y: &SpinorField) {
        Self::push(&mut self.y, y, self.max_chrono);
    }

    fn new_x_vector(&mut self, psi: &SpinorField) {
        Self::push(&mut self.x, psi, self.max_chrono);
    }

    fn reset(&mut self) {
        self.y.clear();
        self.x.clear();
    }
}

/// Guess `x ∈ span(history)` minimising `‖χ − M(sign) x‖` on the
/// operator's subset.
///
/// The images `M v_i` are orthonormalised by modified Gram-Schmidt while
/// the same combinations of `v_i` are carried along; vectors whose image
/// is numerically dependent on earlier ones are skipped. An empty history
/// gives zero.
#[must_use]
pub fn minimal_residual_guess(
    op: &dyn LinearOperator,
    history: &[SpinorField],
    chi: &SpinorField,
    sign: Sign,
) -> SpinorField {
    let subset = op.subset();
    let geometry = op.geometry();
    let mut images: Vec<SpinorField> = Vec::with_capacity(history.len());
    let mut basis: Vec<SpinorField> = Vec::with_capacity(history.len());

    for v in history {
        let mut w = SpinorField::zeros(geometry);
        op.apply(&mut w, v, sign);
        let mut u = v.clone();
        let norm0 = w.norm_sq(subset).sqrt();
        if norm0 < LATTICE_DIVISION_GUARD {
            continue;
        }
        for (wk, uk) in images.iter().zip(&basis) {
            let c = wk.dot(&w, subset);
            w.axpy(-c, wk, subset);
            u.axpy(-c, uk, subset);
        }
        let norm = w.norm_sq(subset).sqrt();
        if norm < MRE_DEPENDENCE_TOLERANCE * norm0 {
            continue;
        }
        let inv = Complex64::real(1.0 / norm);
        w.scale(inv, subset);
        u.scale(inv, subset);
        images.push(w);
        basis.push(u);
    }

    let mut guess = SpinorField::zeros(geometry);
    for (w, u) in images.iter().zip(&basis) {
        guess.axpy(w.dot(chi, subset), u, subset);
    }
    guess
}

/// Accelerator-resident chronology: history depth and the channel of
/// each stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResidentChronoPredictor {
    pub max_chrono: usize,
    pub y_index: usize,
    pub x_index: usize,
}

impl ResidentChronoPredictor {
    #[must_use]
    pub const fn new(max_chrono: usize, y_index: usize, x_index: usize) -> Self {
        Self {
            max_chrono,
            y_index,
            x_index,
        }
    }

    #[must_use]
    pub const fn max_history(&self) -> usize {
        self.max_chrono
    }

    #[must_use]
    pub const fn channel_indices(&self) -> (usize, usize) {
        (self.y_index, self.x_index)
    }
}

/// Predictor selected by the caller for one solve.
pub enum Predictor<'a> {
    None,
    TwoStep(&'a mut dyn TwoStepPredictor),
    AcceleratorResident(&'a ResidentChronoPredictor),
}

impl std::fmt::Debug for Predictor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::TwoStep(_) => f.write_str("TwoStep"),
            Self::AcceleratorResident(r) => f.debug_tuple("AcceleratorResident").field(r).finish(),
        }
    }
}
