// SPDX-License-Identifier: AGPL-3.0-only

//! Linear operators on fermion fields.
//!
//! An operator applies `M` or `M†` (selected by [`Sign`]) on the subset of
//! sites it acts on. Solvers only ever see this interface.

pub mod clover;
pub mod nef;

pub use crate::lattice::dslash::Sign;

use crate::lattice::gauge::{Geometry, Subset};
use crate::lattice::spinor::SpinorField;

pub use clover::{AnisoParams, CloverParams, EvenOddPrecCloverOperator};
pub use nef::{EvenOddPrecNefOperator, NefCoefficients};

/// 4D linear operator `chi = M(sign) psi` on `subset()`.
pub trait LinearOperator {
    /// Write `M ψ` (`Plus`) or `M† ψ` (`Minus`) on `subset()` sites of `chi`.
    fn apply(&self, chi: &mut SpinorField, psi: &SpinorField, sign: Sign);

    fn subset(&self) -> Subset;

    fn geometry(&self) -> Geometry;
}

/// 5D operator acting on `size()` fifth-dimension slices.
pub trait LinearOperatorArray {
    fn size(&self) -> usize;

    fn apply(&self, chi: &mut [SpinorField], psi: &[SpinorField], sign: Sign);

    fn subset(&self) -> Subset;
}

/// `M† M` built from any [`LinearOperator`]; Hermitian, so `sign` is ignored.
pub struct MdagMOperator<'a> {
    inner: &'a dyn LinearOperator,
}

impl<'a> MdagMOperator<'a> {
    #[must_use]
    pub fn new(inner: &'a dyn LinearOperator) -> Self {
        Self { inner }
    }
}

impl LinearOperator for MdagMOperator<'_> {
    fn apply(&self, chi: &mut SpinorField, psi: &SpinorField, _sign: Sign) {
        let mut tmp = SpinorField::zeros(self.inner.geometry());
        self.inner.apply(&mut tmp, psi, Sign::Plus);
        self.inner.apply(chi, &tmp, Sign::Minus);
    }

    fn subset(&self) -> Subset {
        self.inner.subset()
    }

    fn geometry(&self) -> Geometry {
        self.inner.geometry()
    }
}
