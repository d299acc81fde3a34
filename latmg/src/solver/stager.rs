// SPDX-License-Identifier: AGPL-3.0-only

//! Field staging: gauge fixing, clover construction, anisotropy rescaling
//! and upload.
//!
//! The clover term is built from links that have not been rescaled by the
//! anisotropy coefficients; only afterwards are the links multiplied by
//! `cf[μ]`, so the accelerator can run an isotropic hopping term on them.

use crate::accel::{Accelerator, GaugeParam, InvertParam};
use crate::error::{AcceleratorError, CloverError};
use crate::lattice::clover::{CloverTerm, PackedCloverSite};
use crate::lattice::constants::N_DIM;
use crate::lattice::gauge::GaugeField;
use crate::lattice::gauge_fix::{apply_gauge_transform, temporal_gauge_transform};
use crate::lattice::spinor::SpinorField;
use crate::lattice::su3::Su3Matrix;
use crate::linop::CloverParams;

/// Host copies of everything uploaded to the accelerator.
#[derive(Clone, Debug)]
pub struct StagedFields {
    gauge: GaugeField,
    clover: Vec<PackedCloverSite>,
    inverse: Vec<PackedCloverSite>,
    gauge_fix: Option<Vec<Su3Matrix>>,
}

impl StagedFields {
    /// Stage fermion-state links (boundary phases already applied).
    ///
    /// With `axial_gauge` the links are first rotated into temporal gauge
    /// along the last direction and the transformation is kept for the
    /// solve vectors.
    ///
    /// # Errors
    ///
    /// [`CloverError`] when a clover block is not positive definite.
    pub fn stage(gauge: &GaugeField, params: &CloverParams, axial_gauge: bool) -> Result<Self, CloverError> {
        let (mut links, gauge_fix) = if axial_gauge {
            let g = temporal_gauge_transform(gauge, N_DIM - 1);
            (apply_gauge_transform(gauge, &g), Some(g))
        } else {
            (gauge.clone(), None)
        };

        let clover = CloverTerm::build(&links, &params.clover_coefficients());
        let inverse = clover.inverse()?;

        let cf = params.aniso.ferm_coeffs();
        for (mu, &c) in cf.iter().enumerate() {
            if (c - 1.0).abs() > f64::EPSILON {
                links.scale_direction(mu, c);
            }
        }
        log::debug!("staged links rescaled by {cf:?}, axial gauge {axial_gauge}");

        Ok(Self {
            gauge: links,
            clover: clover.pack(),
            inverse: inverse.pack(),
            gauge_fix,
        })
    }

    /// Staged (fixed, rescaled) links.
    #[must_use]
    pub fn gauge(&self) -> &GaugeField {
        &self.gauge
    }

    #[must_use]
    pub fn clover(&self) -> &[PackedCloverSite] {
        &self.clover
    }

    #[must_use]
    pub fn inverse(&self) -> &[PackedCloverSite] {
        &self.inverse
    }

    #[must_use]
    pub fn gauge_fix(&self) -> Option<&[Su3Matrix]> {
        self.gauge_fix.as_deref()
    }

    /// Load gauge and clover into the accelerator. A failed clover load
    /// releases the gauge again.
    ///
    /// # Errors
    ///
    /// Whatever the accelerator reports for either load.
    pub fn upload<A: Accelerator + ?Sized>(
        &self,
        acc: &mut A,
        gauge_param: &GaugeParam,
        invert_param: &InvertParam,
    ) -> Result<(), AcceleratorError> {
        acc.load_gauge(bytemuck::cast_slice(self.gauge.links()), gauge_param)?;
        let loaded = acc.load_clover(
            bytemuck::cast_slice(&self.clover),
            bytemuck::cast_slice(&self.inverse),
            invert_param,
        );
        if let Err(e) = loaded {
            if let Err(free) = acc.free_gauge() {
                log::warn!("releasing gauge after failed clover load: {free}");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Rotate a host vector into the staged gauge.
    #[must_use]
    pub fn to_device(&self, psi: &SpinorField) -> SpinorField {
        let mut out = psi.clone();
        if let Some(g) = &self.gauge_fix {
            out.gauge_rotate(g, false);
        }
        out
    }

    /// Rotate a staged-gauge vector back in place.
    pub fn from_device(&self, psi: &mut SpinorField) {
        if let Some(g) = &self.gauge_fix {
            psi.gauge_rotate(g, true);
        }
    }
}
