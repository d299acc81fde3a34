// SPDX-License-Identifier: AGPL-3.0-only

//! Temporal axial gauge.
//!
//! ```text
//! g(x, t = 0) = 1,   g(x + t̂) = g(x) U_t(x)
//! U'_μ(x) = g(x) U_μ(x) g†(x + μ)
//! ```
//!
//! After the transform every temporal link is the identity except those
//! leaving the last time slice, which carry the Polyakov line. Quark fields
//! rotate as `ψ'(x) = g(x) ψ(x)`.

use super::constants::N_DIM;
use super::gauge::GaugeField;
use super::su3::Su3Matrix;

/// Gauge transformation `g(x)` for the temporal axial gauge along `t_dir`.
#[must_use]
pub fn temporal_gauge_transform(gauge: &GaugeField, t_dir: usize) -> Vec<Su3Matrix> {
    let geom = gauge.geometry();
    let nt = geom.dims()[t_dir];
    let mut g = vec![Su3Matrix::IDENTITY; geom.volume()];
    for t in 1..nt {
        for idx in 0..geom.volume() {
            let x = geom.site_coords(idx);
            if x[t_dir] != t {
                continue;
            }
            let prev = geom.neighbor_index(idx, t_dir, false);
            g[idx] = g[prev] * gauge.link(prev, t_dir);
        }
    }
    g
}

/// `U'_μ(x) = g(x) U_μ(x) g†(x + μ)` on every link.
#[must_use]
pub fn apply_gauge_transform(gauge: &GaugeField, g: &[Su3Matrix]) -> GaugeField {
    let geom = gauge.geometry();
    let mut out = gauge.clone();
    for idx in 0..geom.volume() {
        for mu in 0..N_DIM {
            let fwd = geom.neighbor_index(idx, mu, true);
            out.set_link(idx, mu, g[idx] * gauge.link(idx, mu) * g[fwd].adjoint());
        }
    }
    out
}
