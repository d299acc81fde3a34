// SPDX-License-Identifier: AGPL-3.0-only

//! Multigrid subspace lifecycle.
//!
//! A subspace lives in the [`NamedObjectMap`] under the configured key and
//! survives the solver that created it. One key holds at most one live
//! subspace: [`SubspaceManager::rebuild`] destroys the old accelerator
//! state before creating the replacement.

use std::time::Instant;

use serde_json::json;

use super::registry::NamedObjectMap;
use crate::accel::{Accelerator, InvertParam, MultigridSetup, SubspaceHandle};
use crate::error::SolverError;

/// Registry payload: accelerator handle plus the setup record it was
/// built from.
#[derive(Clone, Debug, PartialEq)]
pub struct MgSubspace {
    handle: SubspaceHandle,
    setup: MultigridSetup,
}

impl MgSubspace {
    #[must_use]
    pub const fn handle(&self) -> SubspaceHandle {
        self.handle
    }

    #[must_use]
    pub const fn setup(&self) -> &MultigridSetup {
        &self.setup
    }

    fn zero_refresh(&mut self) {
        self.setup.setup_maxiter_refresh.iter_mut().for_each(|n| *n = 0);
    }
}

/// Creates, recovers, refreshes, rebuilds and destroys the subspace
/// stored under one key.
#[derive(Clone, Debug)]
pub struct SubspaceManager {
    id: String,
    setup: MultigridSetup,
    refresh_iterations: Vec<usize>,
    prefix: String,
}

impl SubspaceManager {
    /// `setup` is the template for new subspaces; `refresh_iterations`
    /// holds one setup-iteration count per coarsening step, applied by
    /// [`refresh`](Self::refresh). `prefix` starts every log line.
    #[must_use]
    pub fn new(id: &str, setup: MultigridSetup, refresh_iterations: Vec<usize>, prefix: &str) -> Self {
        Self {
            id: id.to_string(),
            setup,
            refresh_iterations,
            prefix: prefix.to_string(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn refresh_iterations(&self) -> &[usize] {
        &self.refresh_iterations
    }

    /// Handle of the subspace currently registered under the key.
    ///
    /// # Errors
    ///
    /// [`SolverError::Registry`] when nothing (or something else) is stored.
    pub fn handle(&self, registry: &NamedObjectMap) -> Result<SubspaceHandle, SolverError> {
        Ok(registry.get_data::<MgSubspace>(&self.id)?.handle)
    }

    /// Recover the registered subspace, or run the full setup when the key
    /// is absent.
    ///
    /// Recovery zeroes the refresh counts and only re-attaches the
    /// subspace to the currently loaded fields.
    ///
    /// # Errors
    ///
    /// Accelerator or registry failures.
    pub fn acquire_or_create<A: Accelerator + ?Sized>(
        &self,
        acc: &mut A,
        registry: &mut NamedObjectMap,
        invert: &InvertParam,
    ) -> Result<SubspaceHandle, SolverError> {
        if !registry.exists(&self.id) {
            log::info!("{}Creating Subspace", self.prefix);
            return self.create(acc, registry, invert);
        }

        log::info!("{}Recovering subspace...", self.prefix);
        let start = Instant::now();
        let subspace = registry.get_data_mut::<MgSubspace>(&self.id)?;
        subspace.zero_refresh();
        acc.update_multigrid(subspace.handle, &subspace.setup)?;
        log::info!(
            "{}subspace_update_time = {:.6} secs",
            self.prefix,
            start.elapsed().as_secs_f64()
        );
        Ok(subspace.handle)
    }

    /// Re-run the configured number of setup iterations on every level,
    /// then reset the counts to zero.
    ///
    /// # Errors
    ///
    /// Accelerator or registry failures.
    pub fn refresh<A: Accelerator + ?Sized>(
        &self,
        acc: &mut A,
        registry: &mut NamedObjectMap,
    ) -> Result<(), SolverError> {
        let start = Instant::now();
        let subspace = registry.get_data_mut::<MgSubspace>(&self.id)?;
        for (n, &configured) in subspace
            .setup
            .setup_maxiter_refresh
            .iter_mut()
            .zip(&self.refresh_iterations)
        {
            *n = configured;
        }
        let updated = acc.update_multigrid(subspace.handle, &subspace.setup);
        subspace.zero_refresh();
        updated?;
        log::info!(
            "{}subspace_refresh_time = {:.6} secs",
            self.prefix,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Destroy whatever is registered under the key and build a new
    /// subspace from scratch.
    ///
    /// # Errors
    ///
    /// Accelerator or registry failures.
    pub fn rebuild<A: Accelerator + ?Sized>(
        &self,
        acc: &mut A,
        registry: &mut NamedObjectMap,
        invert: &InvertParam,
    ) -> Result<SubspaceHandle, SolverError> {
        self.destroy(acc, registry)?;
        log::info!("{}Creating Subspace", self.prefix);
        self.create(acc, registry, invert)
    }

    /// Release the registered subspace on the accelerator, then remove its
    /// entry. Returns `false` when nothing was registered. The entry is kept
    /// when the accelerator refuses the release.
    ///
    /// # Errors
    ///
    /// Accelerator or registry failures.
    pub fn destroy<A: Accelerator + ?Sized>(
        &self,
        acc: &mut A,
        registry: &mut NamedObjectMap,
    ) -> Result<bool, SolverError> {
        if !registry.exists(&self.id) {
            return Ok(false);
        }
        let handle = registry.get_data::<MgSubspace>(&self.id)?.handle;
        acc.destroy_multigrid(handle)?;
        registry.erase::<MgSubspace>(&self.id)?;
        log::debug!("{}destroyed subspace {handle}", self.prefix);
        Ok(true)
    }

    fn create<A: Accelerator + ?Sized>(
        &self,
        acc: &mut A,
        registry: &mut NamedObjectMap,
        invert: &InvertParam,
    ) -> Result<SubspaceHandle, SolverError> {
        let start = Instant::now();
        let handle = acc.new_multigrid(&self.setup, invert)?;
        registry.insert(
            &self.id,
            MgSubspace {
                handle,
                setup: self.setup.clone(),
            },
        )?;
        registry.set_file_xml(&self.id, json!({ "FileXML": {} }))?;
        registry.set_record_xml(&self.id, json!({ "RecordXML": { "foo": 5 } }))?;
        log::info!(
            "{}subspace_create_time = {:.6} secs",
            self.prefix,
            start.elapsed().as_secs_f64()
        );
        Ok(handle)
    }
}
