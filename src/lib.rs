// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Estimation of surface solar irradiance from geostationary satellite
//! imagery.
//!
//! The static layers of a deployment (grid, elevation, monthly turbidity)
//! are projected once and persisted. Each batch of images is then read
//! through a [`loader::TemporalLoader`] and evaluated by a
//! [`model::ComputeStrategy`], on the CPU or on a GPU via
//! [`gpu::dispatch`].

pub mod cache;
mod cli;
pub mod constants;
pub mod gpu;
pub mod job;
pub mod loader;
pub mod model;
pub mod static_layers;
pub mod store;

#[cfg(test)]
mod tests;

use crossbeam_utils::atomic::AtomicCell;

// Re-exports.
pub use cli::{SolarModel, SolarModelError};

/// Should progress bars be drawn? Off unless the binary says otherwise.
pub(crate) static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
