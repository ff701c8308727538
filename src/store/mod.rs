// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persistent containers of named rasters.
//!
//! Everything above this module talks to storage through [`VariableStore`];
//! [`DirStore`] is the on-disk implementation used by the binary.

mod dir;
mod error;
#[cfg(test)]
mod tests;

pub use dir::DirStore;
pub use error::StoreError;

use std::ops::Range;

use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};

use crate::constants::{DIM_X, DIM_Y};

/// A rectangular sub-window of the working grid. Ranges are half-open and
/// index the `yc` (rows) and `xc` (columns) dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub y: Range<usize>,
    pub x: Range<usize>,
}

impl Tile {
    pub fn new(y: Range<usize>, x: Range<usize>) -> Tile {
        Tile { y, x }
    }

    pub fn rows(&self) -> usize {
        self.y.len()
    }

    pub fn cols(&self) -> usize {
        self.x.len()
    }

    /// The range of this tile along the named dimension, if the tile narrows
    /// that dimension at all.
    pub(crate) fn range_for(&self, dim: &str) -> Option<Range<usize>> {
        match dim {
            DIM_Y => Some(self.y.clone()),
            DIM_X => Some(self.x.clone()),
            _ => None,
        }
    }

    /// Express `inner` (relative to this tile) in the coordinates of the grid
    /// this tile was cut from.
    pub(crate) fn compose(&self, inner: &Tile) -> Tile {
        Tile {
            y: self.y.start + inner.y.start..self.y.start + inner.y.end,
            x: self.x.start + inner.x.start..self.x.start + inner.x.end,
        }
    }
}

impl std::fmt::Display for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "yc {}..{}, xc {}..{}",
            self.y.start, self.y.end, self.x.start, self.x.end
        )
    }
}

/// A lazy handle on a persisted variable. Nothing has been read yet; `shape`
/// is what [`VariableStore::read`] will return for this handle (i.e. already
/// narrowed to any tile).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
}

/// A container of named, dimensioned `f32` rasters.
pub trait VariableStore {
    /// Resolve a lazy handle on a variable.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingVariable`] if there's no such variable, and
    /// [`StoreError::Closed`] if the store was closed.
    fn variable(&self, name: &str) -> Result<VariableRef, StoreError>;

    /// Materialize the data behind a handle.
    fn read(&self, var: &VariableRef) -> Result<ArrayD<f32>, StoreError>;

    /// Create or overwrite a variable. The write is only durable after
    /// [`VariableStore::sync`].
    fn write(&mut self, name: &str, dims: &[&str], data: ArrayViewD<f32>)
        -> Result<(), StoreError>;

    /// Persist all pending writes.
    fn sync(&mut self) -> Result<(), StoreError>;

    /// Release the store. Every later call fails with [`StoreError::Closed`].
    fn close(&mut self) -> Result<(), StoreError>;

    /// The names of all variables in the store.
    fn variable_names(&self) -> Result<Vec<String>, StoreError>;

    /// Convenience: resolve and read a variable in one go.
    fn read_variable(&self, name: &str) -> Result<ArrayD<f32>, StoreError> {
        let var = self.variable(name)?;
        self.read(&var)
    }
}
