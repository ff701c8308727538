// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with persisted raster stores.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Variable '{name}' doesn't exist in the store '{}'", path.display())]
    MissingVariable { name: String, path: PathBuf },

    #[error("The store '{}' has already been closed", .0.display())]
    Closed(PathBuf),

    #[error("The store '{}' is read-only", .0.display())]
    ReadOnly(PathBuf),

    #[error("The store '{}' doesn't exist", .0.display())]
    NotFound(PathBuf),

    #[error("Cannot open an aggregate of zero stores")]
    NoMembers,

    #[error("Variable '{name}' was given {got} dimension names for data with {expected} dimensions")]
    DimensionCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Dimension '{dim}' has length {existing} in the store, but data with length {new} was supplied")]
    DimensionMismatch {
        dim: String,
        existing: usize,
        new: usize,
    },

    #[error("Variable '{name}' expected shape {expected:?}, but got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Tile ({tile}) is outside of the grid ({rows} rows x {cols} columns)")]
    TileOutOfBounds {
        tile: String,
        rows: usize,
        cols: usize,
    },

    #[error("Cannot create the new variable '{0}' through a tailored handle; only existing variables can be written through a tile")]
    WindowedCreate(String),

    #[error("'{}' is corrupt: {msg}", path.display())]
    Corrupt { path: PathBuf, msg: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
