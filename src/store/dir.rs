// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A [`VariableStore`] kept in a directory: `store.json` describes the
//! dimensions and variables, and each variable's data lives in
//! `<name>.f32` as little-endian floats.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;
use log::{debug, trace, warn};
use ndarray::{prelude::*, Slice};
use serde::{Deserialize, Serialize};

use super::{StoreError, Tile, VariableRef, VariableStore};
use crate::constants::{DIM_TIME, DIM_X, DIM_Y};

const META_FILENAME: &str = "store.json";
const DATA_EXTENSION: &str = "f32";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreMeta {
    /// The length of every dimension used by a variable of this store.
    dims: IndexMap<String, usize>,
    variables: IndexMap<String, VariableMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VariableMeta {
    dims: Vec<String>,
}

impl StoreMeta {
    fn read(dir: &Path) -> Result<StoreMeta, StoreError> {
        let f = BufReader::new(File::open(dir.join(META_FILENAME))?);
        Ok(serde_json::from_reader(f)?)
    }

    fn shape_of(&self, dims: &[String]) -> Vec<usize> {
        dims.iter()
            .map(|d| self.dims.get(d).copied().unwrap_or(0))
            .collect()
    }
}

/// A directory-backed raster store. See the module documentation for the
/// layout on disk.
///
/// A store that doesn't exist yet is created by its first [`DirStore::sync`];
/// until then nothing is written, and the first sync goes through a
/// `.partial` sibling directory that is renamed into place. Readers therefore
/// never observe a half-written new store.
#[derive(Debug)]
pub struct DirStore {
    /// The stores backing this handle. There is more than one when several
    /// per-timestep stores were aggregated along `time`.
    members: Vec<PathBuf>,
    metas: Vec<StoreMeta>,

    /// Writes that haven't been synced yet. These are always full-extent
    /// arrays, even on a tailored handle.
    pending: IndexMap<String, ArrayD<f32>>,

    window: Option<Tile>,
    read_only: bool,
    on_disk: bool,
    /// Whatever is at the path is replaced by the first sync.
    replace: bool,
    closed: bool,
}

impl DirStore {
    /// Open the store at `path`, or prepare a new one there. The returned
    /// boolean is `true` if the store is new.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<(DirStore, bool), StoreError> {
        let path = path.as_ref().to_path_buf();
        let on_disk = path.join(META_FILENAME).exists();
        let meta = if on_disk {
            StoreMeta::read(&path)?
        } else {
            debug!("No store at '{}'; it will be created on sync", path.display());
            StoreMeta::default()
        };

        Ok((
            DirStore {
                members: vec![path],
                metas: vec![meta],
                pending: IndexMap::new(),
                window: None,
                read_only: false,
                on_disk,
                replace: false,
                closed: false,
            },
            !on_disk,
        ))
    }

    /// Prepare a new, empty store at `path`. A store already there stays
    /// readable until the first [`DirStore::sync`], which replaces it.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<DirStore, StoreError> {
        let (mut store, is_new) = Self::open(path)?;
        if !is_new {
            debug!("'{}' will be replaced on sync", store.path().display());
            store.metas = vec![StoreMeta::default()];
            store.on_disk = false;
            store.replace = true;
        }
        Ok(store)
    }

    /// Open a store that must already exist.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<DirStore, StoreError> {
        let (store, is_new) = Self::open(path.as_ref())?;
        if is_new {
            return Err(StoreError::NotFound(path.as_ref().to_path_buf()));
        }
        Ok(store)
    }

    /// Open many existing stores as one. Variables whose leading dimension is
    /// `time` are concatenated along it, in the order of `paths`; every other
    /// variable is read from the first store. All stores must share the same
    /// grid.
    pub fn aggregate<P: AsRef<Path>>(paths: &[P], read_only: bool) -> Result<DirStore, StoreError> {
        if paths.is_empty() {
            return Err(StoreError::NoMembers);
        }

        let mut members = Vec::with_capacity(paths.len());
        let mut metas: Vec<StoreMeta> = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let meta = StoreMeta::read(path).map_err(|e| match e {
                StoreError::IO(_) => StoreError::NotFound(path.to_path_buf()),
                e => e,
            })?;
            if let Some(first) = metas.first() {
                for dim in [DIM_Y, DIM_X] {
                    let existing = first.dims.get(dim).copied().unwrap_or(0);
                    let new = meta.dims.get(dim).copied().unwrap_or(0);
                    if existing != new {
                        return Err(StoreError::DimensionMismatch {
                            dim: dim.to_string(),
                            existing,
                            new,
                        });
                    }
                }
            }
            members.push(path.to_path_buf());
            metas.push(meta);
        }
        debug!("Aggregated {} stores along '{DIM_TIME}'", members.len());

        Ok(DirStore {
            members,
            metas,
            pending: IndexMap::new(),
            window: None,
            // A write wouldn't know which member to go to.
            read_only: read_only || paths.len() > 1,
            on_disk: true,
            replace: false,
            closed: false,
        })
    }

    /// Narrow this handle to `tile`. The persisted store is untouched; only
    /// what this handle reads (and may write) changes. Tailoring an already
    /// tailored handle narrows within the existing tile.
    pub fn tailor(mut self, tile: &Tile, read_only: bool) -> Result<DirStore, StoreError> {
        let (rows, cols) = match &self.window {
            Some(w) => (w.rows(), w.cols()),
            None => (self.dim_len(DIM_Y), self.dim_len(DIM_X)),
        };
        if tile.y.end > rows || tile.x.end > cols || tile.y.is_empty() || tile.x.is_empty() {
            return Err(StoreError::TileOutOfBounds {
                tile: tile.to_string(),
                rows,
                cols,
            });
        }

        self.window = Some(match &self.window {
            Some(w) => w.compose(tile),
            None => tile.clone(),
        });
        self.read_only |= read_only;
        trace!("Tailored '{}' to {tile}", self.path().display());
        Ok(self)
    }

    /// Forbid writes through this handle.
    pub fn into_read_only(mut self) -> DirStore {
        self.read_only = true;
        self
    }

    /// The path of the (first) store behind this handle.
    pub fn path(&self) -> &Path {
        &self.members[0]
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn window(&self) -> Option<&Tile> {
        self.window.as_ref()
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed(self.path().to_path_buf()))
        } else {
            Ok(())
        }
    }

    fn dim_len(&self, dim: &str) -> usize {
        self.metas[0].dims.get(dim).copied().unwrap_or(0)
    }

    fn variable_meta(&self, name: &str) -> Result<&VariableMeta, StoreError> {
        self.metas[0]
            .variables
            .get(name)
            .ok_or_else(|| StoreError::MissingVariable {
                name: name.to_string(),
                path: self.path().to_path_buf(),
            })
    }

    fn is_time_stacked(dims: &[String]) -> bool {
        dims.first().map(|d| d == DIM_TIME).unwrap_or(false)
    }

    /// The full-extent (untailored) shape of a variable.
    fn full_shape(&self, name: &str) -> Result<(Vec<String>, Vec<usize>), StoreError> {
        if let Some(data) = self.pending.get(name) {
            let dims = self.variable_meta(name)?.dims.clone();
            return Ok((dims, data.shape().to_vec()));
        }

        let dims = self.variable_meta(name)?.dims.clone();
        let mut shape = self.metas[0].shape_of(&dims);
        if self.members.len() > 1 && Self::is_time_stacked(&dims) {
            shape[0] = self
                .metas
                .iter()
                .map(|m| m.dims.get(DIM_TIME).copied().unwrap_or(0))
                .sum();
        }
        Ok((dims, shape))
    }

    /// Read the full-extent data of a variable, preferring unsynced writes.
    fn load_full(&self, name: &str) -> Result<ArrayD<f32>, StoreError> {
        if let Some(data) = self.pending.get(name) {
            return Ok(data.clone());
        }

        let dims = &self.variable_meta(name)?.dims;
        if self.members.len() > 1 && Self::is_time_stacked(dims) {
            let parts = self
                .members
                .iter()
                .zip(self.metas.iter())
                .map(|(path, meta)| read_data_file(path, name, &meta.shape_of(dims)))
                .collect::<Result<Vec<_>, _>>()?;
            let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
            ndarray::concatenate(Axis(0), &views).map_err(|e| StoreError::Corrupt {
                path: self.path().to_path_buf(),
                msg: format!("cannot stack '{name}' along {DIM_TIME}: {e}"),
            })
        } else {
            read_data_file(self.path(), name, &self.metas[0].shape_of(dims))
        }
    }

    fn window_shape(&self, dims: &[String], mut shape: Vec<usize>) -> Vec<usize> {
        if let Some(tile) = &self.window {
            for (dim, len) in dims.iter().zip(shape.iter_mut()) {
                if let Some(r) = tile.range_for(dim) {
                    *len = r.len();
                }
            }
        }
        shape
    }

    fn write_pending(&self, dir: &Path) -> Result<(), StoreError> {
        for (name, data) in &self.pending {
            let final_path = data_path(dir, name);
            let tmp_path = final_path.with_extension("tmp");
            write_data_file(&tmp_path, data.view())?;
            std::fs::rename(&tmp_path, &final_path)?;
        }

        let meta_path = dir.join(META_FILENAME);
        let tmp_path = meta_path.with_extension("tmp");
        {
            let mut f = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer_pretty(&mut f, &self.metas[0])?;
            f.flush()?;
        }
        std::fs::rename(&tmp_path, &meta_path)?;
        Ok(())
    }
}

impl VariableStore for DirStore {
    fn variable(&self, name: &str) -> Result<VariableRef, StoreError> {
        self.check_open()?;
        let (dims, shape) = self.full_shape(name)?;
        let shape = self.window_shape(&dims, shape);
        Ok(VariableRef {
            name: name.to_string(),
            dims,
            shape,
        })
    }

    fn read(&self, var: &VariableRef) -> Result<ArrayD<f32>, StoreError> {
        self.check_open()?;
        trace!("Reading '{}' from '{}'", var.name, self.path().display());
        let full = self.load_full(&var.name)?;
        let data = match &self.window {
            None => full,
            Some(tile) => full
                .slice_each_axis(|ax| match tile.range_for(&var.dims[ax.axis.index()]) {
                    Some(r) => Slice::from(r),
                    None => Slice::from(..),
                })
                .to_owned(),
        };
        Ok(data)
    }

    fn write(
        &mut self,
        name: &str,
        dims: &[&str],
        data: ArrayViewD<f32>,
    ) -> Result<(), StoreError> {
        self.check_open()?;
        if self.read_only {
            return Err(StoreError::ReadOnly(self.path().to_path_buf()));
        }
        if dims.len() != data.ndim() {
            return Err(StoreError::DimensionCount {
                name: name.to_string(),
                expected: data.ndim(),
                got: dims.len(),
            });
        }

        if let Some(tile) = self.window.clone() {
            if dims.iter().any(|d| tile.range_for(d).is_some()) {
                // Only the window of an existing variable may be written.
                if !self.metas[0].variables.contains_key(name) {
                    return Err(StoreError::WindowedCreate(name.to_string()));
                }
                let expected = self.variable(name)?.shape;
                if expected != data.shape() {
                    return Err(StoreError::ShapeMismatch {
                        name: name.to_string(),
                        expected,
                        got: data.shape().to_vec(),
                    });
                }
                let mut full = self.load_full(name)?;
                full.slice_each_axis_mut(|ax| match tile.range_for(dims[ax.axis.index()]) {
                    Some(r) => Slice::from(r),
                    None => Slice::from(..),
                })
                .assign(&data);
                self.pending.insert(name.to_string(), full);
                return Ok(());
            }
        }

        let meta = &mut self.metas[0];
        for (&dim, &len) in dims.iter().zip(data.shape()) {
            match meta.dims.get(dim) {
                Some(&existing) if existing != len => {
                    // Overwriting the only variable that uses a dimension may
                    // resize it.
                    let shared = meta
                        .variables
                        .iter()
                        .any(|(n, v)| n != name && v.dims.iter().any(|d| d == dim));
                    if shared {
                        return Err(StoreError::DimensionMismatch {
                            dim: dim.to_string(),
                            existing,
                            new: len,
                        });
                    }
                    meta.dims.insert(dim.to_string(), len);
                }
                Some(_) => (),
                None => {
                    meta.dims.insert(dim.to_string(), len);
                }
            }
        }
        meta.variables.insert(
            name.to_string(),
            VariableMeta {
                dims: dims.iter().map(|d| d.to_string()).collect(),
            },
        );
        self.pending
            .insert(name.to_string(), data.as_standard_layout().into_owned());
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.check_open()?;
        if self.pending.is_empty() && self.on_disk {
            return Ok(());
        }

        let root = self.path().to_path_buf();
        if self.on_disk {
            self.write_pending(&root)?;
        } else {
            let mut staging = root.clone().into_os_string();
            staging.push(".partial");
            let staging = PathBuf::from(staging);
            if staging.exists() {
                std::fs::remove_dir_all(&staging)?;
            }
            std::fs::create_dir_all(&staging)?;
            self.write_pending(&staging)?;
            if self.replace && root.exists() {
                std::fs::remove_dir_all(&root)?;
            }
            std::fs::rename(&staging, &root)?;
            self.on_disk = true;
            self.replace = false;
            debug!("Created store '{}'", root.display());
        }
        trace!(
            "Synced {} variable(s) to '{}'",
            self.pending.len(),
            root.display()
        );
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.check_open()?;
        if !self.pending.is_empty() {
            warn!(
                "Closing '{}' with {} unsynced variable(s); they are discarded",
                self.path().display(),
                self.pending.len()
            );
            self.pending.clear();
        }
        self.closed = true;
        Ok(())
    }

    fn variable_names(&self) -> Result<Vec<String>, StoreError> {
        self.check_open()?;
        Ok(self.metas[0].variables.keys().cloned().collect())
    }
}

fn data_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{DATA_EXTENSION}"))
}

fn read_data_file(dir: &Path, name: &str, shape: &[usize]) -> Result<ArrayD<f32>, StoreError> {
    let path = data_path(dir, name);
    let num_elements: usize = shape.iter().product();
    let file = File::open(&path)?;
    let file_len = file.metadata()?.len() as usize;
    if file_len != num_elements * std::mem::size_of::<f32>() {
        return Err(StoreError::Corrupt {
            path,
            msg: format!("expected {num_elements} floats, found {file_len} bytes"),
        });
    }

    let mut buf = vec![0.0; num_elements];
    BufReader::new(file).read_f32_into::<LittleEndian>(&mut buf)?;
    ArrayD::from_shape_vec(IxDyn(shape), buf).map_err(|e| StoreError::Corrupt {
        path,
        msg: e.to_string(),
    })
}

fn write_data_file(path: &Path, data: ArrayViewD<f32>) -> Result<(), StoreError> {
    let mut f = BufWriter::new(File::create(path)?);
    for &v in data.iter() {
        f.write_f32::<LittleEndian>(v)?;
    }
    f.flush()?;
    Ok(())
}
