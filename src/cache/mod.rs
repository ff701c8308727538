// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! On-demand materialization of persisted rasters.
//!
//! A [`LazyRasterCache`] keeps two tiers per variable name: the lazy
//! [`VariableRef`] resolved from the backing store, and the materialized
//! array. The first [`LazyRasterCache::get`] of a name fills both tiers;
//! every later `get` is served from memory. A materialized entry is never
//! re-read from storage behind the caller's back. Stale data is only dropped
//! by [`LazyRasterCache::dump`].

mod memoize;

pub use memoize::ResultMemoizer;

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;
use log::{debug, trace};
use ndarray::ArrayD;
use thiserror::Error;

use crate::store::{StoreError, VariableRef, VariableStore};

pub struct LazyRasterCache {
    /// `None` once the cache has been dumped.
    root: Option<Box<dyn VariableStore>>,

    references: HashMap<String, VariableRef>,
    materialized: HashMap<String, Arc<ArrayD<f32>>>,

    /// Entries inserted since the last sync, with their dimension names.
    dirty: IndexMap<String, Vec<String>>,
}

impl LazyRasterCache {
    pub fn new(root: Box<dyn VariableStore>) -> LazyRasterCache {
        LazyRasterCache {
            root: Some(root),
            references: HashMap::new(),
            materialized: HashMap::new(),
            dirty: IndexMap::new(),
        }
    }

    fn root(&self) -> Result<&dyn VariableStore, CacheError> {
        self.root.as_deref().ok_or(CacheError::UseAfterClose)
    }

    /// Get the materialized data of `name`, reading it from the backing store
    /// only if this is the first request for it. The returned array is a
    /// shared snapshot; cloning the [`Arc`] is free.
    ///
    /// # Errors
    ///
    /// [`CacheError::MissingVariable`] if the backing store has no such
    /// variable. There is no default value.
    pub fn get(&mut self, name: &str) -> Result<Arc<ArrayD<f32>>, CacheError> {
        let root = self.root.as_deref().ok_or(CacheError::UseAfterClose)?;
        if let Some(data) = self.materialized.get(name) {
            trace!("Cache hit for '{name}'");
            return Ok(Arc::clone(data));
        }

        let var = match self.references.get(name) {
            Some(var) => var.clone(),
            None => {
                let var = root.variable(name).map_err(CacheError::from_store)?;
                self.references.insert(name.to_string(), var.clone());
                var
            }
        };
        debug!("Materializing '{name}' {:?}", var.shape);
        let data = Arc::new(root.read(&var).map_err(CacheError::from_store)?);
        self.materialized
            .insert(name.to_string(), Arc::clone(&data));
        Ok(data)
    }

    /// Get the lazy handle on `name` without materializing it.
    pub fn reference(&mut self, name: &str) -> Result<&VariableRef, CacheError> {
        let root = self.root.as_deref().ok_or(CacheError::UseAfterClose)?;
        if !self.references.contains_key(name) {
            let var = root.variable(name).map_err(CacheError::from_store)?;
            self.references.insert(name.to_string(), var);
        }
        Ok(&self.references[name])
    }

    pub fn is_materialized(&self, name: &str) -> bool {
        self.materialized.contains_key(name)
    }

    /// Replace the materialized value of `name` with `data` and remember to
    /// persist it under the dimensions `dims` on the next
    /// [`LazyRasterCache::sync`].
    pub fn insert(
        &mut self,
        name: &str,
        dims: &[&str],
        data: ArrayD<f32>,
    ) -> Result<Arc<ArrayD<f32>>, CacheError> {
        self.root()?;
        if dims.len() != data.ndim() {
            return Err(CacheError::Store(StoreError::DimensionCount {
                name: name.to_string(),
                expected: data.ndim(),
                got: dims.len(),
            }));
        }

        let data = Arc::new(data);
        self.references.insert(
            name.to_string(),
            VariableRef {
                name: name.to_string(),
                dims: dims.iter().map(|d| d.to_string()).collect(),
                shape: data.shape().to_vec(),
            },
        );
        self.materialized
            .insert(name.to_string(), Arc::clone(&data));
        self.dirty.insert(
            name.to_string(),
            dims.iter().map(|d| d.to_string()).collect(),
        );
        Ok(data)
    }

    /// Write every inserted entry to the backing store and sync it.
    pub fn sync(&mut self) -> Result<(), CacheError> {
        let root = self.root.as_deref_mut().ok_or(CacheError::UseAfterClose)?;
        for (name, dims) in &self.dirty {
            let dims: Vec<&str> = dims.iter().map(|d| d.as_str()).collect();
            root.write(name, &dims, self.materialized[name].view())?;
        }
        root.sync()?;
        debug!("Synced {} cached variable(s)", self.dirty.len());
        self.dirty.clear();
        Ok(())
    }

    /// Release every cached entry and close the backing store. Any later use
    /// of this cache fails with [`CacheError::UseAfterClose`].
    pub fn dump(&mut self) -> Result<(), CacheError> {
        let mut root = self.root.take().ok_or(CacheError::UseAfterClose)?;
        if !self.dirty.is_empty() {
            debug!(
                "Dumping the cache with {} unsynced variable(s)",
                self.dirty.len()
            );
        }
        self.references.clear();
        self.materialized.clear();
        self.dirty.clear();
        root.close()?;
        Ok(())
    }

    /// The backing store.
    pub fn store(&self) -> Result<&dyn VariableStore, CacheError> {
        self.root()
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Variable '{0}' doesn't exist in the backing store")]
    MissingVariable(String),

    #[error("The cache was used after it was dumped")]
    UseAfterClose,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CacheError {
    fn from_store(e: StoreError) -> CacheError {
        match e {
            StoreError::MissingVariable { name, .. } => CacheError::MissingVariable(name),
            StoreError::Closed(_) => CacheError::UseAfterClose,
            e => CacheError::Store(e),
        }
    }
}
