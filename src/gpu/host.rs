// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A device emulated on the host.
//!
//! Kernels are plain Rust functions run once per (block, thread) pair, in the
//! same launch geometry a GPU would use. Buffers are instrumented, so tests
//! can check that every allocation is released.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use log::trace;

use super::{kernels, Device, GpuCall, GpuError, LaunchConfig};

/// The position of one kernel invocation: the block on the 2-D grid and the
/// thread within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadIdx {
    /// The column.
    pub block_x: usize,
    /// The row.
    pub block_y: usize,
    /// Along the leading dimension (usually time).
    pub thread_z: usize,
}

pub type HostKernel = fn(ThreadIdx, &mut KernelArgs<'_>);

/// The operands of a running kernel, as `[lead, rows, cols]` arrays.
pub struct KernelArgs<'a> {
    data: Vec<&'a mut [f32]>,
    shapes: &'a [[usize; 3]],
}

impl KernelArgs<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self, arg: usize) -> [usize; 3] {
        self.shapes[arg]
    }

    /// The flat index of `[t, r, c]` in `arg`. Singleton dimensions are
    /// broadcast, so a scalar can be read at any position.
    fn index(&self, arg: usize, t: usize, r: usize, c: usize) -> usize {
        let [nt, nr, nc] = self.shapes[arg];
        let b = |i: usize, n: usize| if n == 1 { 0 } else { i };
        (b(t, nt) * nr + b(r, nr)) * nc + b(c, nc)
    }

    pub fn get(&self, arg: usize, t: usize, r: usize, c: usize) -> f32 {
        self.data[arg][self.index(arg, t, r, c)]
    }

    pub fn set(&mut self, arg: usize, t: usize, r: usize, c: usize, value: f32) {
        let i = self.index(arg, t, r, c);
        self.data[arg][i] = value;
    }
}

#[derive(Debug, Default)]
struct Counters {
    allocated: AtomicUsize,
    released: AtomicUsize,
    live_bytes: AtomicUsize,
}

/// Host memory standing in for device memory.
#[derive(Debug)]
pub struct HostBuffer {
    data: Vec<f32>,
    counters: Arc<Counters>,
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        self.counters
            .live_bytes
            .fetch_sub(std::mem::size_of_val(self.data.as_slice()), Ordering::SeqCst);
    }
}

pub struct HostDevice {
    kernels: HashMap<String, HostKernel>,
    counters: Arc<Counters>,
    /// \[bytes\]
    memory_limit: Option<usize>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    /// A host device with the radiation model's kernels registered.
    pub fn new() -> HostDevice {
        HostDevice::empty()
            .with_kernel(kernels::UPDATE_TEMPORAL_CACHE, kernels::update_temporalcache)
            .with_kernel(
                kernels::ESTIMATE_GLOBAL_RADIATION,
                kernels::estimate_globalradiation,
            )
    }

    /// A host device without any kernels.
    pub fn empty() -> HostDevice {
        HostDevice {
            kernels: HashMap::new(),
            counters: Arc::new(Counters::default()),
            memory_limit: None,
        }
    }

    pub fn with_kernel(mut self, name: &str, kernel: HostKernel) -> HostDevice {
        self.kernels.insert(name.to_string(), kernel);
        self
    }

    /// Fail allocations that would take the memory in use above `bytes`.
    pub fn with_memory_limit(mut self, bytes: usize) -> HostDevice {
        self.memory_limit = Some(bytes);
        self
    }

    /// The number of buffers allocated so far.
    pub fn allocated(&self) -> usize {
        self.counters.allocated.load(Ordering::SeqCst)
    }

    /// The number of buffers released so far.
    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    /// The number of buffers currently alive.
    pub fn live(&self) -> usize {
        self.allocated() - self.released()
    }
}

impl Device for HostDevice {
    type Buffer = HostBuffer;

    fn name(&self) -> String {
        format!("the host ({} CPU)", std::env::consts::ARCH)
    }

    fn has_kernel(&self, kernel: &str) -> bool {
        self.kernels.contains_key(kernel)
    }

    #[track_caller]
    fn alloc(&self, len: usize) -> Result<HostBuffer, GpuError> {
        let bytes = len * std::mem::size_of::<f32>();
        let live = self.counters.live_bytes.load(Ordering::SeqCst);
        if let Some(limit) = self.memory_limit {
            if live + bytes > limit {
                return Err(GpuError::device(
                    GpuCall::Malloc,
                    format!("out of memory ({bytes} bytes requested, {live} of {limit} in use)"),
                ));
            }
        }

        self.counters.allocated.fetch_add(1, Ordering::SeqCst);
        self.counters.live_bytes.fetch_add(bytes, Ordering::SeqCst);
        Ok(HostBuffer {
            data: vec![0.0; len],
            counters: Arc::clone(&self.counters),
        })
    }

    #[track_caller]
    fn copy_to_device(&self, buffer: &mut HostBuffer, data: &[f32]) -> Result<(), GpuError> {
        if buffer.data.len() != data.len() {
            return Err(GpuError::device(
                GpuCall::CopyToDevice,
                format!(
                    "Device buffer length {} is not equal to the host length {}",
                    buffer.data.len(),
                    data.len()
                ),
            ));
        }
        buffer.data.copy_from_slice(data);
        Ok(())
    }

    #[track_caller]
    fn copy_from_device(&self, buffer: &HostBuffer, data: &mut [f32]) -> Result<(), GpuError> {
        if buffer.data.len() != data.len() {
            return Err(GpuError::device(
                GpuCall::CopyFromDevice,
                format!(
                    "Device buffer length {} is not equal to the host length {}",
                    buffer.data.len(),
                    data.len()
                ),
            ));
        }
        data.copy_from_slice(&buffer.data);
        Ok(())
    }

    #[track_caller]
    fn launch(
        &self,
        kernel: &str,
        config: &LaunchConfig,
        buffers: &mut [HostBuffer],
        shapes: &[[usize; 3]],
    ) -> Result<(), GpuError> {
        let function = *self
            .kernels
            .get(kernel)
            .ok_or_else(|| GpuError::UnknownKernel {
                name: kernel.to_string(),
                device: self.name(),
            })?;
        if buffers.len() != shapes.len() {
            return Err(GpuError::device(
                GpuCall::Launch,
                format!("{} buffers, but {} shapes", buffers.len(), shapes.len()),
            ));
        }
        for (i, (b, s)) in buffers.iter().zip(shapes).enumerate() {
            if b.data.len() != s.iter().product::<usize>() {
                return Err(GpuError::device(
                    GpuCall::Launch,
                    format!("buffer {i} has {} elements, but its shape is {s:?}", b.data.len()),
                ));
            }
        }

        trace!("Emulating '{kernel}' with {config:?}");
        let mut args = KernelArgs {
            data: buffers.iter_mut().map(|b| b.data.as_mut_slice()).collect(),
            shapes,
        };
        let [grid_x, grid_y] = config.grid;
        for block_y in 0..grid_y {
            for block_x in 0..grid_x {
                for thread_z in 0..config.threads {
                    function(
                        ThreadIdx {
                            block_x,
                            block_y,
                            thread_z,
                        },
                        &mut args,
                    );
                }
            }
        }
        Ok(())
    }
}
