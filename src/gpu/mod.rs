// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Running named compute steps ("kernels") on a device.
//!
//! [`dispatch`] takes a flat list of operands of mixed rank (scalars, 2-D
//! grids, time-stacked 3-D grids), reconciles them to 3-D shapes, copies them
//! to the device, launches the kernel over a grid derived from the shapes and
//! copies the declared outputs back. Every device buffer is released before
//! `dispatch` returns, whether it succeeds or not.

#[cfg(feature = "cuda")]
mod cuda;
mod host;
pub(crate) mod kernels;
mod shape;

#[cfg(feature = "cuda")]
pub use cuda::{CudaDevice, DevicePointer};
pub use host::{HostBuffer, HostDevice, HostKernel, KernelArgs, ThreadIdx};
pub use shape::LaunchConfig;

use std::panic::Location;

use log::{debug, trace};
use ndarray::{ArrayViewD, ArrayViewMutD};
use strum_macros::Display;
use thiserror::Error;

/// Something that can hold `f32` buffers and run kernels over them.
///
/// Buffers release their device memory when dropped.
pub trait Device {
    type Buffer;

    /// A human-readable description of the device.
    fn name(&self) -> String;

    fn has_kernel(&self, kernel: &str) -> bool;

    /// Allocate a buffer of `len` floats.
    fn alloc(&self, len: usize) -> Result<Self::Buffer, GpuError>;

    fn copy_to_device(&self, buffer: &mut Self::Buffer, data: &[f32]) -> Result<(), GpuError>;

    fn copy_from_device(&self, buffer: &Self::Buffer, data: &mut [f32]) -> Result<(), GpuError>;

    /// Run `kernel` over `buffers`, whose (reconciled, row-major) shapes are
    /// `shapes`.
    fn launch(
        &self,
        kernel: &str,
        config: &LaunchConfig,
        buffers: &mut [Self::Buffer],
        shapes: &[[usize; 3]],
    ) -> Result<(), GpuError>;
}

/// An operand of a kernel launch.
#[derive(Debug)]
pub enum Operand<'a> {
    /// A constant, seen by the kernel as a `[1, 1, 1]` array.
    Scalar(f32),
    Input(ArrayViewD<'a, f32>),
    /// Copied to the device like an input, and copied back after the launch
    /// if it is among the declared outputs.
    Output(ArrayViewMutD<'a, f32>),
}

impl Operand<'_> {
    fn shape(&self) -> Vec<usize> {
        match self {
            Operand::Scalar(_) => vec![1, 1, 1],
            Operand::Input(a) => a.shape().to_vec(),
            Operand::Output(a) => a.shape().to_vec(),
        }
    }

    /// The elements in logical (row-major) order.
    fn to_host_vec(&self) -> Vec<f32> {
        match self {
            Operand::Scalar(s) => vec![*s],
            Operand::Input(a) => a.iter().copied().collect(),
            Operand::Output(a) => a.iter().copied().collect(),
        }
    }
}

/// Run the kernel `step` over `operands`. The first `output_count` operands
/// are the kernel's outputs; they must be [`Operand::Output`]s and are
/// overwritten with the device's results. The remaining operands are only
/// read.
///
/// # Errors
///
/// - [`GpuError::UnknownKernel`] if `device` doesn't know `step`;
/// - [`GpuError::OutputNotWritable`] if an output position doesn't hold a
///   writable operand;
/// - [`GpuError::ShapeMismatch`] if the operands can't be reconciled, or
///   one doesn't broadcast over the launch;
/// - [`GpuError::DeviceResource`] if the device fails.
pub fn dispatch<D: Device>(
    device: &D,
    step: &str,
    output_count: usize,
    operands: &mut [Operand],
) -> Result<(), GpuError> {
    if !device.has_kernel(step) {
        return Err(GpuError::UnknownKernel {
            name: step.to_string(),
            device: device.name(),
        });
    }
    if output_count > operands.len() {
        return Err(GpuError::OutputCount {
            outputs: output_count,
            operands: operands.len(),
        });
    }
    if let Some(index) = operands[..output_count]
        .iter()
        .position(|o| !matches!(o, Operand::Output(_)))
    {
        return Err(GpuError::OutputNotWritable { index });
    }

    let shapes: Vec<Vec<usize>> = operands.iter().map(Operand::shape).collect();
    let shapes = shape::reconcile(&shapes)?;
    let config = shape::launch_config(&shapes);
    shape::check_broadcast(&shapes, &config)?;
    debug!(
        "{step} -> block by grid: {:?}, threads by block: {}",
        config.grid, config.threads
    );

    // Dropping this releases everything allocated so far, also on an early
    // return.
    let mut buffers: Vec<D::Buffer> = Vec::with_capacity(operands.len());
    for operand in operands.iter() {
        let host = operand.to_host_vec();
        let mut buffer = device.alloc(host.len())?;
        device.copy_to_device(&mut buffer, &host)?;
        buffers.push(buffer);
    }

    device.launch(step, &config, &mut buffers, &shapes)?;

    for (operand, buffer) in operands.iter_mut().zip(buffers.iter()).take(output_count) {
        if let Operand::Output(view) = operand {
            let mut host = vec![0.0; view.len()];
            device.copy_from_device(buffer, &mut host)?;
            view.iter_mut().zip(host).for_each(|(o, h)| *o = h);
        }
    }
    trace!("{step}: copied back {output_count} of {} operands", operands.len());
    Ok(())
}

/// The device call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum GpuCall {
    #[strum(serialize = "malloc")]
    Malloc,
    #[strum(serialize = "copy to device")]
    CopyToDevice,
    #[strum(serialize = "copy from device")]
    CopyFromDevice,
    #[strum(serialize = "kernel launch")]
    Launch,
    #[strum(serialize = "device query")]
    DeviceInfo,
}

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("There is no kernel '{name}' on {device}")]
    UnknownKernel { name: String, device: String },

    #[error("Operand {index} (shape {shape:?}) can't be reconciled: {reason}")]
    ShapeMismatch {
        index: usize,
        shape: Vec<usize>,
        reason: String,
    },

    #[error("Operand {index} is declared as an output, but isn't writable")]
    OutputNotWritable { index: usize },

    #[error("{outputs} outputs were declared, but there are only {operands} operands")]
    OutputCount { outputs: usize, operands: usize },

    #[error("{file}:{line}: {call} failed: {msg}")]
    DeviceResource {
        call: GpuCall,
        msg: Box<str>,
        file: &'static str,
        line: u32,
    },
}

impl GpuError {
    /// A [`GpuError::DeviceResource`] located at the caller.
    #[track_caller]
    pub(crate) fn device(call: GpuCall, msg: impl Into<Box<str>>) -> GpuError {
        let location = Location::caller();
        GpuError::DeviceResource {
            call,
            msg: msg.into(),
            file: location.file(),
            line: location.line(),
        }
    }
}
