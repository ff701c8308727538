// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reconciling the shapes of kernel operands.
//!
//! Kernels see every operand as a 3-D `[lead, rows, cols]` array. Operands of
//! mixed rank are brought there in two steps: all operands are cut down to
//! the median rank (keeping trailing dimensions), then padded on the left
//! with singleton dimensions. The launch geometry is then taken from the
//! padded shapes.

use super::GpuError;

/// The rank every operand has on the device.
pub(crate) const DEVICE_RANK: usize = 3;

/// The rank all operands are reconciled to: the median of their ranks,
/// truncated towards zero.
pub(crate) fn common_rank(shapes: &[Vec<usize>]) -> usize {
    let mut ranks: Vec<usize> = shapes.iter().map(|s| s.len()).collect();
    ranks.sort_unstable();
    match ranks.len() {
        0 => 0,
        n if n % 2 == 1 => ranks[n / 2],
        n => (ranks[n / 2 - 1] + ranks[n / 2]) / 2,
    }
}

/// Reshape `shape` to `rank` by keeping its trailing `rank` dimensions. A
/// rank of 0 keeps the whole shape, and so does a shape that is already
/// shorter.
///
/// Dropped leading dimensions must be singletons. Anything else would
/// silently discard data, e.g. the time axis of a minority-shaped operand.
pub(crate) fn truncate(index: usize, shape: &[usize], rank: usize) -> Result<Vec<usize>, GpuError> {
    if rank == 0 || shape.len() <= rank {
        return Ok(shape.to_vec());
    }
    let (dropped, kept) = shape.split_at(shape.len() - rank);
    if dropped.iter().any(|&d| d != 1) {
        return Err(GpuError::ShapeMismatch {
            index,
            shape: shape.to_vec(),
            reason: format!("dropping its leading dimensions to reach rank {rank} would lose data"),
        });
    }
    Ok(kept.to_vec())
}

/// Pad `shape` on the left with singleton dimensions up to the device rank.
pub(crate) fn pad(index: usize, shape: &[usize]) -> Result<[usize; DEVICE_RANK], GpuError> {
    if shape.len() > DEVICE_RANK {
        return Err(GpuError::ShapeMismatch {
            index,
            shape: shape.to_vec(),
            reason: format!("kernels take at most {DEVICE_RANK} dimensions"),
        });
    }
    let mut padded = [1; DEVICE_RANK];
    padded[DEVICE_RANK - shape.len()..].copy_from_slice(shape);
    Ok(padded)
}

/// Reconcile the shapes of all operands of a launch.
pub(crate) fn reconcile(shapes: &[Vec<usize>]) -> Result<Vec<[usize; DEVICE_RANK]>, GpuError> {
    let rank = common_rank(shapes);
    shapes
        .iter()
        .enumerate()
        .map(|(i, shape)| pad(i, &truncate(i, shape, rank)?))
        .collect()
}

/// How a kernel is spread over the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// `[x, y]`, i.e. `[cols, rows]` of the largest 2-D footprint.
    pub grid: [usize; 2],
    /// Threads per block, along z: the largest leading dimension.
    pub threads: usize,
}

/// Derive the launch geometry from reconciled shapes. The grid covers the
/// operand with the largest `rows * cols` footprint (the first one on ties),
/// and each block runs one thread per element of the largest leading
/// dimension.
pub(crate) fn launch_config(shapes: &[[usize; DEVICE_RANK]]) -> LaunchConfig {
    let mut grid = [1, 1];
    let mut footprint = 0;
    for shape in shapes {
        let f = shape[1] * shape[2];
        if f > footprint {
            footprint = f;
            grid = [shape[2], shape[1]];
        }
    }
    let threads = shapes.iter().map(|s| s[0]).max().unwrap_or(1);
    LaunchConfig { grid, threads }
}

/// Check that every operand can be read at every position of the launch:
/// each of its `[lead, rows, cols]` must be 1 (broadcast) or equal to
/// `[threads, rows, cols]` of `config`.
pub(crate) fn check_broadcast(
    shapes: &[[usize; DEVICE_RANK]],
    config: &LaunchConfig,
) -> Result<(), GpuError> {
    let extent = [config.threads, config.grid[1], config.grid[0]];
    for (index, shape) in shapes.iter().enumerate() {
        if shape.iter().zip(extent).any(|(&n, e)| n != 1 && n != e) {
            return Err(GpuError::ShapeMismatch {
                index,
                shape: shape.to_vec(),
                reason: format!("it doesn't broadcast over the launch extent {extent:?}"),
            });
        }
    }
    Ok(())
}
