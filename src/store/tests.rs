// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;
use tempfile::tempdir;

use super::*;
use crate::constants::*;

fn grid(rows: usize, cols: usize, offset: f32) -> ArrayD<f32> {
    Array2::from_shape_fn((rows, cols), |(r, c)| offset + (r * cols + c) as f32).into_dyn()
}

#[test]
fn new_store_is_only_created_on_sync() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("static");

    let (mut store, is_new) = DirStore::open(&path).unwrap();
    assert!(is_new);
    store
        .write(VAR_DEM, &[DIM_Y, DIM_X], grid(3, 4, 0.0).view())
        .unwrap();
    assert!(!path.exists());

    store.sync().unwrap();
    assert!(path.join("store.json").exists());
    assert!(path.join("dem.f32").exists());

    let (reopened, is_new) = DirStore::open(&path).unwrap();
    assert!(!is_new);
    let dem = reopened.read_variable(VAR_DEM).unwrap();
    assert_abs_diff_eq!(dem, grid(3, 4, 0.0));
}

#[test]
fn created_stores_replace_the_old_one_on_sync() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("product");
    let (mut old, _) = DirStore::open(&path).unwrap();
    old.write(VAR_DEM, &[DIM_TIME, DIM_Y], grid(4, 3, 0.0).view())
        .unwrap();
    old.write(VAR_LAT, &[DIM_TIME, DIM_Y], grid(4, 3, 1.0).view())
        .unwrap();
    old.sync().unwrap();

    let mut new = DirStore::create(&path).unwrap();
    assert!(new.variable_names().unwrap().is_empty());
    // A different length of 'time' is fine in a fresh store.
    new.write(VAR_DEM, &[DIM_TIME, DIM_Y], grid(5, 3, 2.0).view())
        .unwrap();
    // Until then, the old store is still there.
    assert_eq!(
        DirStore::open_existing(&path).unwrap().variable_names().unwrap().len(),
        2
    );
    new.sync().unwrap();

    let reopened = DirStore::open_existing(&path).unwrap();
    assert_eq!(reopened.variable_names().unwrap(), vec![VAR_DEM.to_string()]);
    assert_abs_diff_eq!(reopened.read_variable(VAR_DEM).unwrap(), grid(5, 3, 2.0));
    assert!(!path.join("lat.f32").exists());
}

#[test]
fn unsynced_writes_are_readable() {
    let tmp = tempdir().unwrap();
    let (mut store, _) = DirStore::open(tmp.path().join("s")).unwrap();
    store
        .write(VAR_LAT, &[DIM_Y, DIM_X], grid(2, 2, 5.0).view())
        .unwrap();
    let var = store.variable(VAR_LAT).unwrap();
    assert_eq!(var.shape, vec![2, 2]);
    assert_eq!(var.dims, vec![DIM_Y.to_string(), DIM_X.to_string()]);
    assert_abs_diff_eq!(store.read(&var).unwrap(), grid(2, 2, 5.0));
}

#[test]
fn missing_variable_is_an_error() {
    let tmp = tempdir().unwrap();
    let (store, _) = DirStore::open(tmp.path().join("s")).unwrap();
    let result = store.variable("nope");
    assert!(matches!(result, Err(StoreError::MissingVariable { .. })));
}

#[test]
fn mismatched_dimension_lengths_are_rejected() {
    let tmp = tempdir().unwrap();
    let (mut store, _) = DirStore::open(tmp.path().join("s")).unwrap();
    store
        .write(VAR_LAT, &[DIM_Y, DIM_X], grid(2, 2, 0.0).view())
        .unwrap();
    let result = store.write(VAR_LON, &[DIM_Y, DIM_X], grid(3, 2, 0.0).view());
    assert!(matches!(result, Err(StoreError::DimensionMismatch { .. })));

    let result = store.write(VAR_LON, &[DIM_Y], grid(2, 2, 0.0).view());
    assert!(matches!(result, Err(StoreError::DimensionCount { .. })));
}

#[test]
fn tailoring_narrows_reads_and_not_the_store() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("s");
    let (mut store, _) = DirStore::open(&path).unwrap();
    let full = grid(4, 5, 0.0);
    store.write(VAR_DEM, &[DIM_Y, DIM_X], full.view()).unwrap();
    let linke = Array3::from_shape_fn((12, 4, 5), |(m, r, c)| (m * 100 + r * 5 + c) as f32);
    store
        .write(VAR_LINKE, &[DIM_MONTHS, DIM_Y, DIM_X], linke.view().into_dyn())
        .unwrap();
    store.sync().unwrap();

    let tile = Tile::new(1..3, 2..5);
    let tailored = DirStore::open_existing(&path)
        .unwrap()
        .tailor(&tile, true)
        .unwrap();
    let var = tailored.variable(VAR_DEM).unwrap();
    assert_eq!(var.shape, vec![2, 3]);
    let dem = tailored.read(&var).unwrap();
    assert_abs_diff_eq!(dem, full.slice(s![1..3, 2..5]).to_owned().into_dyn());

    let linke_tile = tailored.read_variable(VAR_LINKE).unwrap();
    assert_eq!(linke_tile.shape(), &[12, 2, 3]);
    assert_abs_diff_eq!(linke_tile[[11, 0, 0]], 1100.0 + 7.0);

    // The full store is untouched.
    let untailored = DirStore::open_existing(&path).unwrap();
    assert_eq!(untailored.variable(VAR_DEM).unwrap().shape, vec![4, 5]);
}

#[test]
fn tailoring_a_tile_composes() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("s");
    let (mut store, _) = DirStore::open(&path).unwrap();
    let full = grid(6, 6, 0.0);
    store.write(VAR_DEM, &[DIM_Y, DIM_X], full.view()).unwrap();

    let store = store
        .tailor(&Tile::new(1..5, 1..5), false)
        .unwrap()
        .tailor(&Tile::new(1..3, 2..4), false)
        .unwrap();
    assert_eq!(store.window(), Some(&Tile::new(2..4, 3..5)));
    assert_abs_diff_eq!(
        store.read_variable(VAR_DEM).unwrap(),
        full.slice(s![2..4, 3..5]).to_owned().into_dyn()
    );
}

#[test]
fn tile_outside_of_grid_is_rejected() {
    let tmp = tempdir().unwrap();
    let (mut store, _) = DirStore::open(tmp.path().join("s")).unwrap();
    store
        .write(VAR_DEM, &[DIM_Y, DIM_X], grid(4, 4, 0.0).view())
        .unwrap();
    let result = store.tailor(&Tile::new(0..5, 0..2), true);
    assert!(matches!(result, Err(StoreError::TileOutOfBounds { .. })));
}

#[test]
fn read_only_tailored_handle_rejects_writes() {
    let tmp = tempdir().unwrap();
    let (mut store, _) = DirStore::open(tmp.path().join("s")).unwrap();
    store
        .write(VAR_DEM, &[DIM_Y, DIM_X], grid(4, 4, 0.0).view())
        .unwrap();
    let mut store = store.tailor(&Tile::new(0..2, 0..2), true).unwrap();
    let result = store.write(VAR_DEM, &[DIM_Y, DIM_X], grid(2, 2, 0.0).view());
    assert!(matches!(result, Err(StoreError::ReadOnly(_))));
}

#[test]
fn writable_tailored_handle_writes_only_its_window() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("s");
    let (mut store, _) = DirStore::open(&path).unwrap();
    store
        .write(VAR_DEM, &[DIM_Y, DIM_X], ArrayD::zeros(IxDyn(&[3, 3])).view())
        .unwrap();
    store.sync().unwrap();

    let mut tailored = DirStore::open_existing(&path)
        .unwrap()
        .tailor(&Tile::new(1..3, 1..2), false)
        .unwrap();
    tailored
        .write(VAR_DEM, &[DIM_Y, DIM_X], ArrayD::ones(IxDyn(&[2, 1])).view())
        .unwrap();
    tailored.sync().unwrap();

    let dem = DirStore::open_existing(&path)
        .unwrap()
        .read_variable(VAR_DEM)
        .unwrap();
    let expected = array![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, 0.0]].into_dyn();
    assert_abs_diff_eq!(dem, expected);

    // New variables can't be created through a window.
    let result = tailored.write(VAR_LAT, &[DIM_Y, DIM_X], ArrayD::ones(IxDyn(&[2, 1])).view());
    assert!(matches!(result, Err(StoreError::WindowedCreate(_))));
}

#[test]
fn aggregate_stacks_along_time() {
    let tmp = tempdir().unwrap();
    let mut paths = vec![];
    for i in 0..3 {
        let path = tmp.path().join(format!("goes13.2015.00{i}.nc"));
        let (mut store, _) = DirStore::open(&path).unwrap();
        store
            .write(
                VAR_DATA,
                &[DIM_TIME, DIM_Y, DIM_X],
                Array3::from_elem((1, 2, 2), i as f32).view().into_dyn(),
            )
            .unwrap();
        store
            .write(
                VAR_COUNTS_SHIFT,
                &[],
                ArrayD::from_elem(IxDyn(&[]), 32.0 + i as f32).view(),
            )
            .unwrap();
        store.sync().unwrap();
        paths.push(path);
    }

    let store = DirStore::aggregate(&paths, true).unwrap();
    let data = store.read_variable(VAR_DATA).unwrap();
    assert_eq!(data.shape(), &[3, 2, 2]);
    assert_abs_diff_eq!(data[[2, 1, 1]], 2.0);
    // Variables without a time dimension come from the first store.
    let shift = store.read_variable(VAR_COUNTS_SHIFT).unwrap();
    assert_eq!(shift.ndim(), 0);
    assert_abs_diff_eq!(shift[[]], 32.0);
}

#[test]
fn aggregate_of_missing_store_fails() {
    let tmp = tempdir().unwrap();
    let result = DirStore::aggregate(&[tmp.path().join("nope")], true);
    assert!(matches!(result, Err(StoreError::NotFound(_))));
    let result = DirStore::aggregate::<std::path::PathBuf>(&[], true);
    assert!(matches!(result, Err(StoreError::NoMembers)));
}

#[test]
fn closed_store_fails_everything() {
    let tmp = tempdir().unwrap();
    let (mut store, _) = DirStore::open(tmp.path().join("s")).unwrap();
    store.close().unwrap();
    assert!(matches!(store.variable(VAR_DEM), Err(StoreError::Closed(_))));
    assert!(matches!(store.sync(), Err(StoreError::Closed(_))));
    assert!(matches!(store.close(), Err(StoreError::Closed(_))));
}
