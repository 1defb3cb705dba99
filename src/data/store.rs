//! Shared in-memory mirror of a run's datasets.
//!
//! Every measurement lands here before it is persisted, so a monitor thread
//! can poll live data while the acquisition loop owns the storage backend.
//! Handles are cheap clones over the same interior; locking is per-access.

use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use ndarray::{ArrayD, Axis, IxDyn};

use crate::error::{ScanError, ScanResult};

/// NaN-prefilled named arrays, shared across threads.
#[derive(Clone, Default)]
pub struct DataStore {
    inner: Arc<RwLock<DataInner>>,
}

#[derive(Default)]
struct DataInner {
    datasets: IndexMap<String, ArrayD<f64>>,
}

impl DataStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DataInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DataInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `name` with `shape`, filled with NaN. Replaces any previous
    /// dataset of the same name.
    pub fn create(&self, name: &str, shape: &[usize]) {
        let array = ArrayD::from_elem(IxDyn(shape), f64::NAN);
        self.write().datasets.insert(name.to_string(), array);
    }

    /// Install a 1-D dataset holding `values` as-is.
    pub fn insert_axis(&self, name: &str, values: Vec<f64>) {
        let array = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values)
            .unwrap_or_else(|_| ArrayD::from_elem(IxDyn(&[0]), f64::NAN));
        self.write().datasets.insert(name.to_string(), array);
    }

    /// Names in creation order.
    pub fn names(&self) -> Vec<String> {
        self.read().datasets.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().datasets.contains_key(name)
    }

    /// Shape of `name`, if present.
    pub fn shape(&self, name: &str) -> Option<Vec<usize>> {
        self.read().datasets.get(name).map(|a| a.shape().to_vec())
    }

    /// Clone of a single dataset.
    pub fn snapshot(&self, name: &str) -> Option<ArrayD<f64>> {
        self.read().datasets.get(name).cloned()
    }

    /// Clone of every dataset, in creation order.
    pub fn snapshot_all(&self) -> IndexMap<String, ArrayD<f64>> {
        self.read().datasets.clone()
    }

    /// All values of `name` flattened in row-major order; empty when the
    /// dataset does not exist yet. Feeds samples to an optimizer.
    pub fn samples(&self, name: &str) -> Vec<f64> {
        self.read()
            .datasets
            .get(name)
            .map(|a| a.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Write one scalar at `index` (a full index into the dataset).
    pub fn write_scalar(&self, name: &str, index: &[usize], value: f64) -> ScanResult<()> {
        let mut guard = self.write();
        let array = dataset_mut(&mut guard, name)?;
        let mut view = array.view_mut();
        for (axis, &i) in index.iter().enumerate() {
            check_index(name, axis, i, view.shape())?;
            view.index_axis_inplace(Axis(0), i);
        }
        if view.ndim() != 0 {
            return Err(ScanError::Storage(format!(
                "dataset '{name}' needs {} indices, got {}",
                view.ndim() + index.len(),
                index.len()
            )));
        }
        view.fill(value);
        Ok(())
    }

    /// Write an array block at the point given by `index`; the block must
    /// match the dataset's trailing dimensions exactly.
    pub fn write_array(&self, name: &str, index: &[usize], values: &ArrayD<f64>) -> ScanResult<()> {
        let mut guard = self.write();
        let array = dataset_mut(&mut guard, name)?;
        let mut view = array.view_mut();
        for (axis, &i) in index.iter().enumerate() {
            check_index(name, axis, i, view.shape())?;
            view.index_axis_inplace(Axis(0), i);
        }
        if view.shape() != values.shape() {
            return Err(ScanError::Storage(format!(
                "dataset '{name}' slab is {:?}, reading is {:?}",
                view.shape(),
                values.shape()
            )));
        }
        view.assign(values);
        Ok(())
    }

    /// Read the scalar at `index`.
    pub fn read_scalar(&self, name: &str, index: &[usize]) -> ScanResult<f64> {
        let guard = self.read();
        let array = dataset(&guard, name)?;
        array
            .get(IxDyn(index))
            .copied()
            .ok_or_else(|| ScanError::Storage(format!("index {index:?} out of bounds in '{name}'")))
    }

    /// Clone the array block at the point given by `index`.
    pub fn read_array(&self, name: &str, index: &[usize]) -> ScanResult<ArrayD<f64>> {
        let guard = self.read();
        let array = dataset(&guard, name)?;
        let mut view = array.view();
        for (axis, &i) in index.iter().enumerate() {
            check_index(name, axis, i, view.shape())?;
            view.index_axis_inplace(Axis(0), i);
        }
        Ok(view.to_owned())
    }

    /// Append `extra` NaN-filled hyperslabs along axis 0.
    pub fn grow_axis0(&self, name: &str, extra: usize) -> ScanResult<()> {
        let mut guard = self.write();
        let array = dataset_mut(&mut guard, name)?;
        let mut slab_shape = array.shape().to_vec();
        if slab_shape.is_empty() {
            return Err(ScanError::Storage(format!(
                "dataset '{name}' is zero-dimensional, cannot grow"
            )));
        }
        slab_shape[0] = extra;
        let slab = ArrayD::from_elem(IxDyn(&slab_shape), f64::NAN);
        array
            .append(Axis(0), slab.view())
            .map_err(|e| ScanError::Storage(format!("growing dataset '{name}': {e}")))
    }

    /// Append one value to a 1-D dataset.
    pub fn push(&self, name: &str, value: f64) -> ScanResult<()> {
        let mut guard = self.write();
        let array = dataset_mut(&mut guard, name)?;
        let slab = ArrayD::from_elem(IxDyn(&[1]), value);
        array
            .append(Axis(0), slab.view())
            .map_err(|e| ScanError::Storage(format!("appending to dataset '{name}': {e}")))
    }

    /// Drop every dataset.
    pub fn clear(&self) {
        self.write().datasets.clear();
    }
}

fn dataset<'a>(guard: &'a DataInner, name: &str) -> ScanResult<&'a ArrayD<f64>> {
    guard
        .datasets
        .get(name)
        .ok_or_else(|| ScanError::Storage(format!("no dataset named '{name}'")))
}

fn dataset_mut<'a>(guard: &'a mut DataInner, name: &str) -> ScanResult<&'a mut ArrayD<f64>> {
    guard
        .datasets
        .get_mut(name)
        .ok_or_else(|| ScanError::Storage(format!("no dataset named '{name}'")))
}

fn check_index(name: &str, axis: usize, i: usize, shape: &[usize]) -> ScanResult<()> {
    match shape.first() {
        Some(&len) if i < len => Ok(()),
        _ => Err(ScanError::Storage(format!(
            "index {i} out of bounds on axis {axis} of '{name}'"
        ))),
    }
}
