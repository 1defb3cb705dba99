//! On-disk run containers.
//!
//! A run file holds NaN-prefilled float datasets plus string attributes
//! (JSON snapshots of the run description and device table). The
//! [`RunStorage`] trait is the engine's view of a container; the default
//! [`BinaryStore`] keeps the run in memory and rewrites the file atomically
//! on every flush, so a crash leaves the previous consistent state behind.
//! HDF5 output lives behind the `storage_hdf5` feature.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use ndarray::{ArrayD, ArrayViewMutD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ScanError, ScanResult};

/// File extension of the binary container format.
pub const BINARY_EXTENSION: &str = "rdat";
/// File extension of the HDF5 container format.
pub const HDF5_EXTENSION: &str = "h5";

pub(crate) const MAGIC: &[u8; 8] = b"LABSCAN\0";
pub(crate) const FORMAT_VERSION: u16 = 1;

/// Engine-facing view of an open run container.
///
/// Dataset shapes follow storage order: axis 0 is the slowest (outermost)
/// dimension and the only one that may grow. `maxshape` uses `None` for an
/// unlimited axis and `Some(cap)` for a fixed one.
pub trait RunStorage: Send {
    /// Create a NaN-filled dataset.
    fn create_dataset(
        &mut self,
        name: &str,
        shape: &[usize],
        maxshape: &[Option<usize>],
    ) -> ScanResult<()>;

    /// Write `block` at the point given by `index` (a prefix of the
    /// dataset's axes); the block must match the remaining axes exactly.
    /// An empty index with a full-shape block overwrites the whole dataset.
    fn write_region(&mut self, name: &str, index: &[usize], block: &ArrayD<f64>) -> ScanResult<()>;

    /// Resize a dataset along axis 0. New rows come up NaN.
    fn resize(&mut self, name: &str, new_shape: &[usize]) -> ScanResult<()>;

    /// Set a string attribute on the container root.
    fn put_attr(&mut self, key: &str, value: &str) -> ScanResult<()>;

    /// Persist everything written so far.
    fn flush(&mut self) -> ScanResult<()>;

    /// Path of the container file.
    fn path(&self) -> &Path;
}

/// Open a container for writing, picking the backend by name.
pub fn open_storage(backend: &str, path: &Path) -> ScanResult<Box<dyn RunStorage>> {
    match backend {
        "binary" => Ok(Box::new(BinaryStore::open(path))),
        #[cfg(feature = "storage_hdf5")]
        "hdf5" => Ok(Box::new(super::hdf5::Hdf5Store::open(path)?)),
        #[cfg(not(feature = "storage_hdf5"))]
        "hdf5" => Err(ScanError::FeatureNotEnabled("storage_hdf5".to_string())),
        other => Err(ScanError::Storage(format!(
            "unsupported storage backend '{other}'"
        ))),
    }
}

/// Serialized body of a binary container.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct RunFile {
    pub(crate) attrs: IndexMap<String, String>,
    pub(crate) datasets: IndexMap<String, StoredDataset>,
}

/// One dataset: row-major values plus its shape and growth limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredDataset {
    pub(crate) shape: Vec<usize>,
    pub(crate) maxshape: Vec<Option<usize>>,
    pub(crate) data: Vec<f64>,
}

impl StoredDataset {
    pub(crate) fn to_array(&self) -> ScanResult<ArrayD<f64>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone())
            .map_err(|e| ScanError::Storage(format!("malformed dataset: {e}")))
    }
}

/// Default container: the whole run serialized with bincode behind a magic
/// header, rewritten through a temp file and an atomic rename per flush.
///
/// Binary rather than JSON because datasets are NaN-prefilled and JSON has
/// no representation for NaN.
pub struct BinaryStore {
    path: PathBuf,
    file: RunFile,
}

impl BinaryStore {
    /// Stage a new container at `path`. Nothing touches the disk until the
    /// first [`flush`](RunStorage::flush).
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: RunFile::default(),
        }
    }

    fn dataset_mut(&mut self, name: &str) -> ScanResult<&mut StoredDataset> {
        self.file
            .datasets
            .get_mut(name)
            .ok_or_else(|| ScanError::Storage(format!("no dataset named '{name}'")))
    }
}

impl RunStorage for BinaryStore {
    fn create_dataset(
        &mut self,
        name: &str,
        shape: &[usize],
        maxshape: &[Option<usize>],
    ) -> ScanResult<()> {
        if maxshape.len() != shape.len() {
            return Err(ScanError::Storage(format!(
                "dataset '{name}': maxshape rank {} does not match shape rank {}",
                maxshape.len(),
                shape.len()
            )));
        }
        for (d, (&len, cap)) in shape.iter().zip(maxshape).enumerate() {
            if let Some(cap) = cap {
                if len > *cap {
                    return Err(ScanError::Storage(format!(
                        "dataset '{name}': axis {d} exceeds its limit ({len} > {cap})"
                    )));
                }
            }
        }
        let len = shape.iter().product();
        self.file.datasets.insert(
            name.to_string(),
            StoredDataset {
                shape: shape.to_vec(),
                maxshape: maxshape.to_vec(),
                data: vec![f64::NAN; len],
            },
        );
        Ok(())
    }

    fn write_region(&mut self, name: &str, index: &[usize], block: &ArrayD<f64>) -> ScanResult<()> {
        let dataset = self.dataset_mut(name)?;
        let mut view = ArrayViewMutD::from_shape(IxDyn(&dataset.shape), &mut dataset.data)
            .map_err(|e| ScanError::Storage(format!("malformed dataset '{name}': {e}")))?;
        for (axis, &i) in index.iter().enumerate() {
            match view.shape().first() {
                Some(&len) if i < len => view.index_axis_inplace(Axis(0), i),
                _ => {
                    return Err(ScanError::Storage(format!(
                        "index {i} out of bounds on axis {axis} of '{name}'"
                    )))
                }
            }
        }
        if view.shape() != block.shape() {
            return Err(ScanError::Storage(format!(
                "dataset '{name}' region is {:?}, block is {:?}",
                view.shape(),
                block.shape()
            )));
        }
        view.assign(block);
        Ok(())
    }

    fn resize(&mut self, name: &str, new_shape: &[usize]) -> ScanResult<()> {
        let dataset = self.dataset_mut(name)?;
        if new_shape.is_empty() || new_shape.len() != dataset.shape.len() {
            return Err(ScanError::Storage(format!(
                "dataset '{name}': resize cannot change rank"
            )));
        }
        if new_shape[1..] != dataset.shape[1..] {
            return Err(ScanError::Storage(format!(
                "dataset '{name}': only the first axis is resizable"
            )));
        }
        if dataset.maxshape.first().copied().flatten().is_some_and(|cap| new_shape[0] > cap) {
            return Err(ScanError::Storage(format!(
                "dataset '{name}': resize exceeds the axis 0 limit"
            )));
        }
        let new_len = new_shape.iter().product();
        dataset.data.resize(new_len, f64::NAN);
        dataset.shape = new_shape.to_vec();
        Ok(())
    }

    fn put_attr(&mut self, key: &str, value: &str) -> ScanResult<()> {
        self.file.attrs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn flush(&mut self) -> ScanResult<()> {
        let body = bincode::serialize(&self.file)?;
        let mut bytes = Vec::with_capacity(MAGIC.len() + 2 + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&body);

        let tmp = temp_sibling(&self.path);
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "flushed run file");
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Parse a binary container from disk.
pub(crate) fn read_run_file(path: &Path) -> ScanResult<RunFile> {
    let bytes = std::fs::read(path)?;
    let header_len = MAGIC.len() + 2;
    if bytes.len() < header_len || &bytes[..MAGIC.len()] != MAGIC {
        return Err(ScanError::Storage(format!(
            "{} is not a run file",
            path.display()
        )));
    }
    let version = u16::from_le_bytes([bytes[MAGIC.len()], bytes[MAGIC.len() + 1]]);
    if version != FORMAT_VERSION {
        return Err(ScanError::Storage(format!(
            "{} has unsupported format version {version}",
            path.display()
        )));
    }
    Ok(bincode::deserialize(&bytes[header_len..])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(shape: &[usize], values: Vec<f64>) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
    }

    #[test]
    fn round_trips_datasets_and_attrs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.rdat");

        let mut store = BinaryStore::open(&path);
        store.put_attr("runinfo", "{\"dims\":[2,2]}").unwrap();
        store
            .create_dataset("signal", &[2, 2], &[Some(2), Some(2)])
            .unwrap();
        store
            .write_region("signal", &[1], &block(&[2], vec![3.0, 4.0]))
            .unwrap();
        store.flush().unwrap();

        let file = read_run_file(&path).unwrap();
        assert_eq!(file.attrs["runinfo"], "{\"dims\":[2,2]}");
        let signal = file.datasets["signal"].to_array().unwrap();
        assert!(signal[[0, 0]].is_nan());
        assert_eq!(signal[[1, 0]], 3.0);
        assert_eq!(signal[[1, 1]], 4.0);
    }

    #[test]
    fn flush_replaces_the_previous_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.rdat");

        let mut store = BinaryStore::open(&path);
        store.create_dataset("x", &[1], &[Some(1)]).unwrap();
        store.flush().unwrap();
        store.write_region("x", &[0], &block(&[], vec![9.0])).unwrap();
        store.flush().unwrap();

        let file = read_run_file(&path).unwrap();
        assert_eq!(file.datasets["x"].to_array().unwrap()[[0]], 9.0);
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn resize_grows_only_the_first_axis() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = BinaryStore::open(&tmp.path().join("run.rdat"));
        store
            .create_dataset("signal", &[1, 3], &[None, Some(3)])
            .unwrap();
        store
            .write_region("signal", &[0], &block(&[3], vec![1.0, 2.0, 3.0]))
            .unwrap();

        store.resize("signal", &[2, 3]).unwrap();
        assert!(store.resize("signal", &[2, 4]).is_err());

        let array = store.file.datasets["signal"].to_array().unwrap();
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array[[0, 2]], 3.0);
        assert!(array[[1, 0]].is_nan());
    }

    #[test]
    fn bounded_axes_refuse_to_grow() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = BinaryStore::open(&tmp.path().join("run.rdat"));
        store.create_dataset("signal", &[2], &[Some(2)]).unwrap();
        assert!(store.resize("signal", &[3]).is_err());
    }

    #[test]
    fn region_writes_are_shape_checked() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = BinaryStore::open(&tmp.path().join("run.rdat"));
        store
            .create_dataset("signal", &[2, 3], &[Some(2), Some(3)])
            .unwrap();
        let wrong = block(&[2], vec![1.0, 2.0]);
        assert!(store.write_region("signal", &[0], &wrong).is_err());
        assert!(store.write_region("missing", &[0], &wrong).is_err());
        assert!(store
            .write_region("signal", &[2], &block(&[3], vec![1.0, 2.0, 3.0]))
            .is_err());
    }

    #[test]
    fn junk_files_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("junk.rdat");
        std::fs::write(&path, b"not a run file at all").unwrap();
        assert!(read_run_file(&path).is_err());
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn hdf5_backend_requires_the_feature() {
        let tmp = tempfile::tempdir().unwrap();
        // The Ok side is a trait object without Debug, so take the error out
        // through Option instead of unwrap_err.
        let err = open_storage("hdf5", &tmp.path().join("run.h5")).err();
        assert!(matches!(err, Some(ScanError::FeatureNotEnabled(_))));
    }

    #[test]
    fn unknown_backends_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(open_storage("parquet", &tmp.path().join("run.x")).is_err());
    }
}
