//! HDF5 run container, for analysis stacks that read `.h5` natively.
//!
//! Mirrors the binary container's semantics: NaN fill values, axis 0 as the
//! only growable dimension, JSON string attributes on the file root. Only
//! compiled with the `storage_hdf5` feature, which needs a native libhdf5.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use hdf5::types::VarLenUnicode;
use hdf5::{Extent, Extents, SliceOrIndex};
use ndarray::ArrayD;
use tracing::debug;

use super::container::RunStorage;
use crate::error::{ScanError, ScanResult};

fn h5err(context: &str, err: hdf5::Error) -> ScanError {
    ScanError::Storage(format!("{context}: {err}"))
}

/// Run container backed by an open HDF5 file.
pub struct Hdf5Store {
    path: PathBuf,
    file: hdf5::File,
    datasets: HashMap<String, hdf5::Dataset>,
}

impl Hdf5Store {
    /// Create the file at `path`, truncating any previous one.
    pub fn open(path: &Path) -> ScanResult<Self> {
        let file = hdf5::File::create(path).map_err(|e| h5err("creating hdf5 file", e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            datasets: HashMap::new(),
        })
    }

    fn dataset(&self, name: &str) -> ScanResult<&hdf5::Dataset> {
        self.datasets
            .get(name)
            .ok_or_else(|| ScanError::Storage(format!("no dataset named '{name}'")))
    }
}

impl RunStorage for Hdf5Store {
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
        let extents: Vec<Extent> = shape
            .iter()
            .zip(maxshape)
            .map(|(&len, max)| Extent::from((len, *max)))
            .collect();
        let resizable = maxshape.iter().any(Option::is_none);

        let mut builder = self.file.new_dataset::<f64>().fill_value(f64::NAN);
        if resizable {
            // Growable datasets must be chunked; one outermost slab per chunk.
            let mut chunk = shape.to_vec();
            chunk[0] = 1;
            builder = builder.chunk(chunk);
        }
        let dataset = builder
            .shape(Extents::from(extents))
            .create(name)
            .map_err(|e| h5err("creating dataset", e))?;
        self.datasets.insert(name.to_string(), dataset);
        Ok(())
    }

    fn write_region(&mut self, name: &str, index: &[usize], block: &ArrayD<f64>) -> ScanResult<()> {
        let dataset = self.dataset(name)?;
        if index.is_empty() {
            return dataset.write(block).map_err(|e| h5err("writing dataset", e));
        }
        let ndim = dataset.ndim();
        let mut selection: Vec<SliceOrIndex> = Vec::with_capacity(ndim);
        for &i in index {
            selection.push(SliceOrIndex::from(i));
        }
        for _ in index.len()..ndim {
            selection.push(SliceOrIndex::from(..));
        }
        dataset
            .write_slice(block, hdf5::Hyperslab::from(selection))
            .map_err(|e| h5err("writing region", e))
    }

    fn resize(&mut self, name: &str, new_shape: &[usize]) -> ScanResult<()> {
        let dataset = self.dataset(name)?;
        dataset
            .resize(new_shape.to_vec())
            .map_err(|e| h5err("resizing dataset", e))
    }

    fn put_attr(&mut self, key: &str, value: &str) -> ScanResult<()> {
        let text: VarLenUnicode = value
            .parse()
            .map_err(|e| ScanError::Storage(format!("attribute '{key}': {e}")))?;
        let attr = match self.file.attr(key) {
            Ok(attr) => attr,
            Err(_) => self
                .file
                .new_attr::<VarLenUnicode>()
                .create(key)
                .map_err(|e| h5err("creating attribute", e))?,
        };
        attr.write_scalar(&text)
            .map_err(|e| h5err("writing attribute", e))
    }

    fn flush(&mut self) -> ScanResult<()> {
        self.file.flush().map_err(|e| h5err("flushing hdf5 file", e))?;
        debug!(path = %self.path.display(), "flushed hdf5 file");
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every dataset and string attribute back from an HDF5 run file.
pub(crate) fn read_h5(
    path: &Path,
) -> ScanResult<(
    indexmap::IndexMap<String, ArrayD<f64>>,
    indexmap::IndexMap<String, String>,
)> {
    let file = hdf5::File::open(path).map_err(|e| h5err("opening hdf5 file", e))?;

    let mut datasets = indexmap::IndexMap::new();
    for name in file.member_names().map_err(|e| h5err("listing datasets", e))? {
        let dataset = file.dataset(&name).map_err(|e| h5err("opening dataset", e))?;
        let array = dataset
            .read_dyn::<f64>()
            .map_err(|e| h5err("reading dataset", e))?;
        datasets.insert(name, array);
    }

    let mut attrs = indexmap::IndexMap::new();
    for name in file.attr_names().map_err(|e| h5err("listing attributes", e))? {
        let attr = file.attr(&name).map_err(|e| h5err("opening attribute", e))?;
        let text = attr
            .read_scalar::<VarLenUnicode>()
            .map_err(|e| h5err("reading attribute", e))?;
        attrs.insert(name, text.to_string());
    }
    Ok((datasets, attrs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn writes_grows_and_reads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.h5");

        let mut store = Hdf5Store::open(&path).unwrap();
        store
            .create_dataset("signal", &[1, 2], &[None, Some(2)])
            .unwrap();
        let row = ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0, 2.0]).unwrap();
        store.write_region("signal", &[0], &row).unwrap();
        store.resize("signal", &[2, 2]).unwrap();
        store.put_attr("runinfo", "{}").unwrap();
        store.flush().unwrap();
        drop(store);

        let (datasets, attrs) = read_h5(&path).unwrap();
        let signal = &datasets["signal"];
        assert_eq!(signal.shape(), &[2, 2]);
        assert_eq!(signal[[0, 1]], 2.0);
        assert!(signal[[1, 0]].is_nan());
        assert_eq!(attrs["runinfo"], "{}");
    }
}
