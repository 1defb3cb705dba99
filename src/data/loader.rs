//! Read a finished (or interrupted) run back from disk.
//!
//! Loading never touches instruments or configuration; a run file carries
//! everything needed to interpret it. The backend is picked by file
//! extension.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use ndarray::ArrayD;
use tracing::info;

use super::container::{read_run_file, BINARY_EXTENSION, HDF5_EXTENSION};
use crate::error::{ScanError, ScanResult};
use crate::metadata::{DeviceRecord, RunRecord, DEVICES_ATTR, RUNINFO_ATTR};
use crate::runinfo::Completion;

/// A run read back from disk: datasets plus the frozen metadata.
#[derive(Debug)]
pub struct LoadedRun {
    path: PathBuf,
    datasets: IndexMap<String, ArrayD<f64>>,
    attrs: IndexMap<String, String>,
    runinfo: Option<RunRecord>,
    devices: Option<IndexMap<String, DeviceRecord>>,
}

impl LoadedRun {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dataset(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.datasets.get(name)
    }

    /// All datasets, in the order they were created.
    pub fn datasets(&self) -> &IndexMap<String, ArrayD<f64>> {
        &self.datasets
    }

    /// Raw attribute text by key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// All raw attributes.
    pub fn attrs(&self) -> &IndexMap<String, String> {
        &self.attrs
    }

    /// Names of the measured datasets (excluding axes), per the run
    /// description; empty if the file has none.
    pub fn measured_names(&self) -> Vec<String> {
        self.runinfo
            .as_ref()
            .map(|r| r.measured.clone())
            .unwrap_or_default()
    }

    /// The frozen run description, when the file carries one.
    pub fn runinfo(&self) -> Option<&RunRecord> {
        self.runinfo.as_ref()
    }

    /// The frozen device table, when the file carries one.
    pub fn devices(&self) -> Option<&IndexMap<String, DeviceRecord>> {
        self.devices.as_ref()
    }

    /// How the run ended; pending if the file has no run description.
    pub fn completion(&self) -> Completion {
        self.runinfo.as_ref().map_or(Completion::Pending, |r| r.complete)
    }
}

/// Load a run file, picking the backend from the extension.
pub fn load(path: &Path) -> ScanResult<LoadedRun> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let (datasets, attrs) = match extension {
        BINARY_EXTENSION => {
            let file = read_run_file(path)?;
            let mut datasets = IndexMap::new();
            for (name, stored) in &file.datasets {
                datasets.insert(name.clone(), stored.to_array()?);
            }
            (datasets, file.attrs)
        }
        #[cfg(feature = "storage_hdf5")]
        HDF5_EXTENSION => super::hdf5::read_h5(path)?,
        #[cfg(not(feature = "storage_hdf5"))]
        HDF5_EXTENSION => {
            return Err(ScanError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
        other => {
            return Err(ScanError::Storage(format!(
                "unrecognized run file extension '{other}'"
            )))
        }
    };

    let runinfo = attrs
        .get(RUNINFO_ATTR)
        .map(|text| serde_json::from_str::<RunRecord>(text))
        .transpose()?;
    let devices = attrs
        .get(DEVICES_ATTR)
        .map(|text| serde_json::from_str::<IndexMap<String, DeviceRecord>>(text))
        .transpose()?;

    info!(
        path = %path.display(),
        datasets = datasets.len(),
        "loaded run file"
    );
    Ok(LoadedRun {
        path: path.to_path_buf(),
        datasets,
        attrs,
        runinfo,
        devices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::container::{BinaryStore, RunStorage};
    use ndarray::IxDyn;

    #[test]
    fn loads_datasets_and_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.rdat");

        let mut store = BinaryStore::open(&path);
        store
            .create_dataset("v1_voltage", &[3], &[Some(3)])
            .unwrap();
        let axis = ArrayD::from_shape_vec(IxDyn(&[3]), vec![0.0, 1.0, 2.0]).unwrap();
        store.write_region("v1_voltage", &[], &axis).unwrap();
        store
            .put_attr(
                RUNINFO_ATTR,
                r#"{"measure_name":"sweep","run_id":null,"started":null,"ended":null,
                   "initial_pause_s":0.0,"dims":[3],"measured":["signal"],
                   "complete":true,"scans":[],"software_version":"0.1.0"}"#,
            )
            .unwrap();
        store.flush().unwrap();

        let run = load(&path).unwrap();
        assert_eq!(run.dataset("v1_voltage").unwrap().shape(), &[3]);
        let record = run.runinfo().unwrap();
        assert_eq!(record.measure_name, "sweep");
        assert_eq!(record.measured, vec!["signal"]);
        assert_eq!(run.completion(), Completion::Complete);
        assert!(run.devices().is_none());
    }

    #[test]
    fn rejects_unknown_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.csv");
        std::fs::write(&path, b"a,b\n").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn missing_files_error_cleanly() {
        let err = load(Path::new("/nonexistent/run.rdat")).unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
    }
}
