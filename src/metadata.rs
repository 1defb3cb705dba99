//! Serializable run snapshots, stored as attributes of the output file.
//!
//! A [`RunRecord`] freezes the run description (scan stack geometry,
//! identity, completion) and a [`DeviceRecord`] freezes each instrument's
//! property table and last-seen values. Both are written as JSON attributes
//! next to the datasets, so a loaded file explains itself without the code
//! that produced it.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instrument::{Access, DeviceRegistry, Instrument, ReturnKind, Validation};
use crate::runinfo::{Completion, RunInfo};
use crate::scan::ScanKind;

/// Attribute key holding the serialized [`RunRecord`].
pub const RUNINFO_ATTR: &str = "runinfo";
/// Attribute key holding the serialized device table.
pub const DEVICES_ATTR: &str = "devices";

/// Frozen run description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub measure_name: String,
    pub run_id: Option<Uuid>,
    pub started: Option<DateTime<Local>>,
    pub ended: Option<DateTime<Local>>,
    /// Pre-run pause in seconds.
    pub initial_pause_s: f64,
    /// Axis lengths, innermost first.
    pub dims: Vec<usize>,
    /// Measurement dataset names, in creation order.
    pub measured: Vec<String>,
    pub complete: Completion,
    pub scans: Vec<ScanRecord>,
    pub software_version: String,
}

impl RunRecord {
    /// Snapshot `runinfo` as it stands right now.
    pub fn from_runinfo(runinfo: &RunInfo) -> Self {
        Self {
            measure_name: runinfo.name().to_string(),
            run_id: runinfo.run_id(),
            started: runinfo.started(),
            ended: runinfo.ended(),
            initial_pause_s: runinfo.pause().as_secs_f64(),
            dims: runinfo.dims(),
            measured: runinfo.measured().to_vec(),
            complete: runinfo.completion(),
            scans: runinfo.scans().iter().map(ScanRecord::from_scan).collect(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One scan of the stack, innermost first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub kind: ScanKind,
    pub n: usize,
    pub i: usize,
    /// Settling time in seconds.
    pub dt_s: f64,
    /// Axis names this scan contributes.
    pub axes: Vec<String>,
}

impl ScanRecord {
    fn from_scan(scan: &crate::scan::Scan) -> Self {
        Self {
            kind: scan.kind(),
            n: scan.n(),
            i: scan.i(),
            dt_s: scan.dt().as_secs_f64(),
            axes: scan.scan_axes().keys().cloned().collect(),
        }
    }
}

/// Frozen instrument state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub resource: String,
    pub properties: IndexMap<String, PropertyRecord>,
    /// Last value seen per property, sorted by name.
    pub values: BTreeMap<String, crate::instrument::PropertyValue>,
}

impl DeviceRecord {
    pub fn from_instrument(instrument: &Instrument) -> Self {
        let properties = instrument
            .properties()
            .map(|d| (d.name().to_string(), PropertyRecord::from_descriptor(d)))
            .collect();
        let values = instrument
            .cached_values()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            resource: instrument.resource().to_string(),
            properties,
            values,
        }
    }
}

/// Descriptor summary: direction, coercion and validation mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub access: Access,
    pub returns: ReturnKind,
    pub mode: String,
}

impl PropertyRecord {
    fn from_descriptor(descriptor: &crate::instrument::PropertyDescriptor) -> Self {
        let mode = match descriptor.mode().ok() {
            Some(Validation::Values(_)) => "values",
            Some(Validation::Range { .. }) => "range",
            Some(Validation::IndexedValues(_)) => "indexed_values",
            Some(Validation::DictValues(_)) => "dict_values",
            None => "none",
        };
        Self {
            access: descriptor.access(),
            returns: descriptor.return_kind(),
            mode: mode.to_string(),
        }
    }
}

/// Snapshot every registered instrument, in registration order.
pub fn device_records(devices: &DeviceRegistry) -> IndexMap<String, DeviceRecord> {
    devices
        .iter()
        .map(|(name, instrument)| (name.to_string(), DeviceRecord::from_instrument(instrument)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::config::Settings;
    use crate::drivers::sim_voltage_source;
    use crate::scan::PropertyScan;
    use std::time::Duration;

    #[test]
    fn run_record_captures_geometry_and_state() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.storage.data_dir = tmp.path().to_path_buf();

        let mut runinfo = RunInfo::new()
            .measure_name("sweep")
            .scan(PropertyScan::new("v1", "voltage", vec![0.0, 1.0, 2.0], Duration::ZERO).unwrap());
        runinfo.check(&settings).unwrap();

        let record = RunRecord::from_runinfo(&runinfo);
        assert_eq!(record.measure_name, "sweep");
        assert_eq!(record.dims, vec![3]);
        assert_eq!(record.scans.len(), 1);
        assert_eq!(record.scans[0].kind, ScanKind::Property);
        assert_eq!(record.scans[0].axes, vec!["v1_voltage"]);
        assert!(record.run_id.is_some());

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"complete\":false"));
        let back: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dims, vec![3]);
        assert_eq!(back.complete, Completion::Pending);
    }

    #[test]
    fn device_records_list_properties_and_values() {
        let mut devices = DeviceRegistry::new();
        devices.add("v1", sim_voltage_source(MockChannel::new("v1")).unwrap());

        let records = device_records(&devices);
        let v1 = &records["v1"];
        assert_eq!(v1.resource, "mock://v1");
        assert_eq!(v1.properties["voltage"].mode, "range");
        assert_eq!(v1.properties["attenuation"].mode, "indexed_values");
        // The driver applies power-on defaults, so values are populated.
        assert!(v1.values.contains_key("voltage"));

        let json = serde_json::to_string(&records).unwrap();
        let back: IndexMap<String, DeviceRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(back["v1"].resource, "mock://v1");
    }
}
