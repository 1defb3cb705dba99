//! Run description: the scan stack and everything derived from it.
//!
//! A [`RunInfo`] collects scans innermost first (index 0 moves fastest) and
//! derives the acquisition geometry from them. Before a run starts it goes
//! through [`RunInfo::check`], which validates the stack, resets per-run
//! state and stamps identity (run id, start time, output path).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::info;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ScanError, ScanResult};
use crate::scan::Scan;

/// How a run ended. Serialized as `false` while pending, `true` when every
/// point was measured, and the string `"stopped"` after an external stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    #[default]
    Pending,
    Complete,
    Stopped,
}

impl Serialize for Completion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Completion::Pending => serializer.serialize_bool(false),
            Completion::Complete => serializer.serialize_bool(true),
            Completion::Stopped => serializer.serialize_str("stopped"),
        }
    }
}

impl<'de> Deserialize<'de> for Completion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CompletionVisitor;

        impl Visitor<'_> for CompletionVisitor {
            type Value = Completion;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a bool or the string \"stopped\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Completion, E> {
                Ok(if v {
                    Completion::Complete
                } else {
                    Completion::Pending
                })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Completion, E> {
                if v == "stopped" {
                    Ok(Completion::Stopped)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(CompletionVisitor)
    }
}

/// Scan stack plus derived geometry and per-run bookkeeping.
#[derive(Debug)]
pub struct RunInfo {
    scans: Vec<Scan>,
    measure_name: String,
    initial_pause: Option<Duration>,
    measured: Vec<String>,
    file_path: Option<PathBuf>,
    run_id: Option<Uuid>,
    started: Option<DateTime<Local>>,
    ended: Option<DateTime<Local>>,
    completion: Completion,
}

impl Default for RunInfo {
    fn default() -> Self {
        Self {
            scans: Vec::new(),
            measure_name: "measure".to_string(),
            initial_pause: None,
            measured: Vec::new(),
            file_path: None,
            run_id: None,
            started: None,
            ended: None,
            completion: Completion::Pending,
        }
    }
}

impl RunInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scan one level further out than the previous one.
    #[must_use]
    pub fn scan(mut self, scan: impl Into<Scan>) -> Self {
        self.scans.push(scan.into());
        self
    }

    /// Name recorded for the measure function in the run metadata.
    #[must_use]
    pub fn measure_name(mut self, name: impl Into<String>) -> Self {
        self.measure_name = name.into();
        self
    }

    /// Pause once before the first point, overriding the configured default.
    #[must_use]
    pub fn initial_pause(mut self, pause: Duration) -> Self {
        self.initial_pause = Some(pause);
        self
    }

    pub fn scans(&self) -> &[Scan] {
        &self.scans
    }

    pub(crate) fn scans_mut(&mut self) -> &mut [Scan] {
        &mut self.scans
    }

    pub fn name(&self) -> &str {
        &self.measure_name
    }

    /// Resolved pre-run pause; zero until [`check`](Self::check) fills in
    /// the configured default.
    pub fn pause(&self) -> Duration {
        self.initial_pause.unwrap_or(Duration::ZERO)
    }

    /// Measurement dataset names, in the order the measure function
    /// produced them. Empty until the first point.
    pub fn measured(&self) -> &[String] {
        &self.measured
    }

    pub(crate) fn set_measured(&mut self, names: Vec<String>) {
        self.measured = names;
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    pub fn started(&self) -> Option<DateTime<Local>> {
        self.started
    }

    pub fn ended(&self) -> Option<DateTime<Local>> {
        self.ended
    }

    pub(crate) fn set_ended(&mut self, at: DateTime<Local>) {
        self.ended = Some(at);
    }

    pub fn completion(&self) -> Completion {
        self.completion
    }

    pub(crate) fn set_completion(&mut self, completion: Completion) {
        self.completion = completion;
    }

    /// Number of scan dimensions.
    pub fn ndim(&self) -> usize {
        self.scans.len()
    }

    /// Axis lengths, innermost first.
    pub fn dims(&self) -> Vec<usize> {
        self.scans.iter().map(Scan::n).collect()
    }

    /// Current index along each axis, innermost first.
    pub fn indices(&self) -> Vec<usize> {
        self.scans.iter().map(Scan::i).collect()
    }

    /// Position of the averaging scan in the stack, if any.
    pub fn average_index(&self) -> Option<usize> {
        self.scans.iter().position(Scan::is_average)
    }

    /// Axis lengths with the averaged dimension folded out.
    pub fn average_dims(&self) -> Vec<usize> {
        match self.average_index() {
            Some(k) => {
                let mut dims = self.dims();
                dims.remove(k);
                dims
            }
            None => self.dims(),
        }
    }

    /// Current indices with the averaged dimension folded out.
    pub fn average_indices(&self) -> Vec<usize> {
        match self.average_index() {
            Some(k) => {
                let mut idx = self.indices();
                idx.remove(k);
                idx
            }
            None => self.indices(),
        }
    }

    pub fn has_average_scan(&self) -> bool {
        self.average_index().is_some()
    }

    pub fn continuous_index(&self) -> Option<usize> {
        self.scans
            .iter()
            .position(|s| matches!(s, Scan::Continuous(_)))
    }

    pub fn optimize_index(&self) -> Option<usize> {
        self.scans
            .iter()
            .position(|s| matches!(s, Scan::Optimize(_)))
    }

    pub fn has_continuous_scan(&self) -> bool {
        self.continuous_index().is_some()
    }

    pub fn has_optimize_scan(&self) -> bool {
        self.optimize_index().is_some()
    }

    /// Position of the scan whose axis grows while the run is live.
    pub fn resizing_index(&self) -> Option<usize> {
        self.scans.iter().position(Scan::is_resizing)
    }

    pub fn has_resizing_data(&self) -> bool {
        self.resizing_index().is_some()
    }

    /// True when the run keeps acquiring until something stops it.
    pub fn continuous_expt(&self) -> bool {
        self.has_resizing_data()
    }

    /// Every scan axis, innermost first, in declaration order within each
    /// scan.
    pub fn all_axes(&self) -> IndexMap<String, Vec<f64>> {
        let mut axes = IndexMap::new();
        for scan in &self.scans {
            axes.extend(scan.scan_axes());
        }
        axes
    }

    pub(crate) fn raster_flags(&self) -> Vec<bool> {
        self.scans.iter().map(Scan::raster_enabled).collect()
    }

    /// Validate the scan stack and stamp per-run identity.
    ///
    /// Rejects empty stacks, duplicate actuation targets, duplicate axis
    /// names, more than one averaging or resizing scan, and a resizing scan
    /// anywhere but the outermost slot. On success, resets every scan index,
    /// clears the measured list, assigns a fresh run id and a collision-free
    /// output path under the configured data directory.
    pub fn check(&mut self, settings: &Settings) -> ScanResult<()> {
        if self.scans.is_empty() {
            return Err(ScanError::RunInfo("a run needs at least one scan".into()));
        }
        if self.dims().contains(&0) {
            return Err(ScanError::RunInfo("every scan needs at least one point".into()));
        }

        let mut actuated: Vec<(String, String)> = Vec::new();
        for scan in &self.scans {
            for pair in scan.actuated() {
                if actuated.contains(&pair) {
                    return Err(ScanError::RunInfo(format!(
                        "{}.{} is actuated by more than one scan",
                        pair.0, pair.1
                    )));
                }
                actuated.push(pair);
            }
        }

        let mut axis_names: Vec<String> = Vec::new();
        for scan in &self.scans {
            for name in scan.scan_axes().keys() {
                if axis_names.iter().any(|n| n == name) {
                    return Err(ScanError::RunInfo(format!(
                        "axis name '{name}' appears in more than one scan"
                    )));
                }
                axis_names.push(name.clone());
            }
        }

        let averages = self.scans.iter().filter(|s| s.is_average()).count();
        if averages > 1 {
            return Err(ScanError::RunInfo(
                "at most one average scan per run".into(),
            ));
        }
        let resizing = self.scans.iter().filter(|s| s.is_resizing()).count();
        if resizing > 1 {
            return Err(ScanError::RunInfo(
                "at most one continuous or optimize scan per run".into(),
            ));
        }
        if let Some(k) = self.resizing_index() {
            if k != self.scans.len() - 1 {
                return Err(ScanError::RunInfo(format!(
                    "the {} scan must be outermost",
                    self.scans[k].kind()
                )));
            }
        }

        for scan in &mut self.scans {
            scan.reset();
        }
        self.measured.clear();
        self.completion = Completion::Pending;
        self.ended = None;

        if self.initial_pause.is_none() {
            self.initial_pause = Some(settings.run.initial_pause);
        }

        let started = Local::now();
        let path = output_path(settings, &started)?;
        info!(path = %path.display(), dims = ?self.dims(), "run checked");
        self.started = Some(started);
        self.run_id = Some(Uuid::new_v4());
        self.file_path = Some(path);
        Ok(())
    }
}

/// Timestamped output file under the data directory, suffixed `-1`, `-2`
/// and so on when a file from the same second already exists.
fn output_path(settings: &Settings, started: &DateTime<Local>) -> ScanResult<PathBuf> {
    let dir = &settings.storage.data_dir;
    std::fs::create_dir_all(dir)?;

    let stem = started.format("%Y%m%dT%H%M%S").to_string();
    let ext = match settings.storage.backend.as_str() {
        "hdf5" => "h5",
        _ => "rdat",
    };

    let mut path = dir.join(format!("{stem}.{ext}"));
    let mut suffix = 1u32;
    while path.exists() {
        path = dir.join(format!("{stem}-{suffix}.{ext}"));
        suffix += 1;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{AverageScan, ContinuousScan, PropertyScan, RepeatScan};

    fn sweep(device: &str, n: usize) -> PropertyScan {
        let values = (0..n).map(|k| k as f64).collect();
        PropertyScan::new(device, "voltage", values, Duration::ZERO).unwrap()
    }

    fn test_settings(dir: &std::path::Path) -> Settings {
        let mut settings = Settings::default();
        settings.storage.data_dir = dir.to_path_buf();
        settings
    }

    #[test]
    fn geometry_is_innermost_first() {
        let runinfo = RunInfo::new()
            .scan(sweep("v1", 3))
            .scan(RepeatScan::new(4, Duration::ZERO).unwrap());
        assert_eq!(runinfo.ndim(), 2);
        assert_eq!(runinfo.dims(), vec![3, 4]);
        assert_eq!(runinfo.indices(), vec![0, 0]);
        let axes = runinfo.all_axes();
        assert_eq!(
            axes.keys().collect::<Vec<_>>(),
            vec!["v1_voltage", "repeat"]
        );
    }

    #[test]
    fn average_dims_fold_out_the_averaged_axis() {
        let runinfo = RunInfo::new()
            .scan(sweep("v1", 2))
            .scan(AverageScan::new(5, Duration::ZERO).unwrap());
        assert_eq!(runinfo.average_index(), Some(1));
        assert_eq!(runinfo.dims(), vec![2, 5]);
        assert_eq!(runinfo.average_dims(), vec![2]);
        assert_eq!(runinfo.average_indices(), vec![0]);
    }

    #[test]
    fn check_rejects_bad_stacks() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = test_settings(tmp.path());

        let mut empty = RunInfo::new();
        assert!(empty.check(&settings).is_err());

        let mut duplicate = RunInfo::new().scan(sweep("v1", 2)).scan(sweep("v1", 3));
        assert!(duplicate.check(&settings).is_err());

        let mut two_averages = RunInfo::new()
            .scan(AverageScan::new(2, Duration::ZERO).unwrap())
            .scan(AverageScan::new(2, Duration::ZERO).unwrap());
        assert!(two_averages.check(&settings).is_err());

        let mut inner_continuous = RunInfo::new()
            .scan(ContinuousScan::new(None, Duration::ZERO).unwrap())
            .scan(sweep("v1", 2));
        assert!(inner_continuous.check(&settings).is_err());
    }

    #[test]
    fn check_stamps_identity_and_resets_state() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = test_settings(tmp.path());

        let mut runinfo = RunInfo::new().scan(sweep("v1", 2));
        runinfo.scans_mut()[0].set_i(1);
        runinfo.set_measured(vec!["stale".to_string()]);
        runinfo.set_completion(Completion::Complete);

        runinfo.check(&settings).unwrap();
        assert_eq!(runinfo.indices(), vec![0]);
        assert!(runinfo.measured().is_empty());
        assert_eq!(runinfo.completion(), Completion::Pending);
        assert!(runinfo.run_id().is_some());
        assert!(runinfo.started().is_some());

        let path = runinfo.file_path().unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("rdat"));
        assert!(path.starts_with(tmp.path()));
    }

    #[test]
    fn colliding_file_names_get_a_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = test_settings(tmp.path());

        let mut first = RunInfo::new().scan(sweep("v1", 2));
        first.check(&settings).unwrap();
        let first_path = first.file_path().unwrap().to_path_buf();
        std::fs::write(&first_path, b"").unwrap();

        // Same second: the stem collides and picks up a numeric suffix.
        let mut second = RunInfo::new().scan(sweep("v1", 2));
        second.check(&settings).unwrap();
        let second_path = second.file_path().unwrap();
        if second_path.file_stem() == first_path.file_stem() {
            panic!("collision not resolved: {}", second_path.display());
        }
    }

    #[test]
    fn completion_round_trips_through_its_wire_forms() {
        assert_eq!(serde_json::to_string(&Completion::Pending).unwrap(), "false");
        assert_eq!(serde_json::to_string(&Completion::Complete).unwrap(), "true");
        assert_eq!(
            serde_json::to_string(&Completion::Stopped).unwrap(),
            "\"stopped\""
        );
        let back: Completion = serde_json::from_str("\"stopped\"").unwrap();
        assert_eq!(back, Completion::Stopped);
        let back: Completion = serde_json::from_str("true").unwrap();
        assert_eq!(back, Completion::Complete);
    }
}
