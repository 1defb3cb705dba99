//! The acquisition engine: drives the scan stack, measures, persists.
//!
//! An [`Experiment`] glues together a [`DeviceRegistry`], a [`RunInfo`] and a
//! measure closure. [`run`](Experiment::run) walks the acquisition grid
//! point by point: outer scans fire their side effects before inner ones,
//! the measure closure produces named [`Readings`], and every point is
//! persisted before the next one starts, so the output file is always one
//! flush behind reality at worst. [`spawn`](Experiment::spawn) moves the
//! whole thing onto a worker thread and hands back a monitor for live
//! polling and cooperative stopping.

mod sweep;
pub use sweep::SweepIter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::anyhow;
use chrono::Local;
use indexmap::IndexMap;
use ndarray::{ArrayD, IxDyn};
use tracing::{debug, info, trace, warn};

use crate::config::Settings;
use crate::data::{open_storage, DataStore, RunStorage};
use crate::error::{ScanError, ScanResult};
use crate::instrument::DeviceRegistry;
use crate::metadata::{device_records, RunRecord, DEVICES_ATTR, RUNINFO_ATTR};
use crate::runinfo::{Completion, RunInfo};
use crate::scan::StepAction;

/// One named quantity produced by the measure closure.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Scalar(f64),
    Array(ArrayD<f64>),
}

impl Measurement {
    /// Intrinsic shape; empty for a scalar.
    pub fn shape(&self) -> &[usize] {
        match self {
            Measurement::Scalar(_) => &[],
            Measurement::Array(a) => a.shape(),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Measurement::Scalar(v) => Some(*v),
            Measurement::Array(_) => None,
        }
    }

    fn to_block(&self) -> ArrayD<f64> {
        match self {
            Measurement::Scalar(v) => ArrayD::from_elem(IxDyn(&[]), *v),
            Measurement::Array(a) => a.clone(),
        }
    }
}

impl From<f64> for Measurement {
    fn from(v: f64) -> Self {
        Measurement::Scalar(v)
    }
}

impl From<ArrayD<f64>> for Measurement {
    fn from(a: ArrayD<f64>) -> Self {
        Measurement::Array(a)
    }
}

impl From<Vec<f64>> for Measurement {
    fn from(v: Vec<f64>) -> Self {
        let len = v.len();
        Measurement::Array(
            ArrayD::from_shape_vec(IxDyn(&[len]), v)
                .unwrap_or_else(|_| ArrayD::from_elem(IxDyn(&[0]), f64::NAN)),
        )
    }
}

/// Named readings for one point, in the order they will be stored.
pub type Readings = IndexMap<String, Measurement>;

/// Everything a measure closure may touch.
pub struct MeasureContext<'a> {
    pub devices: &'a mut DeviceRegistry,
    pub runinfo: &'a RunInfo,
    pub data: &'a DataStore,
}

impl MeasureContext<'_> {
    /// Current scan indices, innermost first.
    pub fn indices(&self) -> Vec<usize> {
        self.runinfo.indices()
    }
}

/// The per-point measure closure.
pub type MeasureFn = Box<dyn FnMut(&mut MeasureContext<'_>) -> anyhow::Result<Readings> + Send>;
/// Optional cleanup closure, called once after the last point.
pub type EndFn = Box<dyn FnMut(&mut MeasureContext<'_>) -> anyhow::Result<()> + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Status {
    stop: AtomicBool,
    running: AtomicBool,
    completion: Mutex<Completion>,
    indices: Mutex<Vec<usize>>,
}

/// Clone-able live view of a running (or finished) experiment.
#[derive(Clone)]
pub struct ExperimentMonitor {
    data: DataStore,
    status: Arc<Status>,
}

impl ExperimentMonitor {
    /// Clone of a live dataset, if it exists yet.
    pub fn snapshot(&self, name: &str) -> Option<ArrayD<f64>> {
        self.data.snapshot(name)
    }

    /// Indices of the last persisted point, innermost first.
    pub fn indices(&self) -> Vec<usize> {
        lock(&self.status.indices).clone()
    }

    pub fn completion(&self) -> Completion {
        *lock(&self.status.completion)
    }

    pub fn is_running(&self) -> bool {
        self.status.running.load(Ordering::SeqCst)
    }

    /// Ask the run to stop once the next point is persisted. A request made
    /// before the run starts stops it after its first point.
    pub fn stop(&self) {
        self.status.stop.store(true, Ordering::SeqCst);
    }
}

/// A run moved onto a worker thread.
pub struct RunHandle {
    thread: JoinHandle<(Experiment, ScanResult<()>)>,
    monitor: ExperimentMonitor,
}

impl RunHandle {
    pub fn monitor(&self) -> ExperimentMonitor {
        self.monitor.clone()
    }

    /// Ask the worker to stop after its current point.
    pub fn stop(&self) {
        self.monitor.stop();
    }

    /// Wait for the worker and get the experiment back with the run result.
    pub fn join(self) -> (Experiment, ScanResult<()>) {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// A configured acquisition: devices, run description and measure closure.
pub struct Experiment {
    devices: DeviceRegistry,
    runinfo: RunInfo,
    measure: MeasureFn,
    end: Option<EndFn>,
    settings: Settings,
    data: DataStore,
    status: Arc<Status>,
}

impl Experiment {
    /// Wire a run description to devices and a measure closure. Settings
    /// default to [`Settings::default`]; use
    /// [`with_settings`](Self::with_settings) to inject loaded ones.
    pub fn new(
        runinfo: RunInfo,
        devices: DeviceRegistry,
        measure: impl FnMut(&mut MeasureContext<'_>) -> anyhow::Result<Readings> + Send + 'static,
    ) -> Self {
        Self {
            devices,
            runinfo,
            measure: Box::new(measure),
            end: None,
            settings: Settings::default(),
            data: DataStore::new(),
            status: Arc::new(Status::default()),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Cleanup closure called once after the last point, before the file is
    /// finalized. An error here aborts finalization and surfaces to the
    /// caller.
    #[must_use]
    pub fn with_end(
        mut self,
        end: impl FnMut(&mut MeasureContext<'_>) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.end = Some(Box::new(end));
        self
    }

    pub fn runinfo(&self) -> &RunInfo {
        &self.runinfo
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.devices
    }

    /// Handle onto the live data mirror.
    pub fn data(&self) -> DataStore {
        self.data.clone()
    }

    /// Live view usable from other threads.
    pub fn monitor(&self) -> ExperimentMonitor {
        ExperimentMonitor {
            data: self.data.clone(),
            status: Arc::clone(&self.status),
        }
    }

    /// Ask the run to stop once the next point is persisted. The request is
    /// never erased, so arming it before [`run`](Self::run) stops the run
    /// after its first point.
    pub fn stop(&self) {
        self.status.stop.store(true, Ordering::SeqCst);
    }

    /// Execute the run on the current thread.
    ///
    /// Checks the run description, opens the storage backend, walks the
    /// grid, persists every point, and finalizes the file. An external stop
    /// is a normal return with [`Completion::Stopped`]; errors abort after
    /// the last successfully persisted point.
    pub fn run(&mut self) -> ScanResult<()> {
        *lock(&self.status.completion) = Completion::Pending;

        self.runinfo.check(&self.settings)?;
        self.preflight()?;

        let path = self
            .runinfo
            .file_path()
            .ok_or_else(|| ScanError::RunInfo("no output path assigned".into()))?
            .to_path_buf();
        let mut storage = open_storage(&self.settings.storage.backend, &path)?;

        self.data.clear();
        *lock(&self.status.indices) = self.runinfo.indices();
        self.write_attrs(storage.as_mut())?;
        storage.flush()?;

        info!(
            run = %self.runinfo.name(),
            path = %path.display(),
            dims = ?self.runinfo.dims(),
            "run started"
        );

        let pause = self.runinfo.pause();
        if !pause.is_zero() {
            debug!(pause = ?pause, "initial pause");
            thread::sleep(pause);
        }

        self.status.running.store(true, Ordering::SeqCst);
        let outcome = self.acquire(storage.as_mut());
        self.status.running.store(false, Ordering::SeqCst);

        let completion = match outcome {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, "run aborted");
                return Err(e);
            }
        };

        if let Some(end) = self.end.as_mut() {
            let mut ctx = MeasureContext {
                devices: &mut self.devices,
                runinfo: &self.runinfo,
                data: &self.data,
            };
            end(&mut ctx)?;
        }

        self.runinfo.set_completion(completion);
        self.runinfo.set_ended(Local::now());
        *lock(&self.status.completion) = completion;
        self.write_attrs(storage.as_mut())?;
        storage.flush()?;

        info!(completion = ?completion, path = %path.display(), "run finished");
        Ok(())
    }

    /// Run on a worker thread; the handle joins back to the experiment.
    pub fn spawn(mut self) -> ScanResult<RunHandle> {
        let monitor = self.monitor();
        let thread = thread::Builder::new()
            .name("labscan-run".to_string())
            .spawn(move || {
                let result = self.run();
                (self, result)
            })
            .map_err(|e| ScanError::transport("spawning run thread", e))?;
        Ok(RunHandle { thread, monitor })
    }

    /// Every actuated `(device, property)` pair must resolve before the
    /// first side effect fires.
    fn preflight(&self) -> ScanResult<()> {
        for scan in self.runinfo.scans() {
            for (device, property) in scan.actuated() {
                let instrument = self.devices.get(&device)?;
                if instrument.property(&property).is_none() {
                    return Err(ScanError::UnknownProperty(format!("{device}.{property}")));
                }
            }
        }
        Ok(())
    }

    fn write_attrs(&self, storage: &mut dyn RunStorage) -> ScanResult<()> {
        let record = RunRecord::from_runinfo(&self.runinfo);
        storage.put_attr(RUNINFO_ATTR, &serde_json::to_string(&record)?)?;
        let devices = device_records(&self.devices);
        storage.put_attr(DEVICES_ATTR, &serde_json::to_string(&devices)?)?;
        Ok(())
    }

    fn acquire(&mut self, storage: &mut dyn RunStorage) -> ScanResult<Completion> {
        let dims = self.runinfo.dims();
        let raster = self.runinfo.raster_flags();
        let resizing_axis = self.runinfo.resizing_index();
        let average_axis = self.runinfo.average_index();
        let unbounded = resizing_axis.is_some();

        let mut first_point = true;
        let mut last_row = false;
        for (indices, deltas) in SweepIter::new(&dims, &raster, unbounded) {
            // A capped growing scan finishes its current row; the run ends
            // when that axis would advance again.
            if last_row && resizing_axis.is_some_and(|k| deltas[k] == 1) {
                return Ok(Completion::Complete);
            }
            trace!(?indices, ?deltas, "point");

            // Outer scans move before inner ones.
            let mut stop_after = false;
            let scans = self.runinfo.scans_mut();
            for k in (0..scans.len()).rev() {
                let action = scans[k].iterate(indices[k], deltas[k], &mut self.devices, &self.data)?;
                if action == StepAction::StopAfterPoint {
                    stop_after = true;
                }
            }

            let readings = {
                let mut ctx = MeasureContext {
                    devices: &mut self.devices,
                    runinfo: &self.runinfo,
                    data: &self.data,
                };
                (self.measure)(&mut ctx)?
            };
            if readings.is_empty() {
                return Err(ScanError::Measurement(anyhow!(
                    "measure function returned no readings"
                )));
            }

            let resizing_advanced = resizing_axis.is_some_and(|k| deltas[k] == 1);
            if first_point {
                self.allocate(&readings, storage)?;
                self.write_attrs(storage)?;
                self.save_point(&readings, &indices, storage)?;
                first_point = false;
            } else if resizing_advanced {
                self.reallocate(&readings, &indices, storage)?;
            } else if let Some(avg) = average_axis {
                self.rolling_update(&readings, &indices, avg, storage)?;
            } else {
                self.save_point(&readings, &indices, storage)?;
            }
            storage.flush()?;
            *lock(&self.status.indices) = indices.clone();

            // Stop checks come after the point is safely on disk.
            if self.status.stop.load(Ordering::SeqCst) {
                info!(?indices, "stop requested, ending run");
                return Ok(Completion::Stopped);
            }
            if stop_after {
                debug!(?indices, "scan finished its budget");
                last_row = true;
            }
        }
        Ok(Completion::Complete)
    }

    /// Create every dataset, NaN-filled, sized from the first readings.
    fn allocate(&mut self, readings: &Readings, storage: &mut dyn RunStorage) -> ScanResult<()> {
        let resizing = self.runinfo.has_resizing_data();
        let effective = if self.runinfo.has_average_scan() {
            self.runinfo.average_dims()
        } else {
            self.runinfo.dims()
        };
        // Storage layout is outermost-first; the growable axis becomes axis 0.
        let point_dims: Vec<usize> = effective.iter().rev().copied().collect();

        let axes = self.runinfo.all_axes();
        for scan in self.runinfo.scans() {
            let growable = scan.is_resizing();
            for (name, values) in scan.scan_axes() {
                let maxshape = [if growable { None } else { Some(values.len()) }];
                storage.create_dataset(&name, &[values.len()], &maxshape)?;
                let block = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.clone())
                    .map_err(|e| ScanError::Storage(format!("axis '{name}': {e}")))?;
                storage.write_region(&name, &[], &block)?;
                self.data.insert_axis(&name, values);
            }
        }

        let mut measured = Vec::with_capacity(readings.len());
        for (name, measurement) in readings {
            if axes.contains_key(name) {
                return Err(ScanError::Storage(format!(
                    "reading '{name}' collides with a scan axis"
                )));
            }
            let mut shape = point_dims.clone();
            shape.extend_from_slice(measurement.shape());
            let mut maxshape: Vec<Option<usize>> = shape.iter().map(|&d| Some(d)).collect();
            if shape.is_empty() {
                shape = vec![1];
                maxshape = vec![None];
            }
            if resizing {
                maxshape[0] = None;
            }
            debug!(dataset = %name, ?shape, "allocating");
            storage.create_dataset(name, &shape, &maxshape)?;
            self.data.create(name, &shape);
            measured.push(name.clone());
        }
        self.runinfo.set_measured(measured);
        Ok(())
    }

    /// Point indices in storage order, averaged axis folded out.
    fn storage_index(&self, indices: &[usize]) -> Vec<usize> {
        let mut idx: Vec<usize> = match self.runinfo.average_index() {
            Some(avg) => indices
                .iter()
                .enumerate()
                .filter(|(d, _)| *d != avg)
                .map(|(_, &i)| i)
                .collect(),
            None => indices.to_vec(),
        };
        idx.reverse();
        idx
    }

    fn save_point(
        &self,
        readings: &Readings,
        indices: &[usize],
        storage: &mut dyn RunStorage,
    ) -> ScanResult<()> {
        let idx = self.storage_index(indices);
        for (name, measurement) in readings {
            let block = measurement.to_block();
            let slot = write_slot(&idx, measurement);
            storage.write_region(name, &slot, &block)?;
            self.data.write_array(name, &slot, &block)?;
        }
        Ok(())
    }

    /// Fold the current reading into the rolling mean at this point's slot.
    ///
    /// With `k` the averaged axis's index: `k == 0` restarts the mean, else
    /// `A <- A*k/(k+1) + v/(k+1)` elementwise.
    fn rolling_update(
        &self,
        readings: &Readings,
        indices: &[usize],
        average_axis: usize,
        storage: &mut dyn RunStorage,
    ) -> ScanResult<()> {
        let k = indices[average_axis];
        let idx = self.storage_index(indices);
        for (name, measurement) in readings {
            let fresh = measurement.to_block();
            let slot = write_slot(&idx, measurement);
            let updated = if k == 0 {
                fresh
            } else {
                let mut merged = self.data.read_array(name, &slot)?;
                if merged.shape() != fresh.shape() {
                    return Err(ScanError::Storage(format!(
                        "reading '{name}' changed shape mid-run ({:?} to {:?})",
                        merged.shape(),
                        fresh.shape()
                    )));
                }
                let kf = k as f64;
                merged.mapv_inplace(|a| a * kf / (kf + 1.0));
                merged.zip_mut_with(&fresh, |a, &v| *a += v / (kf + 1.0));
                merged
            };
            storage.write_region(name, &slot, &updated)?;
            self.data.write_array(name, &slot, &updated)?;
        }
        Ok(())
    }

    /// The growable axis advanced: append one NaN slab to every measured
    /// dataset and its axis, then write this point into the new slab. The
    /// append is the save for this point.
    fn reallocate(
        &mut self,
        readings: &Readings,
        indices: &[usize],
        storage: &mut dyn RunStorage,
    ) -> ScanResult<()> {
        let idx = self.storage_index(indices);
        let new_outer = idx
            .first()
            .copied()
            .ok_or_else(|| ScanError::Storage("resizing run has no outer axis".into()))?
            + 1;

        for name in self.runinfo.measured() {
            let mut shape = self
                .data
                .shape(name)
                .ok_or_else(|| ScanError::Storage(format!("no dataset named '{name}'")))?;
            shape[0] = new_outer;
            storage.resize(name, &shape)?;
            self.data.grow_axis0(name, 1)?;
        }

        if let Some(r) = self.runinfo.resizing_index() {
            if let Some(axis_name) = self.runinfo.scans()[r].scan_axes().keys().next().cloned() {
                storage.resize(&axis_name, &[new_outer])?;
                let value = (new_outer - 1) as f64;
                let block = ArrayD::from_elem(IxDyn(&[]), value);
                storage.write_region(&axis_name, &[new_outer - 1], &block)?;
                self.data.push(&axis_name, value)?;
            }
        }

        self.save_point(readings, indices, storage)
    }
}

/// Where a reading lands: its point index, or slot 0 of the `[1]` dataset a
/// bare scalar gets when no point axes remain.
fn write_slot(idx: &[usize], measurement: &Measurement) -> Vec<usize> {
    if idx.is_empty() && measurement.shape().is_empty() {
        vec![0]
    } else {
        idx.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::drivers::sim_voltage_source;
    use crate::scan::{AverageScan, PropertyScan};
    use std::time::Duration;

    fn sim_registry() -> (DeviceRegistry, MockChannel) {
        let channel = MockChannel::new("v1");
        let handle = channel.clone();
        let mut devices = DeviceRegistry::new();
        devices.add("v1", sim_voltage_source(channel).unwrap());
        (devices, handle)
    }

    fn test_settings() -> (tempfile::TempDir, Settings) {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.storage.data_dir = tmp.path().to_path_buf();
        (tmp, settings)
    }

    #[test]
    fn measurement_conversions() {
        let scalar = Measurement::from(2.5);
        assert_eq!(scalar.as_scalar(), Some(2.5));
        assert_eq!(scalar.shape(), &[] as &[usize]);

        let array = Measurement::from(vec![1.0, 2.0, 3.0]);
        assert_eq!(array.shape(), &[3]);
        assert_eq!(array.as_scalar(), None);
    }

    #[test]
    fn one_dimensional_run_persists_and_completes() {
        let (devices, _mock) = sim_registry();
        let (_tmp, settings) = test_settings();

        let runinfo = RunInfo::new()
            .measure_name("sweep")
            .scan(PropertyScan::new("v1", "voltage", vec![0.0, 1.0, 2.0], Duration::ZERO).unwrap());

        let mut expt = Experiment::new(runinfo, devices, |ctx| {
            let v = ctx.devices.get_property("v1", "voltage")?;
            let mut readings = Readings::new();
            readings.insert(
                "signal".to_string(),
                Measurement::from(v.as_f64().unwrap_or(f64::NAN) * 2.0),
            );
            Ok(readings)
        })
        .with_settings(settings);

        expt.run().unwrap();

        assert_eq!(expt.runinfo().completion(), Completion::Complete);
        assert_eq!(expt.runinfo().measured(), &["signal".to_string()]);

        let data = expt.data();
        let signal = data.snapshot("signal").unwrap();
        assert_eq!(signal.shape(), &[3]);
        assert_eq!(signal[[2]], 4.0);
        assert_eq!(data.snapshot("v1_voltage").unwrap().shape(), &[3]);

        let path = expt.runinfo().file_path().unwrap();
        assert!(path.exists());
        let loaded = crate::data::load(path).unwrap();
        assert_eq!(loaded.completion(), Completion::Complete);
        assert_eq!(loaded.dataset("signal").unwrap()[[1]], 2.0);
    }

    #[test]
    fn averaging_folds_the_axis_out() {
        let (devices, _mock) = sim_registry();
        let (_tmp, settings) = test_settings();

        // Average is innermost: four samples per voltage point.
        let runinfo = RunInfo::new()
            .scan(AverageScan::new(4, Duration::ZERO).unwrap())
            .scan(PropertyScan::new("v1", "voltage", vec![0.0, 1.0], Duration::ZERO).unwrap());

        let mut sample = 0.0;
        let mut expt = Experiment::new(runinfo, devices, move |_ctx| {
            sample += 1.0;
            let mut readings = Readings::new();
            readings.insert("signal".to_string(), Measurement::from(sample));
            Ok(readings)
        })
        .with_settings(settings);

        expt.run().unwrap();

        let signal = expt.data().snapshot("signal").unwrap();
        // Averaged axis is folded out; only the sweep axis remains.
        assert_eq!(signal.shape(), &[2]);
        // Samples 1..=4 average to 2.5 at the first voltage, 5..=8 to 6.5.
        assert!((signal[[0]] - 2.5).abs() < 1e-12);
        assert!((signal[[1]] - 6.5).abs() < 1e-12);
    }

    #[test]
    fn stop_armed_before_run_ends_after_first_point() {
        let (devices, _mock) = sim_registry();
        let (_tmp, settings) = test_settings();

        let runinfo = RunInfo::new()
            .scan(PropertyScan::new("v1", "voltage", vec![0.0, 1.0, 2.0, 3.0], Duration::ZERO).unwrap());

        let mut expt = Experiment::new(runinfo, devices, |_ctx| {
            let mut readings = Readings::new();
            readings.insert("signal".to_string(), Measurement::from(1.0));
            Ok(readings)
        })
        .with_settings(settings);

        // The request predates the run; it must survive run() startup and be
        // honored at the first post-persist check.
        let monitor = expt.monitor();
        monitor.stop();
        expt.run().unwrap();

        assert_eq!(expt.runinfo().completion(), Completion::Stopped);
        assert_eq!(monitor.completion(), Completion::Stopped);
        // Exactly the first point was measured and persisted.
        assert_eq!(monitor.indices(), vec![0]);
        let loaded = crate::data::load(expt.runinfo().file_path().unwrap()).unwrap();
        assert_eq!(loaded.completion(), Completion::Stopped);
        assert_eq!(loaded.dataset("signal").unwrap()[[0]], 1.0);
        assert!(loaded.dataset("signal").unwrap()[[1]].is_nan());
    }

    #[test]
    fn preflight_rejects_unknown_targets() {
        let (devices, _mock) = sim_registry();
        let (_tmp, settings) = test_settings();

        let runinfo = RunInfo::new()
            .scan(PropertyScan::new("v1", "frequency", vec![0.0], Duration::ZERO).unwrap());
        let mut expt = Experiment::new(runinfo, devices, |_ctx| Ok(Readings::new()))
            .with_settings(settings);
        let err = expt.run().unwrap_err();
        assert!(matches!(err, ScanError::UnknownProperty(_)));
    }

    #[test]
    fn empty_readings_abort_the_run() {
        let (devices, _mock) = sim_registry();
        let (_tmp, settings) = test_settings();

        let runinfo = RunInfo::new()
            .scan(PropertyScan::new("v1", "voltage", vec![0.0], Duration::ZERO).unwrap());
        let mut expt = Experiment::new(runinfo, devices, |_ctx| Ok(Readings::new()))
            .with_settings(settings);
        assert!(expt.run().is_err());
    }
}
