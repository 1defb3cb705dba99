//! Scan dimensions: what changes between measurements, and how.
//!
//! A run is a stack of scans, innermost first. Each scan owns one axis of
//! the acquisition grid (a property scan owns one axis *per target*, moved
//! in lockstep) and performs its side effect when the traversal engine tells
//! it that its index changed. The engine hands every scan a delta per point:
//! `+1` advanced, `-1` wrapped back to the start, `0` unchanged. A scan only
//! acts on nonzero deltas, then settles for its `dt`.

use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::DataStore;
use crate::error::{ScanError, ScanResult};
use crate::instrument::DeviceRegistry;
use crate::optimize::Optimizer;

/// What the engine should do after the current point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Keep going.
    Continue,
    /// Finish measuring and persisting this point, then end the run cleanly.
    StopAfterPoint,
}

/// Closure driven by a function scan; receives the axis value for the
/// current index.
pub type ScanFn = Box<dyn FnMut(f64) -> anyhow::Result<()> + Send>;

/// Scan discriminant, mostly for logs and run metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    Property,
    Function,
    Repeat,
    Average,
    Continuous,
    Optimize,
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanKind::Property => "property",
            ScanKind::Function => "function",
            ScanKind::Repeat => "repeat",
            ScanKind::Average => "average",
            ScanKind::Continuous => "continuous",
            ScanKind::Optimize => "optimize",
        };
        f.write_str(s)
    }
}

/// One device property swept by a [`PropertyScan`], with its value list.
#[derive(Debug, Clone)]
pub struct SweepTarget {
    device: String,
    property: String,
    values: Vec<f64>,
}

impl SweepTarget {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Axis name under which this target's values are recorded.
    pub fn axis_name(&self) -> String {
        format!("{}_{}", self.device, self.property)
    }
}

/// Sweeps one or more device properties through explicit value lists.
///
/// Extra targets move in lockstep with the first: all value lists share one
/// index, so they must have equal lengths.
#[derive(Debug)]
pub struct PropertyScan {
    targets: Vec<SweepTarget>,
    dt: Duration,
    i: usize,
    raster: bool,
}

impl PropertyScan {
    /// Sweep `device.property` through `values`, settling `dt` after each
    /// move.
    pub fn new(
        device: impl Into<String>,
        property: impl Into<String>,
        values: Vec<f64>,
        dt: Duration,
    ) -> ScanResult<Self> {
        let device = device.into();
        let property = property.into();
        if values.is_empty() {
            return Err(ScanError::RunInfo(format!(
                "property scan over {device}.{property} has no values"
            )));
        }
        Ok(Self {
            targets: vec![SweepTarget {
                device,
                property,
                values,
            }],
            dt,
            i: 0,
            raster: false,
        })
    }

    /// Add a lockstep target. Its value list must match the length of the
    /// first target's.
    pub fn add_target(
        mut self,
        device: impl Into<String>,
        property: impl Into<String>,
        values: Vec<f64>,
    ) -> ScanResult<Self> {
        let device = device.into();
        let property = property.into();
        let n = self.targets[0].values.len();
        if values.len() != n {
            return Err(ScanError::RunInfo(format!(
                "lockstep target {device}.{property} has {} values, expected {n}",
                values.len()
            )));
        }
        self.targets.push(SweepTarget {
            device,
            property,
            values,
        });
        Ok(self)
    }

    /// Sweep back and forth instead of snapping to the start when an outer
    /// index advances.
    #[must_use]
    pub fn raster(mut self, enabled: bool) -> Self {
        self.raster = enabled;
        self
    }

    pub fn targets(&self) -> &[SweepTarget] {
        &self.targets
    }

    fn apply(&self, i: usize, devices: &mut DeviceRegistry) -> ScanResult<()> {
        for target in &self.targets {
            let value = target.values[i];
            debug!(
                device = %target.device,
                property = %target.property,
                value,
                "scan move"
            );
            devices.set_property(&target.device, &target.property, value)?;
        }
        Ok(())
    }
}

/// Calls a user closure with each axis value, for hardware the property
/// framework does not model (stage macros, timing kernels, anything ad hoc).
pub struct FunctionScan {
    name: String,
    values: Vec<f64>,
    func: ScanFn,
    dt: Duration,
    i: usize,
    raster: bool,
}

impl FunctionScan {
    /// Drive `func` through `values`; `name` labels the recorded axis.
    pub fn new(
        name: impl Into<String>,
        values: Vec<f64>,
        func: impl FnMut(f64) -> anyhow::Result<()> + Send + 'static,
        dt: Duration,
    ) -> ScanResult<Self> {
        let name = name.into();
        if values.is_empty() {
            return Err(ScanError::RunInfo(format!(
                "function scan '{name}' has no values"
            )));
        }
        Ok(Self {
            name,
            values,
            func: Box::new(func),
            dt,
            i: 0,
            raster: false,
        })
    }

    /// See [`PropertyScan::raster`].
    #[must_use]
    pub fn raster(mut self, enabled: bool) -> Self {
        self.raster = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for FunctionScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionScan")
            .field("name", &self.name)
            .field("n", &self.values.len())
            .field("dt", &self.dt)
            .finish_non_exhaustive()
    }
}

/// Repeats the inner measurement `n` times, recording every repetition.
#[derive(Debug)]
pub struct RepeatScan {
    n: usize,
    dt: Duration,
    i: usize,
}

impl RepeatScan {
    pub fn new(n: usize, dt: Duration) -> ScanResult<Self> {
        if n == 0 {
            return Err(ScanError::RunInfo("repeat scan needs n >= 1".into()));
        }
        Ok(Self { n, dt, i: 0 })
    }
}

/// Repeats the inner measurement `n` times and folds the repetitions into a
/// rolling mean, so the averaged axis never appears in the stored data.
#[derive(Debug)]
pub struct AverageScan {
    n: usize,
    dt: Duration,
    i: usize,
}

impl AverageScan {
    pub fn new(n: usize, dt: Duration) -> ScanResult<Self> {
        if n == 0 {
            return Err(ScanError::RunInfo("average scan needs n >= 1".into()));
        }
        Ok(Self { n, dt, i: 0 })
    }
}

/// Open-ended acquisition: keeps measuring until stopped externally or until
/// an optional iteration cap. Must be the outermost scan; its axis grows
/// with the run.
#[derive(Debug)]
pub struct ContinuousScan {
    n_max: Option<usize>,
    dt: Duration,
    i: usize,
    iterations: Vec<f64>,
}

impl ContinuousScan {
    pub fn new(n_max: Option<usize>, dt: Duration) -> ScanResult<Self> {
        if n_max == Some(0) {
            return Err(ScanError::RunInfo("continuous scan cap must be >= 1".into()));
        }
        Ok(Self {
            n_max,
            dt,
            i: 0,
            iterations: Vec::new(),
        })
    }

    pub fn n_max(&self) -> Option<usize> {
        self.n_max
    }
}

/// Closed-loop scan: lets an [`Optimizer`] choose where to measure next.
///
/// The first point applies the initial values; every later point feeds the
/// samples gathered so far back to the optimizer and applies its proposal.
/// Must be the outermost scan.
pub struct OptimizeScan {
    initial: IndexMap<String, f64>,
    property: String,
    sampled_inputs: Vec<String>,
    sampled_output: String,
    n_max: usize,
    optimizer: Box<dyn Optimizer>,
    dt: Duration,
    i: usize,
    iterations: Vec<f64>,
}

impl OptimizeScan {
    /// Optimize `property` across the devices in `initial` (device name to
    /// starting value). `sampled_inputs` and `sampled_output` name measured
    /// quantities fed back to the optimizer; the output is maximized.
    /// `n_max` caps the number of iterations.
    pub fn new(
        initial: IndexMap<String, f64>,
        property: impl Into<String>,
        sampled_inputs: Vec<String>,
        sampled_output: impl Into<String>,
        n_max: usize,
        optimizer: Box<dyn Optimizer>,
        dt: Duration,
    ) -> ScanResult<Self> {
        let property = property.into();
        let sampled_output = sampled_output.into();
        if initial.is_empty() {
            return Err(ScanError::RunInfo("optimize scan needs at least one device".into()));
        }
        if n_max == 0 {
            return Err(ScanError::RunInfo("optimize scan cap must be >= 1".into()));
        }
        if sampled_output.is_empty() {
            return Err(ScanError::RunInfo(
                "optimize scan needs a sampled output to maximize".into(),
            ));
        }
        Ok(Self {
            initial,
            property,
            sampled_inputs,
            sampled_output,
            n_max,
            optimizer,
            dt,
            i: 0,
            iterations: Vec::new(),
        })
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.initial.keys().map(String::as_str)
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn n_max(&self) -> usize {
        self.n_max
    }

    fn step(&mut self, i: usize, devices: &mut DeviceRegistry, data: &DataStore) -> ScanResult<StepAction> {
        if i == 0 {
            for (device, value) in &self.initial {
                debug!(device = %device, property = %self.property, value, "optimize start");
                devices.set_property(device, &self.property, *value)?;
            }
        } else {
            let inputs: Vec<Vec<f64>> = self
                .sampled_inputs
                .iter()
                .map(|name| data.samples(name))
                .collect();
            let outputs = data.samples(&self.sampled_output);
            let proposal = self.optimizer.propose(&inputs, &outputs);
            if proposal.len() != self.initial.len() {
                return Err(ScanError::Measurement(anyhow::anyhow!(
                    "optimizer proposed {} values for {} devices",
                    proposal.len(),
                    self.initial.len()
                )));
            }
            for (k, device) in self.initial.keys().enumerate() {
                debug!(device = %device, property = %self.property, value = proposal[k], "optimize move");
                devices.set_property(device, &self.property, proposal[k])?;
            }
        }

        if self.iterations.len() == i {
            self.iterations.push(i as f64);
        }
        if self.iterations.len() >= self.n_max || !self.optimizer.is_running() {
            return Ok(StepAction::StopAfterPoint);
        }
        Ok(StepAction::Continue)
    }
}

impl std::fmt::Debug for OptimizeScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizeScan")
            .field("devices", &self.initial.keys().collect::<Vec<_>>())
            .field("property", &self.property)
            .field("n_max", &self.n_max)
            .finish_non_exhaustive()
    }
}

/// One dimension of a run.
#[derive(Debug)]
pub enum Scan {
    Property(PropertyScan),
    Function(FunctionScan),
    Repeat(RepeatScan),
    Average(AverageScan),
    Continuous(ContinuousScan),
    Optimize(OptimizeScan),
}

impl From<PropertyScan> for Scan {
    fn from(s: PropertyScan) -> Self {
        Scan::Property(s)
    }
}

impl From<FunctionScan> for Scan {
    fn from(s: FunctionScan) -> Self {
        Scan::Function(s)
    }
}

impl From<RepeatScan> for Scan {
    fn from(s: RepeatScan) -> Self {
        Scan::Repeat(s)
    }
}

impl From<AverageScan> for Scan {
    fn from(s: AverageScan) -> Self {
        Scan::Average(s)
    }
}

impl From<ContinuousScan> for Scan {
    fn from(s: ContinuousScan) -> Self {
        Scan::Continuous(s)
    }
}

impl From<OptimizeScan> for Scan {
    fn from(s: OptimizeScan) -> Self {
        Scan::Optimize(s)
    }
}

impl Scan {
    pub fn kind(&self) -> ScanKind {
        match self {
            Scan::Property(_) => ScanKind::Property,
            Scan::Function(_) => ScanKind::Function,
            Scan::Repeat(_) => ScanKind::Repeat,
            Scan::Average(_) => ScanKind::Average,
            Scan::Continuous(_) => ScanKind::Continuous,
            Scan::Optimize(_) => ScanKind::Optimize,
        }
    }

    /// Number of points along this scan's axis. For resizing scans this is
    /// the count so far (at least 1, so geometry stays well-formed before
    /// the first point).
    pub fn n(&self) -> usize {
        match self {
            Scan::Property(s) => s.targets.first().map_or(0, |t| t.values.len()),
            Scan::Function(s) => s.values.len(),
            Scan::Repeat(s) => s.n,
            Scan::Average(s) => s.n,
            Scan::Continuous(s) => s.iterations.len().max(1),
            Scan::Optimize(s) => s.iterations.len().max(1),
        }
    }

    /// Current index along this scan's axis.
    pub fn i(&self) -> usize {
        match self {
            Scan::Property(s) => s.i,
            Scan::Function(s) => s.i,
            Scan::Repeat(s) => s.i,
            Scan::Average(s) => s.i,
            Scan::Continuous(s) => s.i,
            Scan::Optimize(s) => s.i,
        }
    }

    pub(crate) fn set_i(&mut self, i: usize) {
        match self {
            Scan::Property(s) => s.i = i,
            Scan::Function(s) => s.i = i,
            Scan::Repeat(s) => s.i = i,
            Scan::Average(s) => s.i = i,
            Scan::Continuous(s) => s.i = i,
            Scan::Optimize(s) => s.i = i,
        }
    }

    /// Return the scan to its pre-run state. Resizing scans also forget the
    /// axis a previous run grew, so a rerun starts from one row again.
    pub(crate) fn reset(&mut self) {
        self.set_i(0);
        match self {
            Scan::Continuous(s) => s.iterations.clear(),
            Scan::Optimize(s) => s.iterations.clear(),
            _ => {}
        }
    }

    /// Settling time after each move.
    pub fn dt(&self) -> Duration {
        match self {
            Scan::Property(s) => s.dt,
            Scan::Function(s) => s.dt,
            Scan::Repeat(s) => s.dt,
            Scan::Average(s) => s.dt,
            Scan::Continuous(s) => s.dt,
            Scan::Optimize(s) => s.dt,
        }
    }

    /// Axis name to value list, in declaration order. Property scans
    /// contribute one axis per lockstep target.
    pub fn scan_axes(&self) -> IndexMap<String, Vec<f64>> {
        let mut axes = IndexMap::new();
        match self {
            Scan::Property(s) => {
                for target in &s.targets {
                    axes.insert(target.axis_name(), target.values.clone());
                }
            }
            Scan::Function(s) => {
                axes.insert(s.name.clone(), s.values.clone());
            }
            Scan::Repeat(s) => {
                axes.insert("repeat".to_string(), (0..s.n).map(|k| k as f64).collect());
            }
            Scan::Average(s) => {
                axes.insert("average".to_string(), (0..s.n).map(|k| k as f64).collect());
            }
            Scan::Continuous(s) => {
                let values = if s.iterations.is_empty() {
                    vec![0.0]
                } else {
                    s.iterations.clone()
                };
                axes.insert("iteration".to_string(), values);
            }
            Scan::Optimize(s) => {
                let values = if s.iterations.is_empty() {
                    vec![0.0]
                } else {
                    s.iterations.clone()
                };
                axes.insert("iteration".to_string(), values);
            }
        }
        axes
    }

    /// True for the averaging dimension, which is folded out of the stored
    /// data.
    pub fn is_average(&self) -> bool {
        matches!(self, Scan::Average(_))
    }

    /// True for scans whose axis grows while the run is live.
    pub fn is_resizing(&self) -> bool {
        matches!(self, Scan::Continuous(_) | Scan::Optimize(_))
    }

    pub(crate) fn raster_enabled(&self) -> bool {
        match self {
            Scan::Property(s) => s.raster,
            Scan::Function(s) => s.raster,
            _ => false,
        }
    }

    /// Every `(device, property)` pair this scan actuates.
    pub(crate) fn actuated(&self) -> Vec<(String, String)> {
        match self {
            Scan::Property(s) => s
                .targets
                .iter()
                .map(|t| (t.device.clone(), t.property.clone()))
                .collect(),
            Scan::Optimize(s) => s
                .initial
                .keys()
                .map(|d| (d.clone(), s.property.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Perform this scan's side effect for index `i`.
    ///
    /// `delta` is the index change since the previous point: `0` means no
    /// change (nothing happens), `+1` an advance, `-1` a wrap back to the
    /// start of the axis. After a nonzero delta the scan settles for `dt`.
    pub(crate) fn iterate(
        &mut self,
        i: usize,
        delta: i8,
        devices: &mut DeviceRegistry,
        data: &DataStore,
    ) -> ScanResult<StepAction> {
        if delta == 0 {
            return Ok(StepAction::Continue);
        }
        self.set_i(i);

        let action = match self {
            Scan::Property(s) => {
                s.apply(i, devices)?;
                StepAction::Continue
            }
            Scan::Function(s) => {
                let value = s.values[i];
                (s.func)(value)?;
                StepAction::Continue
            }
            Scan::Repeat(_) | Scan::Average(_) => StepAction::Continue,
            Scan::Continuous(s) => {
                if s.iterations.len() == i {
                    s.iterations.push(i as f64);
                }
                match s.n_max {
                    Some(cap) if s.iterations.len() >= cap => StepAction::StopAfterPoint,
                    _ => StepAction::Continue,
                }
            }
            Scan::Optimize(s) => s.step(i, devices, data)?,
        };

        let dt = self.dt();
        if !dt.is_zero() {
            thread::sleep(dt);
        }
        Ok(action)
    }
}
