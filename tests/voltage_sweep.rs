//! Full acquisition runs against the simulated voltage source: sweep
//! geometry, file layout, averaging, raster traversal, and reading runs
//! back from disk.

use std::time::Duration;

use labscan::channel::MockChannel;
use labscan::config::Settings;
use labscan::data::load;
use labscan::drivers::sim_voltage_source;
use labscan::experiment::{Experiment, Measurement, Readings};
use labscan::instrument::DeviceRegistry;
use labscan::runinfo::{Completion, RunInfo};
use labscan::scan::{AverageScan, PropertyScan, RepeatScan};

fn sim_devices() -> (DeviceRegistry, MockChannel) {
    let chan = MockChannel::new("v1");
    let mut devices = DeviceRegistry::new();
    devices.add("v1", sim_voltage_source(chan.clone()).unwrap());
    (devices, chan)
}

fn settings_in(dir: &tempfile::TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.storage.data_dir = dir.path().to_path_buf();
    settings
}

fn scalar(readings: &mut Readings, name: &str, value: f64) {
    readings.insert(name.to_string(), Measurement::from(value));
}

#[test]
fn sweep_writes_axis_and_signal() {
    let (devices, _chan) = sim_devices();
    let tmp = tempfile::tempdir().unwrap();

    let runinfo = RunInfo::new()
        .measure_name("iv_curve")
        .scan(PropertyScan::new("v1", "voltage", vec![0.0, 2.5, 5.0], Duration::ZERO).unwrap());

    let mut expt = Experiment::new(runinfo, devices, |ctx| {
        let v = ctx.devices.get_property("v1", "voltage")?;
        let mut readings = Readings::new();
        scalar(&mut readings, "current", v.as_f64().unwrap_or(f64::NAN) / 50.0);
        Ok(readings)
    })
    .with_settings(settings_in(&tmp));

    expt.run().unwrap();
    let path = expt.runinfo().file_path().unwrap().to_path_buf();
    assert!(path.extension().is_some_and(|e| e == "rdat"));

    let run = load(&path).unwrap();
    assert_eq!(run.completion(), Completion::Complete);
    assert_eq!(run.measured_names(), vec!["current".to_string()]);

    let axis = run.dataset("v1_voltage").unwrap();
    assert_eq!(axis.shape(), &[3]);
    assert_eq!(axis[[1]], 2.5);

    let current = run.dataset("current").unwrap();
    assert_eq!(current.shape(), &[3]);
    assert!((current[[2]] - 0.1).abs() < 1e-12);
}

#[test]
fn nested_sweep_lands_outermost_first() {
    let (devices, _chan) = sim_devices();
    let tmp = tempfile::tempdir().unwrap();

    // Innermost scan first: voltage cycles fastest, repeat is the outer axis.
    let runinfo = RunInfo::new()
        .scan(PropertyScan::new("v1", "voltage", vec![0.0, 1.0, 2.0], Duration::ZERO).unwrap())
        .scan(RepeatScan::new(2, Duration::ZERO).unwrap());

    let mut expt = Experiment::new(runinfo, devices, |ctx| {
        let idx = ctx.indices(); // innermost first: [voltage, repeat]
        let mut readings = Readings::new();
        scalar(&mut readings, "signal", (idx[1] * 10 + idx[0]) as f64);
        Ok(readings)
    })
    .with_settings(settings_in(&tmp));

    expt.run().unwrap();
    let run = load(expt.runinfo().file_path().unwrap()).unwrap();

    // Stored outermost-first: axis 0 is the repeat, axis 1 the voltage.
    let signal = run.dataset("signal").unwrap();
    assert_eq!(signal.shape(), &[2, 3]);
    assert_eq!(signal[[0, 0]], 0.0);
    assert_eq!(signal[[0, 2]], 2.0);
    assert_eq!(signal[[1, 2]], 12.0);

    assert_eq!(run.dataset("repeat").unwrap().shape(), &[2]);
    assert_eq!(run.dataset("v1_voltage").unwrap().shape(), &[3]);
}

#[test]
fn array_readings_extend_the_grid() {
    let (devices, _chan) = sim_devices();
    let tmp = tempfile::tempdir().unwrap();

    let runinfo = RunInfo::new()
        .scan(PropertyScan::new("v1", "voltage", vec![1.0, 2.0], Duration::ZERO).unwrap());

    let mut expt = Experiment::new(runinfo, devices, |ctx| {
        let v = ctx.devices.get_property("v1", "voltage")?;
        let v = v.as_f64().unwrap_or(f64::NAN);
        let mut readings = Readings::new();
        readings.insert(
            "trace".to_string(),
            Measurement::from(vec![v, v + 0.25, v + 0.5]),
        );
        Ok(readings)
    })
    .with_settings(settings_in(&tmp));

    expt.run().unwrap();
    let run = load(expt.runinfo().file_path().unwrap()).unwrap();

    let trace = run.dataset("trace").unwrap();
    assert_eq!(trace.shape(), &[2, 3]);
    assert_eq!(trace[[0, 0]], 1.0);
    assert_eq!(trace[[1, 2]], 2.5);
}

#[test]
fn average_scan_folds_out_of_the_file() {
    let (devices, _chan) = sim_devices();
    let tmp = tempfile::tempdir().unwrap();

    // Three samples per voltage point, averaged on the fly.
    let runinfo = RunInfo::new()
        .scan(AverageScan::new(3, Duration::ZERO).unwrap())
        .scan(PropertyScan::new("v1", "voltage", vec![0.0, 1.0], Duration::ZERO).unwrap());

    let mut sample = 0.0;
    let mut expt = Experiment::new(runinfo, devices, move |_ctx| {
        sample += 1.0;
        let mut readings = Readings::new();
        readings.insert("signal".to_string(), Measurement::from(sample));
        Ok(readings)
    })
    .with_settings(settings_in(&tmp));

    expt.run().unwrap();
    let run = load(expt.runinfo().file_path().unwrap()).unwrap();

    // The averaged dimension is folded out of the measured data but its
    // axis is still recorded.
    let signal = run.dataset("signal").unwrap();
    assert_eq!(signal.shape(), &[2]);
    assert!((signal[[0]] - 2.0).abs() < 1e-12); // mean of 1, 2, 3
    assert!((signal[[1]] - 5.0).abs() < 1e-12); // mean of 4, 5, 6
    assert_eq!(run.dataset("average").unwrap().shape(), &[3]);
}

#[test]
fn raster_holds_the_boundary_point() {
    let (devices, chan) = sim_devices();
    let tmp = tempfile::tempdir().unwrap();

    let runinfo = RunInfo::new()
        .scan(
            PropertyScan::new("v1", "voltage", vec![1.0, 2.0], Duration::ZERO)
                .unwrap()
                .raster(true),
        )
        .scan(RepeatScan::new(2, Duration::ZERO).unwrap());

    chan.clear_calls();
    let mut expt = Experiment::new(runinfo, devices, |_ctx| {
        let mut readings = Readings::new();
        scalar(&mut readings, "signal", 1.0);
        Ok(readings)
    })
    .with_settings(settings_in(&tmp));
    expt.run().unwrap();

    // Forward pass, then the held boundary point, then one step back.
    let writes: Vec<String> = chan
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("write VOLT"))
        .collect();
    assert_eq!(writes, vec!["write VOLT 1", "write VOLT 2", "write VOLT 1"]);

    let run = load(expt.runinfo().file_path().unwrap()).unwrap();
    assert_eq!(run.dataset("signal").unwrap().shape(), &[2, 2]);
}
