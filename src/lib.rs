//! # labscan
//!
//! Instrument control and measurement orchestration for laboratory setups.
//! The crate turns a declarative description of a measurement (which device
//! properties to sweep, over which values, how often to repeat or average)
//! into a fully persisted multi-dimensional dataset, talking to instruments
//! over simple text command channels.
//!
//! ## Crate structure
//!
//! - **`channel`**: Text command transports. [`channel::MockChannel`]
//!   simulates an instrument in memory, [`channel::TcpChannel`] speaks
//!   terminated text over a socket.
//! - **`instrument`**: Declarative property bindings. A
//!   [`instrument::PropertyDescriptor`] maps a named property onto wire
//!   commands with validation; [`instrument::Instrument`] bundles them over
//!   one channel and [`instrument::DeviceRegistry`] collects instruments by
//!   name.
//! - **`drivers`**: Ready-made property tables for concrete devices.
//! - **`scan`**: The sweep vocabulary. [`scan::PropertyScan`],
//!   [`scan::FunctionScan`], [`scan::RepeatScan`], [`scan::AverageScan`],
//!   [`scan::ContinuousScan`] and [`scan::OptimizeScan`] each describe one
//!   axis of a measurement.
//! - **`runinfo`**: A scan stack plus derived geometry and per-run
//!   bookkeeping ([`runinfo::RunInfo`]).
//! - **`experiment`**: The acquisition engine. [`experiment::Experiment`]
//!   walks the grid, measures and persists every point; a run can execute
//!   inline or on a worker thread with live monitoring.
//! - **`optimize`**: Feedback optimizers driven by
//!   [`scan::OptimizeScan`].
//! - **`data`**: Run file containers and the in-memory mirror of the live
//!   datasets, plus [`data::load`] for reading runs back.
//! - **`metadata`**: The JSON records describing a run and its devices,
//!   written into every run file.
//! - **`config`**: Settings loaded from `labscan.toml` and `LABSCAN_*`
//!   environment variables.
//! - **`error`** / **`logging`**: The crate-wide error type and tracing
//!   setup.

pub mod channel;
pub mod config;
pub mod data;
pub mod drivers;
pub mod error;
pub mod experiment;
pub mod instrument;
pub mod logging;
pub mod metadata;
pub mod optimize;
pub mod runinfo;
pub mod scan;

pub use error::{ScanError, ScanResult};
