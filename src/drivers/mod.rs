//! Instrument drivers.
//!
//! A driver here is a function that installs a property table on a channel
//! and returns the bound [`Instrument`](crate::instrument::Instrument).
//! Vendor hardware drivers live outside the crate; the shipped simulator
//! driver exists so experiments, docs and tests have a realistic device that
//! exercises every validation mode.

mod sim_voltage;

pub use sim_voltage::sim_voltage_source;
