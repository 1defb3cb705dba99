//! Live data and persistence: the shared in-memory store, on-disk run
//! containers and the loader that reads them back.

pub mod container;
#[cfg(feature = "storage_hdf5")]
pub mod hdf5;
pub mod loader;
pub mod store;

pub use container::{open_storage, BinaryStore, RunStorage, BINARY_EXTENSION, HDF5_EXTENSION};
pub use loader::{load, LoadedRun};
pub use store::DataStore;
