//! Core library for the ISI macroscope acquisition and analysis system.
//!
//! This library contains the parameter store, message bus, shared-frame
//! channel, stimulus and camera pipelines, acquisition orchestration, and
//! the offline analysis pipeline. `isi-daemon` (src/bin) wires these into a
//! running process; the library itself has no process entry point.

pub mod acquisition;
pub mod analysis;
pub mod bus;
pub mod camera;
pub mod error;
pub mod geometry;
pub mod lifecycle;
pub mod param;
pub mod shmem;
pub mod stimulus;
pub mod types;
