//! Stimulus pipeline (spec.md §4.4, §4.5): spherical-geometry frame
//! generation, the per-direction frame library, and the playback engine
//! that drives it at monitor FPS.

pub mod generator;
pub mod library;
pub mod playback;

pub use library::{DirectionFrames, StimulusLibrary};
pub use playback::{PlaybackEngine, PlaybackState};
