//! Acquisition core (spec.md §4.7–§4.9, §4.11): the synchronization
//! tracker, recorder, phase-sequencing orchestrator, and mode controller.

pub mod mode;
pub mod orchestrator;
pub mod recorder;
pub mod sync_tracker;

pub use mode::{Mode, ModeController};
pub use orchestrator::{Orchestrator, Phase};
pub use recorder::Recorder;
pub use sync_tracker::SyncTracker;
